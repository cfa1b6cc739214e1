//! Workload description: what each task reads or writes, before partitioning.

use std::fmt;
use std::str::FromStr;

use crate::error::{IoreError, Result};
use crate::prng::PrngDistribution;

pub const DEFAULT_DATA_SIZE: u64 = 1_048_576;
pub const DEFAULT_REQ_SIZE: u64 = 262_144;

/// Order in which a task visits its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPattern {
    #[default]
    Sequential,
    Random,
}

impl AccessPattern {
    pub fn label(&self) -> &'static str {
        match self {
            AccessPattern::Sequential => "sequential",
            AccessPattern::Random => "random",
        }
    }
}

impl FromStr for AccessPattern {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(AccessPattern::Sequential),
            "random" => Ok(AccessPattern::Random),
            _ => Err(IoreError::config("access_pattern", format!("invalid value '{s}'"))),
        }
    }
}

/// How tasks share files: one shared file (Nx1) or one file per task (NxN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileShareMode {
    #[default]
    Shared,
    PerTask,
}

impl FileShareMode {
    pub fn label(&self) -> &'static str {
        match self {
            FileShareMode::Shared => "Nx1",
            FileShareMode::PerTask => "NxN",
        }
    }
}

impl FromStr for FileShareMode {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nx1" => Ok(FileShareMode::Shared),
            "nxn" => Ok(FileShareMode::PerTask),
            _ => Err(IoreError::config("file_mode", format!("invalid value '{s}'"))),
        }
    }
}

impl fmt::Display for FileShareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where a per-task size list comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SizeSource {
    /// Cyclic list indexed by `task_id % len`.
    List(Vec<u64>),
    /// Sampled once per task from a synchronized stream.
    Distribution(PrngDistribution),
}

impl SizeSource {
    fn validate(&self, param: &str) -> Result<()> {
        match self {
            SizeSource::List(sizes) => {
                if sizes.is_empty() {
                    return Err(IoreError::config(param, "list must not be empty"));
                }
                if sizes.iter().any(|&s| s == 0) {
                    return Err(IoreError::config(param, "sizes must be positive"));
                }
                Ok(())
            }
            SizeSource::Distribution(dist) => dist
                .validate()
                .map_err(|e| IoreError::config(format!("{param}_distrib"), e.to_string())),
        }
    }
}

/// Offset workload: every task moves a flat run of bytes in fixed-size requests.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetWorkload {
    pub access_pattern: AccessPattern,
    pub data_sizes: SizeSource,
    pub req_sizes: SizeSource,
}

impl Default for OffsetWorkload {
    fn default() -> Self {
        Self {
            access_pattern: AccessPattern::Sequential,
            data_sizes: SizeSource::List(vec![DEFAULT_DATA_SIZE]),
            req_sizes: SizeSource::List(vec![DEFAULT_REQ_SIZE]),
        }
    }
}

/// Element type of a dataset variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Char,
    Integer,
    Long,
    LongLong,
    Float,
    Double,
}

impl VarType {
    /// Width in bytes.
    pub fn width(&self) -> u64 {
        match self {
            VarType::Char => 1,
            VarType::Integer => 4,
            VarType::Long => 8,
            VarType::LongLong => 8,
            VarType::Float => 4,
            VarType::Double => 8,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VarType::Char => "char",
            VarType::Integer => "integer",
            VarType::Long => "long",
            VarType::LongLong => "long long",
            VarType::Float => "float",
            VarType::Double => "double",
        }
    }
}

impl FromStr for VarType {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "char" => Ok(VarType::Char),
            "integer" => Ok(VarType::Integer),
            "long" => Ok(VarType::Long),
            "long long" => Ok(VarType::LongLong),
            "float" => Ok(VarType::Float),
            "double" => Ok(VarType::Double),
            _ => Err(IoreError::config("var_types", format!("invalid value '{s}'"))),
        }
    }
}

/// N-dimensional global array cut into a fixed grid of blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartesianDataset {
    pub dim_sizes: Vec<u32>,
    pub dim_divs: Vec<u32>,
}

impl CartesianDataset {
    pub fn num_dims(&self) -> usize {
        self.dim_sizes.len()
    }

    fn validate(&self, num_tasks: u32) -> Result<()> {
        if self.dim_sizes.is_empty() {
            return Err(IoreError::config("num_dims", "must be greater than zero"));
        }
        if self.dim_divs.len() != self.dim_sizes.len() {
            return Err(IoreError::config(
                "dim_divs",
                format!(
                    "has {} entries but dim_sizes has {}",
                    self.dim_divs.len(),
                    self.dim_sizes.len()
                ),
            ));
        }
        for (i, (&size, &div)) in self.dim_sizes.iter().zip(&self.dim_divs).enumerate() {
            if size == 0 {
                return Err(IoreError::config(
                    "dim_sizes",
                    format!("dimension {i} must be greater than zero"),
                ));
            }
            if div == 0 || div > size {
                return Err(IoreError::config(
                    "dim_divs",
                    format!("dimension {i}: {div} divisions for size {size}"),
                ));
            }
        }
        let product: u64 = self.dim_divs.iter().map(|&d| u64::from(d)).product();
        if product != u64::from(num_tasks) {
            return Err(IoreError::config(
                "dim_divs",
                format!("product of divisions ({product}) must equal num_tasks ({num_tasks})"),
            ));
        }
        Ok(())
    }
}

/// Dataset layout. Cartesian is the only decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetShape {
    Cartesian(CartesianDataset),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetWorkload {
    pub var_types: Vec<VarType>,
    pub shape: DatasetShape,
}

impl DatasetWorkload {
    pub fn num_vars(&self) -> usize {
        self.var_types.len()
    }

    /// Bytes per cell: the sum of every variable's width.
    pub fn vars_size(&self) -> u64 {
        self.var_types.iter().map(VarType::width).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadKind {
    Offset(OffsetWorkload),
    Dataset(DatasetWorkload),
}

impl WorkloadKind {
    pub fn label(&self) -> &'static str {
        match self {
            WorkloadKind::Offset(_) => "offset",
            WorkloadKind::Dataset(_) => "dataset",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    /// Participating tasks; 0 means every available process.
    pub num_tasks: u32,
    pub kind: WorkloadKind,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            num_tasks: 0,
            kind: WorkloadKind::Offset(OffsetWorkload::default()),
        }
    }
}

impl Workload {
    /// Resolve `num_tasks` against the processes available and check the
    /// workload is partitionable.
    ///
    /// Asking for more tasks than processes is the one setting corrected
    /// instead of rejected.
    pub fn validate(&mut self, available_tasks: u32) -> Result<()> {
        if self.num_tasks == 0 {
            self.num_tasks = available_tasks;
        } else if self.num_tasks > available_tasks {
            log::warn!(
                "requested {} tasks but only {} available, using {}",
                self.num_tasks,
                available_tasks,
                available_tasks
            );
            self.num_tasks = available_tasks;
        }
        if self.num_tasks == 0 {
            return Err(IoreError::config("num_tasks", "no tasks available"));
        }

        match &self.kind {
            WorkloadKind::Offset(oset) => {
                oset.data_sizes.validate("data_sizes")?;
                oset.req_sizes.validate("request_sizes")?;
            }
            WorkloadKind::Dataset(dset) => {
                if dset.var_types.is_empty() {
                    return Err(IoreError::config("num_vars", "must be greater than zero"));
                }
                match &dset.shape {
                    DatasetShape::Cartesian(cart) => cart.validate(self.num_tasks)?,
                }
            }
        }
        Ok(())
    }

    pub fn offset(&self) -> Option<&OffsetWorkload> {
        match &self.kind {
            WorkloadKind::Offset(oset) => Some(oset),
            WorkloadKind::Dataset(_) => None,
        }
    }

    pub fn dataset(&self) -> Option<&DatasetWorkload> {
        match &self.kind {
            WorkloadKind::Dataset(dset) => Some(dset),
            WorkloadKind::Offset(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cartesian(sizes: &[u32], divs: &[u32]) -> Workload {
        Workload {
            num_tasks: divs.iter().product(),
            kind: WorkloadKind::Dataset(DatasetWorkload {
                var_types: vec![VarType::Double],
                shape: DatasetShape::Cartesian(CartesianDataset {
                    dim_sizes: sizes.to_vec(),
                    dim_divs: divs.to_vec(),
                }),
            }),
        }
    }

    #[test]
    fn test_num_tasks_resolution() {
        let mut w = Workload::default();
        w.validate(8).unwrap();
        assert_eq!(w.num_tasks, 8);

        let mut w = Workload {
            num_tasks: 16,
            ..Workload::default()
        };
        w.validate(4).unwrap();
        assert_eq!(w.num_tasks, 4);
    }

    #[test]
    fn test_size_sources() {
        let mut w = Workload {
            num_tasks: 2,
            kind: WorkloadKind::Offset(OffsetWorkload {
                data_sizes: SizeSource::List(vec![]),
                ..OffsetWorkload::default()
            }),
        };
        assert!(w.validate(2).is_err());

        let mut w = Workload {
            num_tasks: 2,
            kind: WorkloadKind::Offset(OffsetWorkload {
                req_sizes: SizeSource::List(vec![4096, 0]),
                ..OffsetWorkload::default()
            }),
        };
        assert!(w.validate(2).is_err());

        let mut w = Workload {
            num_tasks: 2,
            kind: WorkloadKind::Offset(OffsetWorkload {
                data_sizes: SizeSource::Distribution(PrngDistribution::uniform(1024.0, 4096.0)),
                ..OffsetWorkload::default()
            }),
        };
        assert!(w.validate(2).is_ok());
    }

    #[test]
    fn test_cartesian_validation() {
        assert!(cartesian(&[8, 16], &[2, 2]).validate(4).is_ok());

        // product of divs must match num_tasks
        let mut w = cartesian(&[8, 16], &[2, 2]);
        w.num_tasks = 3;
        assert!(w.validate(4).is_err());

        assert!(cartesian(&[8, 16], &[0, 4]).validate(4).is_err());
        assert!(cartesian(&[2, 16], &[4, 1]).validate(4).is_err());
        assert!(cartesian(&[], &[]).validate(1).is_err());
    }

    #[test]
    fn test_var_widths() {
        let dset = DatasetWorkload {
            var_types: vec![VarType::Char, VarType::Integer, VarType::Double],
            shape: DatasetShape::Cartesian(CartesianDataset {
                dim_sizes: vec![4],
                dim_divs: vec![1],
            }),
        };
        assert_eq!(dset.vars_size(), 13);
        assert_eq!(dset.num_vars(), 3);
        assert_eq!("Long Long".parse::<VarType>().unwrap(), VarType::LongLong);
    }

    #[test]
    fn test_enum_labels() {
        assert_eq!("nx1".parse::<FileShareMode>().unwrap(), FileShareMode::Shared);
        assert_eq!("NxN".parse::<FileShareMode>().unwrap(), FileShareMode::PerTask);
        assert_eq!("Random".parse::<AccessPattern>().unwrap(), AccessPattern::Random);
        assert!("strided".parse::<AccessPattern>().is_err());
    }
}
