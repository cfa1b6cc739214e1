use std::fmt;
use std::str::FromStr;

use crate::error::{IoreError, Result};
use crate::test_spec::TestSpec;

/// Order in which runs are executed within a replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunOrder {
    #[default]
    Fixed,
    /// Shuffled with a seed shared by every task.
    Random,
}

impl RunOrder {
    pub fn label(&self) -> &'static str {
        match self {
            RunOrder::Fixed => "fixed",
            RunOrder::Random => "random",
        }
    }
}

impl FromStr for RunOrder {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(RunOrder::Fixed),
            "random" => Ok(RunOrder::Random),
            _ => Err(IoreError::config("run_order", format!("invalid value '{s}'"))),
        }
    }
}

impl fmt::Display for RunOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub num_repetitions: u32,
    pub test: TestSpec,
}

impl Default for RunSpec {
    fn default() -> Self {
        Self {
            num_repetitions: 1,
            test: TestSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatsFormat {
    #[default]
    Csv,
    Json,
}

impl StatsFormat {
    pub fn label(&self) -> &'static str {
        match self {
            StatsFormat::Csv => "csv",
            StatsFormat::Json => "json",
        }
    }
}

impl FromStr for StatsFormat {
    type Err = IoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(StatsFormat::Csv),
            "json" => Ok(StatsFormat::Json),
            _ => Err(IoreError::config("data_format", format!("invalid value '{s}'"))),
        }
    }
}

/// Where and how per-task and per-test timings are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsExporterSpec {
    pub report_task: bool,
    pub report_test: bool,
    pub data_format: StatsFormat,
    pub export_dir: String,
}

impl Default for StatsExporterSpec {
    fn default() -> Self {
        Self {
            report_task: false,
            report_test: true,
            data_format: StatsFormat::Csv,
            export_dir: ".".to_string(),
        }
    }
}

/// Replications of an ordered set of runs.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentSpec {
    pub num_replications: u32,
    pub run_order: RunOrder,
    pub runs: Vec<RunSpec>,
    pub stats_exporter: Option<StatsExporterSpec>,
}

impl Default for ExperimentSpec {
    fn default() -> Self {
        Self {
            num_replications: 1,
            run_order: RunOrder::Fixed,
            runs: vec![RunSpec::default()],
            stats_exporter: None,
        }
    }
}

impl ExperimentSpec {
    /// Validate every test against the process count.
    pub fn validate(&mut self, available_tasks: u32) -> Result<()> {
        if self.num_replications == 0 {
            return Err(IoreError::config("num_replications", "must be greater than zero"));
        }
        if self.runs.is_empty() {
            return Err(IoreError::config("runs", "at least one run is required"));
        }
        for (i, run) in self.runs.iter_mut().enumerate() {
            if run.num_repetitions == 0 {
                return Err(IoreError::config(
                    format!("runs[{i}].num_repetitions"),
                    "must be greater than zero",
                ));
            }
            run.test.validate(available_tasks).map_err(|e| match e {
                IoreError::Config { param, reason } => {
                    IoreError::config(format!("runs[{i}].{param}"), reason)
                }
                other => other,
            })?;
        }
        if let Some(exporter) = &self.stats_exporter {
            if !exporter.report_task && !exporter.report_test {
                log::warn!("stats exporter has no report type, nothing will be exported");
            }
            if exporter.export_dir.trim().is_empty() {
                return Err(IoreError::config("export_dir", "must not be empty"));
            }
        }
        Ok(())
    }

    /// Tests executed per replication, counting repetitions.
    pub fn tests_per_replication(&self) -> u32 {
        self.runs.iter().map(|r| r.num_repetitions).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{CartesianDataset, DatasetShape, DatasetWorkload, VarType, WorkloadKind};

    #[test]
    fn test_default_experiment() {
        let mut exp = ExperimentSpec::default();
        exp.validate(4).unwrap();
        assert_eq!(exp.runs.len(), 1);
        assert_eq!(exp.runs[0].test.num_tasks(), 4);
        assert_eq!(exp.tests_per_replication(), 1);
    }

    #[test]
    fn test_invalid_counts() {
        let mut exp = ExperimentSpec {
            num_replications: 0,
            ..ExperimentSpec::default()
        };
        assert!(exp.validate(1).is_err());

        let mut exp = ExperimentSpec {
            runs: vec![],
            ..ExperimentSpec::default()
        };
        assert!(exp.validate(1).is_err());

        let mut exp = ExperimentSpec::default();
        exp.runs[0].num_repetitions = 0;
        assert!(exp.validate(1).is_err());
    }

    #[test]
    fn test_run_error_names_run() {
        let mut exp = ExperimentSpec::default();
        exp.runs.push(RunSpec::default());
        exp.runs[1].test.workload.kind = WorkloadKind::Dataset(DatasetWorkload {
            var_types: vec![VarType::Char],
            shape: DatasetShape::Cartesian(CartesianDataset {
                dim_sizes: vec![4],
                dim_divs: vec![3],
            }),
        });
        match exp.validate(2).unwrap_err() {
            IoreError::Config { param, .. } => assert_eq!(param, "runs[1].dim_divs"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_enum_labels() {
        assert_eq!("RANDOM".parse::<RunOrder>().unwrap(), RunOrder::Random);
        assert_eq!("Csv".parse::<StatsFormat>().unwrap(), StatsFormat::Csv);
        assert!("xml".parse::<StatsFormat>().is_err());
        assert_eq!(RunOrder::Fixed.to_string(), "fixed");
    }
}
