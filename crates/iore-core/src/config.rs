//! JSON experiment file.
//!
//! The file is deserialized into raw serde structs first, then mapped onto
//! [`ExperimentSpec`] with every enum string matched case-insensitively.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::backend::{BackendKind, BackendSpec};
use crate::error::{IoreError, Result};
use crate::experiment::{ExperimentSpec, RunOrder, RunSpec, StatsExporterSpec, StatsFormat};
use crate::prng::{PrngDistribution, PrngKind};
use crate::test_spec::{Phase, TestSpec};
use crate::workload::{
    AccessPattern, CartesianDataset, DatasetShape, DatasetWorkload, FileShareMode,
    OffsetWorkload, SizeSource, VarType, Workload, WorkloadKind,
};

/// Parse a size with an optional binary suffix (`k`, `m`, `g`, `t`).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let invalid = || IoreError::config("size", format!("invalid size '{s}'"));
    if s.is_empty() {
        return Err(invalid());
    }

    let (num_str, multiplier) = match s.as_bytes().last() {
        Some(b'k' | b'K') => (&s[..s.len() - 1], 1u64 << 10),
        Some(b'm' | b'M') => (&s[..s.len() - 1], 1u64 << 20),
        Some(b'g' | b'G') => (&s[..s.len() - 1], 1u64 << 30),
        Some(b't' | b'T') => (&s[..s.len() - 1], 1u64 << 40),
        _ => (s, 1),
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(invalid)
}

/// Scalar accepted wherever the file holds a size or a parameter.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(u64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Scalar {
    fn to_size(&self, param: &str) -> Result<u64> {
        match self {
            Scalar::Int(n) => Ok(*n),
            Scalar::Str(s) => {
                parse_size(s).map_err(|_| IoreError::config(param, format!("invalid size '{s}'")))
            }
            other => Err(IoreError::config(param, format!("expected a size, got {other}"))),
        }
    }

    /// Distribution parameter: a plain number, or a size with a suffix.
    fn to_param(&self, param: &str) -> Result<String> {
        match self {
            Scalar::Int(n) => Ok(n.to_string()),
            Scalar::Float(f) => Ok(f.to_string()),
            Scalar::Str(s) if s.trim().parse::<f64>().is_ok() => Ok(s.trim().to_string()),
            Scalar::Str(_) => self.to_size(param).map(|n| n.to_string()),
            Scalar::Bool(_) => Err(IoreError::config(param, "expected a number")),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(n) => write!(f, "{n}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawExperiment {
    num_replications: Option<u32>,
    run_order: Option<String>,
    stats_exporter: Option<RawStatsExporter>,
    runs: Option<Vec<RawRun>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStatsExporter {
    report_type: Option<Vec<String>>,
    data_format: Option<String>,
    export_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRun {
    num_repetitions: Option<u32>,
    test: Option<RawTest>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTest {
    #[serde(rename = "type")]
    phases: Option<Vec<String>>,
    write_flush: Option<bool>,
    write_flush_per_req: Option<bool>,
    read_reorder_offset: Option<u32>,
    intra_test_barrier: Option<bool>,
    inter_test_delay_secs: Option<u32>,
    file_mode: Option<String>,
    file_name: Option<String>,
    file_name_append_sequence_num: Option<bool>,
    file_name_append_task_id: Option<bool>,
    file_dir_per_task: Option<bool>,
    file_keep: Option<bool>,
    workload: Option<RawWorkload>,
    afio: Option<BTreeMap<String, BTreeMap<String, Scalar>>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkload {
    num_tasks: Option<u32>,
    offset: Option<RawOffset>,
    dataset: Option<RawDataset>,
}

type RawDistrib = BTreeMap<String, BTreeMap<String, Scalar>>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawOffset {
    access_pattern: Option<String>,
    data_sizes: Option<Vec<Scalar>>,
    request_sizes: Option<Vec<Scalar>>,
    data_size_distrib: Option<RawDistrib>,
    request_size_distrib: Option<RawDistrib>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDataset {
    num_vars: Option<u32>,
    var_types: Vec<String>,
    cartesian: RawCartesian,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCartesian {
    num_dims: Option<u32>,
    dim_sizes: Vec<u32>,
    dim_divs: Vec<u32>,
}

/// Read and map an experiment file.
pub fn load_experiment(path: impl AsRef<Path>) -> Result<ExperimentSpec> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        IoreError::config("config", format!("cannot read '{}': {e}", path.display()))
    })?;
    experiment_from_str(&text)
}

pub fn experiment_from_str(text: &str) -> Result<ExperimentSpec> {
    let raw: RawExperiment = serde_json::from_str(text)?;
    map_experiment(raw)
}

fn map_experiment(raw: RawExperiment) -> Result<ExperimentSpec> {
    let mut exp = ExperimentSpec::default();
    if let Some(n) = raw.num_replications {
        exp.num_replications = n;
    }
    if let Some(order) = raw.run_order {
        exp.run_order = order.parse::<RunOrder>()?;
    }
    if let Some(se) = raw.stats_exporter {
        exp.stats_exporter = Some(map_stats_exporter(se)?);
    }
    if let Some(runs) = raw.runs {
        exp.runs = runs.into_iter().map(map_run).collect::<Result<_>>()?;
    }
    Ok(exp)
}

fn map_stats_exporter(raw: RawStatsExporter) -> Result<StatsExporterSpec> {
    let mut spec = StatsExporterSpec::default();
    if let Some(types) = raw.report_type {
        spec.report_task = false;
        spec.report_test = false;
        for t in types {
            match t.to_ascii_lowercase().as_str() {
                "task" => spec.report_task = true,
                "test" => spec.report_test = true,
                _ => return Err(IoreError::config("report_type", format!("invalid value '{t}'"))),
            }
        }
    }
    if let Some(format) = raw.data_format {
        spec.data_format = format.parse::<StatsFormat>()?;
    }
    if let Some(dir) = raw.export_dir {
        spec.export_dir = dir;
    }
    Ok(spec)
}

fn map_run(raw: RawRun) -> Result<RunSpec> {
    let mut run = RunSpec::default();
    if let Some(n) = raw.num_repetitions {
        run.num_repetitions = n;
    }
    if let Some(test) = raw.test {
        run.test = map_test(test)?;
    }
    Ok(run)
}

fn map_test(raw: RawTest) -> Result<TestSpec> {
    let mut test = TestSpec::default();

    if let Some(phases) = raw.phases {
        test.write = false;
        test.read = false;
        for p in phases {
            match p.parse::<Phase>()? {
                Phase::Write => test.write = true,
                Phase::Read => test.read = true,
            }
        }
    }
    if let Some(v) = raw.write_flush {
        test.write_flush = v;
    }
    if let Some(v) = raw.write_flush_per_req {
        test.write_flush_per_req = v;
    }
    if let Some(v) = raw.read_reorder_offset {
        test.read_reorder_offset = v;
    }
    if let Some(v) = raw.intra_test_barrier {
        test.intra_test_barrier = v;
    }
    if let Some(v) = raw.inter_test_delay_secs {
        test.inter_test_delay_secs = v;
    }
    if let Some(mode) = raw.file_mode {
        test.file_mode = mode.parse::<FileShareMode>()?;
    }
    if let Some(name) = raw.file_name {
        test.file_name = name;
    }
    if let Some(v) = raw.file_name_append_sequence_num {
        test.file_name_append_sequence_num = v;
    }
    if let Some(v) = raw.file_name_append_task_id {
        test.file_name_append_task_id = v;
    }
    if let Some(v) = raw.file_dir_per_task {
        test.file_dir_per_task = v;
    }
    if let Some(v) = raw.file_keep {
        test.file_keep = v;
    }
    if let Some(workload) = raw.workload {
        test.workload = map_workload(workload)?;
    }
    if let Some(afio) = raw.afio {
        test.backend = map_afio(afio)?;
    }
    Ok(test)
}

fn map_workload(raw: RawWorkload) -> Result<Workload> {
    let kind = match (raw.offset, raw.dataset) {
        (Some(oset), None) => WorkloadKind::Offset(map_offset(oset)?),
        (None, Some(dset)) => WorkloadKind::Dataset(map_dataset(dset)?),
        (None, None) => WorkloadKind::Offset(OffsetWorkload::default()),
        (Some(_), Some(_)) => {
            return Err(IoreError::config(
                "workload",
                "holds both 'offset' and 'dataset'",
            ));
        }
    };
    Ok(Workload {
        num_tasks: raw.num_tasks.unwrap_or(0),
        kind,
    })
}

fn map_offset(raw: RawOffset) -> Result<OffsetWorkload> {
    let mut oset = OffsetWorkload::default();
    if let Some(pattern) = raw.access_pattern {
        oset.access_pattern = pattern.parse::<AccessPattern>()?;
    }
    if let Some(source) = size_source("data_sizes", raw.data_sizes, raw.data_size_distrib)? {
        oset.data_sizes = source;
    }
    if let Some(source) =
        size_source("request_sizes", raw.request_sizes, raw.request_size_distrib)?
    {
        oset.req_sizes = source;
    }
    Ok(oset)
}

/// An explicit list wins over a distribution when both are given.
fn size_source(
    param: &str,
    list: Option<Vec<Scalar>>,
    distrib: Option<RawDistrib>,
) -> Result<Option<SizeSource>> {
    if let Some(list) = list {
        if distrib.is_some() {
            log::warn!("'{param}' given with a distribution, ignoring the distribution");
        }
        let sizes = list
            .iter()
            .map(|s| s.to_size(param))
            .collect::<Result<Vec<_>>>()?;
        return Ok(Some(SizeSource::List(sizes)));
    }
    distrib
        .map(|d| map_distrib(&format!("{param}_distrib"), d).map(SizeSource::Distribution))
        .transpose()
}

fn map_distrib(param: &str, raw: RawDistrib) -> Result<PrngDistribution> {
    let mut entries = raw.into_iter();
    let (name, params) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(IoreError::config(
                param,
                "must hold exactly one of 'unif', 'norm', 'geom'",
            ));
        }
    };
    let kind = name
        .parse::<PrngKind>()
        .map_err(|e| IoreError::config(param, e.to_string()))?;
    let mut dist = PrngDistribution::new(kind);
    for (key, value) in &params {
        dist = dist.with_param(key, value.to_param(param)?);
    }
    dist.validate()
        .map_err(|e| IoreError::config(param, e.to_string()))?;
    Ok(dist)
}

fn map_dataset(raw: RawDataset) -> Result<DatasetWorkload> {
    let var_types = raw
        .var_types
        .iter()
        .map(|t| t.parse::<VarType>())
        .collect::<Result<Vec<_>>>()?;
    if let Some(n) = raw.num_vars {
        if n as usize != var_types.len() {
            return Err(IoreError::config(
                "num_vars",
                format!("is {n} but var_types has {} entries", var_types.len()),
            ));
        }
    }

    let cart = raw.cartesian;
    if let Some(n) = cart.num_dims {
        if n as usize != cart.dim_sizes.len() {
            return Err(IoreError::config(
                "num_dims",
                format!("is {n} but dim_sizes has {} entries", cart.dim_sizes.len()),
            ));
        }
    }
    Ok(DatasetWorkload {
        var_types,
        shape: DatasetShape::Cartesian(CartesianDataset {
            dim_sizes: cart.dim_sizes,
            dim_divs: cart.dim_divs,
        }),
    })
}

fn map_afio(raw: BTreeMap<String, BTreeMap<String, Scalar>>) -> Result<BackendSpec> {
    let mut entries = raw.into_iter();
    let (name, params) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => return Err(IoreError::config("afio", "must name exactly one backend")),
    };
    Ok(BackendSpec {
        kind: name.parse::<BackendKind>()?,
        params: params
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::{PARAM_MAX, PARAM_MEAN, PARAM_MIN};

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("1M").unwrap(), 1 << 20);
        assert_eq!(parse_size(" 2g ").unwrap(), 2 << 30);
        assert_eq!(parse_size("1t").unwrap(), 1 << 40);
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("1.5m").is_err());
        assert!(parse_size("99999999999t").is_err());
    }

    #[test]
    fn test_empty_document_is_default() {
        let exp = experiment_from_str("{}").unwrap();
        assert_eq!(exp, ExperimentSpec::default());
    }

    #[test]
    fn test_full_offset_experiment() {
        let exp = experiment_from_str(
            r#"{
                "num_replications": 2,
                "run_order": "Random",
                "stats_exporter": { "report_type": ["task", "TEST"], "data_format": "json", "export_dir": "/tmp" },
                "runs": [ {
                    "num_repetitions": 3,
                    "test": {
                        "type": ["write"],
                        "write_flush": true,
                        "file_mode": "nxn",
                        "file_name": "/scratch/out.dat",
                        "file_keep": true,
                        "workload": {
                            "num_tasks": 4,
                            "offset": {
                                "access_pattern": "RANDOM",
                                "data_sizes": ["1m", 2048],
                                "request_size_distrib": { "unif": { "min": "4k", "max": "64k" } }
                            }
                        },
                        "afio": { "cstream": { "buffer_size": 65536 } }
                    }
                } ]
            }"#,
        )
        .unwrap();

        assert_eq!(exp.num_replications, 2);
        assert_eq!(exp.run_order, RunOrder::Random);
        let se = exp.stats_exporter.as_ref().unwrap();
        assert!(se.report_task && se.report_test);
        assert_eq!(se.data_format, StatsFormat::Json);

        let run = &exp.runs[0];
        assert_eq!(run.num_repetitions, 3);
        let test = &run.test;
        assert!(test.write && !test.read);
        assert!(test.write_flush);
        assert_eq!(test.file_mode, FileShareMode::PerTask);
        assert_eq!(test.workload.num_tasks, 4);
        assert_eq!(test.backend.kind, BackendKind::Cstream);
        assert_eq!(test.backend.params["buffer_size"], "65536");

        let oset = test.workload.offset().unwrap();
        assert_eq!(oset.access_pattern, AccessPattern::Random);
        assert_eq!(oset.data_sizes, SizeSource::List(vec![1 << 20, 2048]));
        match &oset.req_sizes {
            SizeSource::Distribution(d) => {
                assert_eq!(d.kind, PrngKind::Uniform);
                assert_eq!(d.params[PARAM_MIN], "4096");
                assert_eq!(d.params[PARAM_MAX], "65536");
            }
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_dataset_workload() {
        let exp = experiment_from_str(
            r#"{ "runs": [ { "test": { "workload": { "dataset": {
                "num_vars": 2, "var_types": ["Double", "long long"],
                "cartesian": { "num_dims": 2, "dim_sizes": [8, 16], "dim_divs": [2, 2] }
            } } } } ] }"#,
        )
        .unwrap();
        let dset = exp.runs[0].test.workload.dataset().unwrap();
        assert_eq!(dset.var_types, vec![VarType::Double, VarType::LongLong]);
        assert_eq!(dset.vars_size(), 16);
    }

    #[test]
    fn test_rejects_malformed_documents() {
        let cases = [
            r#"{ "bogus": 1 }"#,
            r#"{ "run_order": "sorted" }"#,
            r#"{ "runs": [ { "test": { "workload": { "offset": {}, "dataset": {
                "var_types": ["char"], "cartesian": { "dim_sizes": [4], "dim_divs": [1] } } } } } ] }"#,
            r#"{ "runs": [ { "test": { "workload": { "dataset": {
                "num_vars": 3, "var_types": ["char"], "cartesian": { "dim_sizes": [4], "dim_divs": [1] } } } } } ] }"#,
            r#"{ "runs": [ { "test": { "workload": { "dataset": {
                "var_types": ["char"], "cartesian": { "num_dims": 2, "dim_sizes": [4], "dim_divs": [1] } } } } } ] }"#,
            r#"{ "runs": [ { "test": { "workload": { "offset": {
                "data_size_distrib": { "unif": { "min": 1, "max": 2 }, "geom": { "mean": 3 } } } } } } ] }"#,
            r#"{ "runs": [ { "test": { "workload": { "offset": {
                "data_size_distrib": { "norm": { "mean": "1m" } } } } } } ] }"#,
            r#"{ "runs": [ { "test": { "workload": { "offset": { "data_sizes": ["1x"] } } } } ] }"#,
            r#"{ "runs": [ { "test": { "afio": { "posix": {}, "cstream": {} } } } ] }"#,
            r#"{ "runs": [ { "test": { "afio": { "hdf5": {} } } } ] }"#,
            r#"{ "runs": [ { "test": { "type": ["append"] } } ] }"#,
            r#"{ "stats_exporter": { "report_type": ["node"] } }"#,
            "[1, 2",
        ];
        for case in cases {
            let err = experiment_from_str(case).unwrap_err();
            assert!(err.is_config(), "{case}: {err}");
        }
    }

    #[test]
    fn test_geometric_param_numeric() {
        let exp = experiment_from_str(
            r#"{ "runs": [ { "test": { "workload": { "offset": {
                "data_size_distrib": { "GEOM": { "mean": "2.5" } } } } } } ] }"#,
        )
        .unwrap();
        match &exp.runs[0].test.workload.offset().unwrap().data_sizes {
            SizeSource::Distribution(d) => assert_eq!(d.params[PARAM_MEAN], "2.5"),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exp.json");
        std::fs::write(&path, r#"{ "num_replications": 5 }"#).unwrap();
        assert_eq!(load_experiment(&path).unwrap().num_replications, 5);
        assert!(load_experiment(dir.path().join("missing.json")).unwrap_err().is_config());
    }
}
