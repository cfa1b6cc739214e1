//! Statistics export and the machine-readable run summary.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use iore_core::error::{IoreError, Result};
use iore_core::experiment::{StatsExporterSpec, StatsFormat};
use iore_core::recorder::{Action, TestRecord};
use serde::Serialize;

const TASK_HEADER: &str =
    "exp_repl_id,run_id,run_rept_id,task_id,test,action,start_time,stop_time,latency,throughput\n";
const TEST_HEADER: &str =
    "exp_repl_id,run_id,run_rept_id,test,action,start_time,stop_time,latency,throughput\n";

/// One action of one test, as written to the statistics files.
#[derive(Debug, Serialize)]
pub struct ActionRow {
    pub exp_repl_id: u32,
    pub run_id: u32,
    pub run_rept_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
    pub test: &'static str,
    pub action: &'static str,
    pub start_time: f64,
    pub stop_time: f64,
    pub latency: f64,
    pub throughput: f64,
}

impl ActionRow {
    fn to_csv(&self) -> String {
        let prefix = match self.task_id {
            Some(task_id) => format!(
                "{},{},{},{}",
                self.exp_repl_id, self.run_id, self.run_rept_id, task_id
            ),
            None => format!("{},{},{}", self.exp_repl_id, self.run_id, self.run_rept_id),
        };
        format!(
            "{},{},{},{:.6},{:.6},{:.6},{:.6}\n",
            prefix,
            self.test,
            self.action,
            self.start_time,
            self.stop_time,
            self.latency,
            self.throughput
        )
    }
}

/// Four rows per record, one per action.
pub fn action_rows(records: &[TestRecord], task_id: Option<u32>) -> Vec<ActionRow> {
    records
        .iter()
        .flat_map(|r| {
            Action::ALL.into_iter().map(move |action| ActionRow {
                exp_repl_id: r.seq.replication,
                run_id: r.seq.run,
                run_rept_id: r.seq.repetition,
                task_id,
                test: r.phase.label(),
                action: action.label(),
                start_time: r.start(action),
                stop_time: r.stop(action),
                latency: r.latency(action),
                throughput: r.throughput(action),
            })
        })
        .collect()
}

/// Fail unless `dir` is an existing, writable directory.
pub fn check_export_dir(dir: &str) -> Result<()> {
    let path = Path::new(dir);
    if !path.is_dir() {
        return Err(IoreError::config("export_dir", format!("'{dir}' is not a directory")));
    }
    let cdir = std::ffi::CString::new(dir).map_err(|_| IoreError::InvalidArgument)?;
    let rc = unsafe { libc::access(cdir.as_ptr(), libc::F_OK | libc::W_OK) };
    if rc != 0 {
        return Err(IoreError::config(
            "export_dir",
            format!("insufficient permissions on directory '{dir}'"),
        ));
    }
    Ok(())
}

/// Path of a report file; `task_id` is set for per-task reports.
pub fn report_path(dir: &str, task_id: Option<u32>, stamp: &str, format: StatsFormat) -> PathBuf {
    let name = match task_id {
        Some(id) => format!("iore_task_{id:09}_{stamp}.{}", format.label()),
        None => format!("iore_test_{stamp}.{}", format.label()),
    };
    Path::new(dir).join(name)
}

fn write_report(path: &Path, rows: &[ActionRow], format: StatsFormat, header: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    match format {
        StatsFormat::Csv => {
            file.write_all(header.as_bytes())?;
            for row in rows {
                file.write_all(row.to_csv().as_bytes())?;
            }
        }
        StatsFormat::Json => {
            let json = serde_json::to_string_pretty(rows)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
        }
    }
    log::info!("statistics written to '{}'", path.display());
    Ok(())
}

/// Per-task report of this task's own records.
pub fn export_task_report(
    spec: &StatsExporterSpec,
    task_id: u32,
    records: &[TestRecord],
    stamp: &str,
) -> Result<()> {
    check_export_dir(&spec.export_dir)?;
    let path = report_path(&spec.export_dir, Some(task_id), stamp, spec.data_format);
    write_report(&path, &action_rows(records, Some(task_id)), spec.data_format, TASK_HEADER)
}

/// Per-test report of the reduced records; written by the master task.
pub fn export_test_report(spec: &StatsExporterSpec, records: &[TestRecord], stamp: &str) -> Result<()> {
    check_export_dir(&spec.export_dir)?;
    let path = report_path(&spec.export_dir, None, stamp, spec.data_format);
    write_report(&path, &action_rows(records, None), spec.data_format, TEST_HEADER)
}

fn strftime_now(fmt: &[u8]) -> String {
    unsafe {
        let mut t: libc::time_t = 0;
        libc::time(&mut t);
        let tm = libc::localtime(&t);
        if tm.is_null() {
            return String::new();
        }
        let mut buf = [0u8; 64];
        let len = libc::strftime(
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len(),
            fmt.as_ptr() as *const libc::c_char,
            tm,
        );
        String::from_utf8_lossy(&buf[..len]).to_string()
    }
}

/// Local time as `YYYYmmddHHMMSS`, used in report file names.
pub fn file_timestamp() -> String {
    strftime_now(b"%Y%m%d%H%M%S\0")
}

pub fn current_time_string() -> String {
    strftime_now(b"%a %b %d %H:%M:%S %Y\0")
}

pub fn get_machine_string() -> String {
    unsafe {
        let mut uts: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut uts) != 0 {
            return String::new();
        }
        let nodename = std::ffi::CStr::from_ptr(uts.nodename.as_ptr());
        let sysname = std::ffi::CStr::from_ptr(uts.sysname.as_ptr());
        let release = std::ffi::CStr::from_ptr(uts.release.as_ptr());
        format!(
            "{} {} {}",
            nodename.to_string_lossy(),
            sysname.to_string_lossy(),
            release.to_string_lossy(),
        )
    }
}

// ============================================================================
// Run summary document (--json-file)
// ============================================================================

#[derive(Debug, Serialize)]
pub struct RunSummaryDocument {
    pub version: String,
    pub began: String,
    pub command_line: String,
    pub machine: String,
    pub num_tasks: u32,
    pub tests: Vec<TestSummary>,
    pub finished: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub replication: u32,
    pub run: u32,
    pub repetition: u32,
    pub test: &'static str,
    pub create_open_time: f64,
    pub write_read_time: f64,
    pub close_time: f64,
    pub remove_time: f64,
    pub total_time: f64,
    pub data_size: u64,
    #[serde(rename = "bwMiB")]
    pub bw_mib: f64,
}

impl From<&TestRecord> for TestSummary {
    fn from(r: &TestRecord) -> Self {
        let total = r.total_time();
        let bw = if total > 0.0 {
            r.data_size as f64 / total
        } else {
            0.0
        };
        Self {
            replication: r.seq.replication,
            run: r.seq.run,
            repetition: r.seq.repetition,
            test: r.phase.label(),
            create_open_time: r.latency(Action::CreateOpen),
            write_read_time: r.latency(Action::WriteRead),
            close_time: r.latency(Action::Close),
            remove_time: r.latency(Action::Remove),
            total_time: total,
            data_size: r.data_size,
            bw_mib: bw / 1_048_576.0,
        }
    }
}

pub fn build_run_summary(
    began: String,
    command_line: &str,
    num_tasks: u32,
    records: &[TestRecord],
) -> RunSummaryDocument {
    RunSummaryDocument {
        version: env!("CARGO_PKG_VERSION").to_string(),
        began,
        command_line: command_line.to_string(),
        machine: get_machine_string(),
        num_tasks,
        tests: records.iter().map(TestSummary::from).collect(),
        finished: current_time_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iore_core::test_spec::{Phase, SequenceId};

    fn record() -> TestRecord {
        TestRecord::from_reduced(
            SequenceId {
                replication: 1,
                run: 2,
                repetition: 3,
            },
            Phase::Read,
            [1.0, 2.0, 4.0, 0.0],
            [2.0, 4.0, 5.0, 0.0],
            2048,
        )
    }

    #[test]
    fn test_csv_rows() {
        let rows = action_rows(&[record()], Some(7));
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[1].to_csv(),
            "1,2,3,7,read,write/read,2.000000,4.000000,2.000000,1024.000000\n"
        );
        assert_eq!(
            rows[2].to_csv(),
            "1,2,3,7,read,close,4.000000,5.000000,1.000000,0.000000\n"
        );

        let rows = action_rows(&[record()], None);
        assert!(rows[0].to_csv().starts_with("1,2,3,read,create/open,"));
    }

    #[test]
    fn test_report_paths() {
        let p = report_path("/out", Some(5), "20240102030405", StatsFormat::Csv);
        assert_eq!(p, PathBuf::from("/out/iore_task_000000005_20240102030405.csv"));
        let p = report_path("/out", None, "20240102030405", StatsFormat::Json);
        assert_eq!(p, PathBuf::from("/out/iore_test_20240102030405.json"));
    }

    #[test]
    fn test_export_csv_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = StatsExporterSpec {
            report_task: true,
            report_test: true,
            data_format: StatsFormat::Csv,
            export_dir: dir.path().to_string_lossy().into_owned(),
        };

        export_task_report(&spec, 0, &[record()], "20240101000000").unwrap();
        let text = std::fs::read_to_string(
            dir.path().join("iore_task_000000000_20240101000000.csv"),
        )
        .unwrap();
        assert!(text.starts_with(TASK_HEADER));
        assert_eq!(text.lines().count(), 5);

        spec.data_format = StatsFormat::Json;
        export_test_report(&spec, &[record()], "20240101000000").unwrap();
        let text =
            std::fs::read_to_string(dir.path().join("iore_test_20240101000000.json")).unwrap();
        let rows: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 4);
        assert!(rows[0].get("task_id").is_none());
        assert_eq!(rows[1]["action"], "write/read");
    }

    #[test]
    fn test_export_dir_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        std::fs::write(&file, b"").unwrap();
        assert!(check_export_dir(&file.to_string_lossy()).is_err());
        assert!(check_export_dir("/nonexistent/iore").is_err());
        assert!(check_export_dir(&dir.path().to_string_lossy()).is_ok());
    }

    #[test]
    fn test_timestamps() {
        let stamp = file_timestamp();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert!(!current_time_string().is_empty());
    }

    #[test]
    fn test_run_summary_serializes() {
        let doc = build_run_summary("began".into(), "iore -c exp.json", 4, &[record()]);
        let json = serde_json::to_string_pretty(&doc).unwrap();
        assert!(json.contains("\"writeReadTime\""));
        assert!(json.contains("\"bwMiB\""));
        assert!(json.contains("\"read\""));
    }
}
