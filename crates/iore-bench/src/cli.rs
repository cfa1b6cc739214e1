use std::path::PathBuf;

use clap::Parser;
use iore_core::config;
use iore_core::error::Result;
use iore_core::experiment::ExperimentSpec;

/// IORE: MPI-parallel I/O benchmark driven by an experiment file.
///
/// Backend options are passed as `--posix.key=value` or
/// `--cstream.key=value` and apply to every test using that backend.
#[derive(Parser, Debug)]
#[command(name = "iore", about = "Parallel I/O benchmark with partitioned workloads")]
pub struct CliArgs {
    /// Experiment file (JSON); without one a single default test runs
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Verbosity (repeat for higher levels)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write a JSON summary of the run to this file (task 0 only)
    #[arg(long = "json-file")]
    pub json_file: Option<String>,
}

impl CliArgs {
    /// Experiment described by the command line.
    pub fn experiment(&self) -> Result<ExperimentSpec> {
        match &self.config {
            Some(path) => config::load_experiment(path),
            None => Ok(ExperimentSpec::default()),
        }
    }

    /// Log filter used when `RUST_LOG` is unset.
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
