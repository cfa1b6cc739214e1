mod cli;
mod export;
mod mpi_comm;
mod report;
mod runner;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Env;
use iore_backend_cstream::CstreamBackend;
use iore_backend_mpiio::MpiioBackend;
use iore_backend_posix::PosixBackend;
use iore_core::{
    Backend, BackendKind, BackendRegistry, Collective, ExperimentSpec, IoreError, MASTER_TASK,
    OptionValue, StatsExporterSpec, extract_backend_options,
};
use log::{Level, LevelFilter};
use mpi::traits::*;

use cli::CliArgs;
use mpi_comm::MpiComm;
use runner::{Outcome, Runner};

fn main() -> ExitCode {
    let Some(universe) = mpi::initialize() else {
        eprintln!("[IORE Fatal]: MPI could not be initialized");
        return ExitCode::FAILURE;
    };
    let world = MpiComm::new(universe.world());
    let task_id = world.task_id();

    let raw_args: Vec<String> = std::env::args().collect();
    let command_line = raw_args.join(" ");
    let (filtered_args, backend_options) = extract_backend_options(raw_args);
    let args = CliArgs::parse_from(filtered_args);

    init_logging(task_id, args.default_log_filter());

    let began = export::current_time_string();
    let mut experiment = match args.experiment() {
        Ok(exp) => exp,
        Err(e) => return config_failure(&world, &e),
    };
    // Every task validates the same document, so they all fail together.
    if let Err(e) = experiment.validate(world.num_tasks()) {
        return config_failure(&world, &e);
    }

    let registry = backend_registry();
    if let Some(missing) = experiment
        .runs
        .iter()
        .map(|r| r.test.backend.kind)
        .find(|&kind| !registry.contains(kind))
    {
        let err = IoreError::config("afio", format!("backend '{missing}' is not available"));
        return config_failure(&world, &err);
    }
    for kind in registry.kinds() {
        for (key, value) in backend_options.for_prefix(kind.label()) {
            match value {
                OptionValue::Flag => log::info!("  {kind}.{key} = true"),
                OptionValue::Str(s) => log::info!("  {kind}.{key} = {s}"),
            }
        }
    }

    let runner = Runner::new(&world, &registry, &backend_options, args.verbose);
    let outcome = match runner.run_experiment(&experiment) {
        Ok(outcome) => outcome,
        Err(e) => fatal(&world, &e),
    };

    if let Some(spec) = &experiment.stats_exporter {
        if let Err(e) = export_stats(spec, &world, &outcome) {
            fatal(&world, &e);
        }
    }

    if world.is_master() {
        if let Some(path) = &args.json_file {
            write_run_summary(path, began, &command_line, &experiment, &outcome);
        }
    }

    world.barrier();
    ExitCode::SUCCESS
}

fn init_logging(task_id: u32, default_filter: &str) {
    let mut builder = if task_id == MASTER_TASK {
        env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(LevelFilter::Error);
        builder
    };
    let _ = builder
        .format(move |buf, record| match record.level() {
            Level::Error => writeln!(buf, "[IORE Error]: Task {task_id}: {}", record.args()),
            Level::Warn => writeln!(buf, "[IORE Warn]: {}", record.args()),
            Level::Info => writeln!(buf, "{}", record.args()),
            Level::Debug | Level::Trace => {
                writeln!(buf, "[IORE Debug]: Task {task_id}: {}", record.args())
            }
        })
        .try_init();
}

fn new_posix() -> Box<dyn Backend> {
    Box::new(PosixBackend::new())
}

fn new_cstream() -> Box<dyn Backend> {
    Box::new(CstreamBackend::new())
}

fn new_mpiio() -> Box<dyn Backend> {
    Box::new(MpiioBackend::new())
}

fn backend_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(BackendKind::Posix, new_posix);
    registry.register(BackendKind::Cstream, new_cstream);
    registry.register(BackendKind::Mpiio, new_mpiio);
    registry
}

fn config_failure(world: &MpiComm, err: &IoreError) -> ExitCode {
    if world.is_master() {
        log::error!("{err}");
    }
    world.barrier();
    ExitCode::FAILURE
}

/// Report an unrecoverable error and take the whole job down.
fn fatal(world: &MpiComm, err: &IoreError) -> ! {
    eprintln!("[IORE Fatal]: Task {}: {err}", world.task_id());
    world.raw().abort(1)
}

/// Write per-task reports everywhere and the test report on the master.
///
/// The master's outcome is broadcast so every task fails together.
fn export_stats(spec: &StatsExporterSpec, world: &MpiComm, outcome: &Outcome) -> Result<(), IoreError> {
    let stamp = export::file_timestamp();
    if spec.report_task {
        export::export_task_report(spec, world.task_id(), &outcome.task_records, &stamp)?;
    }

    let mut status = 0u32;
    if world.is_master() && spec.report_test {
        if let Err(e) = export::export_test_report(spec, &outcome.test_records, &stamp) {
            log::error!("test report: {e}");
            status = 1;
        }
    }
    if world.broadcast_u32(status, MASTER_TASK) != 0 {
        return Err(IoreError::config("stats_exporter", "test report could not be written"));
    }
    Ok(())
}

fn write_run_summary(
    path: &str,
    began: String,
    command_line: &str,
    experiment: &ExperimentSpec,
    outcome: &Outcome,
) {
    let num_tasks = experiment
        .runs
        .iter()
        .map(|r| r.test.num_tasks())
        .max()
        .unwrap_or(0);
    let doc = export::build_run_summary(began, command_line, num_tasks, &outcome.test_records);
    match serde_json::to_string_pretty(&doc) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                log::error!("failed to write JSON file '{path}': {e}");
            }
        }
        Err(e) => log::error!("failed to serialize run summary: {e}"),
    }
}
