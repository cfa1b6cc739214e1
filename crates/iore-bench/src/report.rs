use iore_core::comm::MASTER_TASK;
use iore_core::recorder::{Action, NUM_ACTIONS, TestRecord};
use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

const KIBIBYTE: f64 = 1024.0;
const MEBIBYTE: f64 = KIBIBYTE * 1024.0;
const GIBIBYTE: f64 = MEBIBYTE * 1024.0;
const TEBIBYTE: f64 = GIBIBYTE * 1024.0;
const PEBIBYTE: f64 = TEBIBYTE * 1024.0;

fn reduce_f64(value: f64, op: SystemOperation, comm: &SimpleCommunicator) -> f64 {
    let root = comm.process_at_rank(MASTER_TASK as i32);
    let mut out = 0.0f64;
    if comm.rank() == MASTER_TASK as i32 {
        root.reduce_into_root(&value, &mut out, op);
    } else {
        root.reduce_into(&value, op);
    }
    out
}

fn reduce_sum_u64(value: u64, comm: &SimpleCommunicator) -> u64 {
    let root = comm.process_at_rank(MASTER_TASK as i32);
    let mut out = 0u64;
    if comm.rank() == MASTER_TASK as i32 {
        root.reduce_into_root(&value, &mut out, SystemOperation::sum());
    } else {
        root.reduce_into(&value, SystemOperation::sum());
    }
    out
}

/// Reduce a task record over the test group.
///
/// Starts use MIN, stops use MAX and data sizes are summed. Only the
/// master task gets the reduced record.
pub fn reduce_record(record: &TestRecord, comm: &SimpleCommunicator) -> Option<TestRecord> {
    let (local_starts, local_stops) = (record.starts(), record.stops());
    let mut starts = [0.0f64; NUM_ACTIONS];
    let mut stops = [0.0f64; NUM_ACTIONS];
    for i in 0..NUM_ACTIONS {
        starts[i] = reduce_f64(local_starts[i], SystemOperation::min(), comm);
        stops[i] = reduce_f64(local_stops[i], SystemOperation::max(), comm);
    }
    let data_size = reduce_sum_u64(record.data_size, comm);

    (comm.rank() == MASTER_TASK as i32)
        .then(|| TestRecord::from_reduced(record.seq, record.phase, starts, stops, data_size))
}

/// Wall time between the earliest `start` and the latest `stop` of the
/// group, on the master task.
pub fn reduce_span(start: f64, stop: f64, comm: &SimpleCommunicator) -> Option<f64> {
    let min_start = reduce_f64(start, SystemOperation::min(), comm);
    let max_stop = reduce_f64(stop, SystemOperation::max(), comm);
    (comm.rank() == MASTER_TASK as i32).then_some(max_stop - min_start)
}

/// Bytes per second in binary units, e.g. `"  1.500 MiB/s"`.
pub fn format_throughput(bytes_per_sec: f64) -> String {
    let (div, unit) = if bytes_per_sec >= PEBIBYTE {
        (PEBIBYTE, "PiB/s")
    } else if bytes_per_sec >= TEBIBYTE {
        (TEBIBYTE, "TiB/s")
    } else if bytes_per_sec >= GIBIBYTE {
        (GIBIBYTE, "GiB/s")
    } else if bytes_per_sec >= MEBIBYTE {
        (MEBIBYTE, "MiB/s")
    } else if bytes_per_sec >= KIBIBYTE {
        (KIBIBYTE, "KiB/s")
    } else {
        (1.0, "B/s")
    };
    format!("{:7.3} {}", bytes_per_sec / div, unit)
}

pub fn repetition_header(run_id: u32, repetition: u32) -> String {
    format!(
        ">> Run #{run_id}, repetition #{repetition}:\n{:<5} {:>10} {:>10} {:>10} {:>10} {:>10} {:>15}",
        "test", "cr/op (s)", "wr/rd (s)", "close (s)", "rm (s)", "total (s)", "tput"
    )
}

/// One summary row of a reduced test record.
pub fn summary_line(record: &TestRecord) -> String {
    let total = record.total_time();
    let tput = if total > 0.0 {
        record.data_size as f64 / total
    } else {
        0.0
    };
    format!(
        "{:<5} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>15}",
        record.phase.label(),
        record.latency(Action::CreateOpen),
        record.latency(Action::WriteRead),
        record.latency(Action::Close),
        record.latency(Action::Remove),
        total,
        format_throughput(tput)
    )
}
