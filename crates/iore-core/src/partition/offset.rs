use crate::accounting::{self, Requests, ResolvedSizes};
use crate::comm::Collective;
use crate::error::{IoreError, Result};
use crate::prng::{sync_seed, PrngDistribution, PrngStream};
use crate::shuffle::shuffle;
use crate::test_spec::{Phase, TestSpec};
use crate::workload::{AccessPattern, FileShareMode, OffsetWorkload, SizeSource, WorkloadKind};

/// Request start offsets of one task for one phase.
pub type OffsetList = Vec<u64>;

/// Offsets plus the sizes they were computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetPhase {
    /// Task whose data is accessed (after read reordering).
    pub task_id: u32,
    pub offsets: OffsetList,
    pub sizes: ResolvedSizes,
}

impl OffsetPhase {
    pub fn requests(&self) -> Requests<'_> {
        Requests::new(&self.offsets, &self.sizes)
    }
}

/// Compute the offsets the calling task issues during `phase`.
pub fn prepare_offset_phase(
    test: &TestSpec,
    comm: &dyn Collective,
    phase: Phase,
) -> Result<OffsetPhase> {
    let oset = test
        .workload
        .offset()
        .ok_or_else(|| IoreError::Partition("workload is not offset-kind".into()))?;
    let num_tasks = test.num_tasks();
    let task_id = phase.effective_task_id(comm.task_id(), num_tasks, test.read_reorder_offset);
    partition_offsets(oset, num_tasks, test.file_mode, task_id, comm)
}

/// Copy of `test` whose distribution-backed size sources are sampled into
/// fixed per-task lists.
///
/// Collective over `comm`. Every phase and repetition that partitions the
/// returned copy sees the same sizes, so reads find what the writes left.
pub fn resolve_sizes(test: &TestSpec, comm: &dyn Collective) -> Result<TestSpec> {
    let mut resolved = test.clone();
    let num_tasks = resolved.workload.num_tasks;
    if let WorkloadKind::Offset(oset) = &mut resolved.workload.kind {
        if let SizeSource::Distribution(dist) = &oset.data_sizes {
            log::debug!("sampling data sizes from {dist}");
        }
        oset.data_sizes = SizeSource::List(materialize(&oset.data_sizes, num_tasks, comm)?);
        oset.req_sizes = SizeSource::List(materialize(&oset.req_sizes, num_tasks, comm)?);
    }
    Ok(resolved)
}

/// Offsets of `task_id` in a group of `num_tasks`.
///
/// `comm` is only used for seed broadcasts; every task of the group must
/// call this with the same workload so the broadcasts line up.
pub fn partition_offsets(
    oset: &OffsetWorkload,
    num_tasks: u32,
    file_mode: FileShareMode,
    task_id: u32,
    comm: &dyn Collective,
) -> Result<OffsetPhase> {
    let data_sizes = materialize(&oset.data_sizes, num_tasks, comm)?;
    let req_sizes = materialize(&oset.req_sizes, num_tasks, comm)?;

    let my_data_size = accounting::cyclic(&data_sizes, task_id);
    let my_req_size = accounting::cyclic(&req_sizes, task_id);
    let file_size = match file_mode {
        FileShareMode::PerTask => my_data_size,
        FileShareMode::Shared => accounting::cyclic_sum(&data_sizes, num_tasks)?,
    };
    let num_requests = accounting::num_requests(my_data_size, my_req_size)?;

    let sizes = ResolvedSizes {
        my_data_size,
        my_req_size,
        file_size,
        num_requests,
    };

    let offsets = match (file_mode, oset.access_pattern) {
        (FileShareMode::PerTask, pattern) => {
            let mut offsets: OffsetList = (0..num_requests).map(|k| k * my_req_size).collect();
            if pattern == AccessPattern::Random {
                shuffle(&mut offsets, sync_seed(comm))?;
            }
            offsets
        }
        (FileShareMode::Shared, AccessPattern::Sequential) => {
            let base = accounting::cyclic_sum(&data_sizes, task_id)?;
            (0..num_requests).map(|k| base + k * my_req_size).collect()
        }
        (FileShareMode::Shared, AccessPattern::Random) => {
            let seed = sync_seed(comm);
            interleave_shared(&data_sizes, &req_sizes, num_tasks, task_id, seed)?
        }
    };

    if offsets.is_empty() && my_data_size > 0 {
        return Err(IoreError::Partition(format!(
            "task {task_id}: no offsets for {my_data_size} bytes"
        )));
    }

    log::debug!(
        "task {}: {} requests, data {} req {} file {}",
        task_id,
        num_requests,
        my_data_size,
        my_req_size,
        file_size
    );

    Ok(OffsetPhase {
        task_id,
        offsets,
        sizes,
    })
}

/// Turn a size source into one size per task.
fn materialize(source: &SizeSource, num_tasks: u32, comm: &dyn Collective) -> Result<Vec<u64>> {
    match source {
        SizeSource::List(sizes) => Ok(sizes.clone()),
        SizeSource::Distribution(dist) => {
            let mut stream = PrngStream::new_sync(dist, comm)?;
            let sizes: Vec<u64> = (0..num_tasks).map(|_| stream.next_size()).collect();
            if let Some(i) = sizes.iter().position(|&s| s == 0) {
                return Err(IoreError::Partition(format!(
                    "distribution {dist} sampled a zero size for task {i}"
                )));
            }
            Ok(sizes)
        }
    }
}

/// Random interleaving of every task's requests in one shared file.
///
/// Replays the whole assignment and keeps the offsets that land on
/// `task_id`. Same seed, same layout on every task.
fn interleave_shared(
    data_sizes: &[u64],
    req_sizes: &[u64],
    num_tasks: u32,
    task_id: u32,
    seed: u32,
) -> Result<OffsetList> {
    let mut remaining: Vec<u64> = (0..num_tasks)
        .map(|t| accounting::cyclic(data_sizes, t))
        .collect();
    let reqs: Vec<u64> = (0..num_tasks)
        .map(|t| accounting::cyclic(req_sizes, t))
        .collect();

    for (t, (&data, &req)) in remaining.iter().zip(&reqs).enumerate() {
        if data > 0 && req == 0 {
            return Err(IoreError::Partition(format!(
                "task {t}: request size is zero with {data} bytes to move"
            )));
        }
    }

    let mut active: Vec<u32> = (0..num_tasks)
        .filter(|&t| remaining[t as usize] > 0)
        .collect();

    let mine = remaining.get(task_id as usize).copied().unwrap_or(0);
    let my_req = reqs.get(task_id as usize).copied().unwrap_or(0);
    let mut offsets = OffsetList::with_capacity(accounting::num_requests(mine, my_req)? as usize);

    let mut stream = PrngStream::new_seeded(&PrngDistribution::uniform(0.0, 1.0), seed)?;
    let mut cursor = 0u64;

    while !active.is_empty() {
        let n = active.len();
        let pick = ((stream.next_double() * n as f64) as usize).min(n - 1);
        let t = active[pick] as usize;

        if t == task_id as usize {
            offsets.push(cursor);
        }

        let step = reqs[t].min(remaining[t]);
        cursor = cursor.checked_add(step).ok_or_else(|| {
            IoreError::Partition("shared file layout overflows a 64-bit offset".into())
        })?;
        remaining[t] -= step;
        if remaining[t] == 0 {
            active.swap_remove(pick);
        }
    }

    Ok(offsets)
}
