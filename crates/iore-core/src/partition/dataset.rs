use crate::comm::Collective;
use crate::error::{IoreError, Result};
use crate::test_spec::{Phase, TestSpec};
use crate::workload::{DatasetShape, DatasetWorkload, FileShareMode};

/// Sub-block of the global array owned by one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetBlock {
    pub task_id: u32,
    pub g_dim_sizes: Vec<u32>,
    pub dim_sizes: Vec<u32>,
    pub start_coord: Vec<u32>,
    /// Bytes per cell.
    pub vars_size: u64,
    /// Bytes in the block.
    pub size: u64,
}

impl DatasetBlock {
    /// Contiguous bytes along the last dimension.
    pub fn row_len(&self) -> u64 {
        let last = self.dim_sizes.last().copied().unwrap_or(0);
        u64::from(last) * self.vars_size
    }

    /// Rows in the block: the product of every extent except the last.
    pub fn num_rows(&self) -> u64 {
        match self.dim_sizes.split_last() {
            Some((_, outer)) => outer.iter().map(|&d| u64::from(d)).product(),
            None => 0,
        }
    }
}

/// Block plus the file offset of each of its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPhase {
    pub block: DatasetBlock,
    pub offsets: Vec<u64>,
}

/// Block of `task_id` in the division grid.
///
/// `task_id` is unravelled in mixed radix over `dim_divs`, first dimension
/// fastest. Blocks are `ceil(size / div)` long; the last one along a
/// dimension takes the remainder.
pub fn decompose(dataset: &DatasetWorkload, task_id: u32) -> Result<DatasetBlock> {
    let cart = match &dataset.shape {
        DatasetShape::Cartesian(cart) => cart,
    };
    if cart.dim_sizes.is_empty() || cart.dim_sizes.len() != cart.dim_divs.len() {
        return Err(IoreError::Partition(format!(
            "cartesian dataset with {} sizes and {} divisions",
            cart.dim_sizes.len(),
            cart.dim_divs.len()
        )));
    }

    let vars_size = dataset.vars_size();
    let n = cart.num_dims();
    let mut dim_sizes = Vec::with_capacity(n);
    let mut start_coord = Vec::with_capacity(n);
    let mut size = vars_size;
    let mut factor = 1u64;

    for (i, (&g, &div)) in cart.dim_sizes.iter().zip(&cart.dim_divs).enumerate() {
        if div == 0 {
            return Err(IoreError::Partition(format!("dimension {i} has zero divisions")));
        }
        if i > 0 {
            factor *= u64::from(cart.dim_divs[i - 1]);
        }
        let max = g.div_ceil(div);
        let coord = ((u64::from(task_id) / factor) % u64::from(div)) as u32;
        let start = coord * max;
        let extent = max.min(g.saturating_sub(start));

        start_coord.push(start);
        dim_sizes.push(extent);
        size *= u64::from(extent);
    }

    Ok(DatasetBlock {
        task_id,
        g_dim_sizes: cart.dim_sizes.clone(),
        dim_sizes,
        start_coord,
        vars_size,
        size,
    })
}

/// File offset of every row of `block`, in row-major order.
pub fn dataset_block_to_offsets(block: &DatasetBlock, file_mode: FileShareMode) -> Vec<u64> {
    let n = block.dim_sizes.len();
    if n == 0 {
        return Vec::new();
    }
    let rows = block.num_rows();

    match file_mode {
        FileShareMode::PerTask => {
            let row_len = block.row_len();
            (0..rows).map(|k| k * row_len).collect()
        }
        FileShareMode::Shared => {
            // strides[d] = product of global extents after d
            let mut strides = vec![1u64; n];
            for d in (0..n - 1).rev() {
                strides[d] = strides[d + 1] * u64::from(block.g_dim_sizes[d + 1]);
            }

            let mut coord = block.start_coord.clone();
            let mut offsets = Vec::with_capacity(rows as usize);
            for _ in 0..rows {
                let cell: u64 = coord
                    .iter()
                    .zip(&strides)
                    .map(|(&c, &s)| u64::from(c) * s)
                    .sum();
                offsets.push(cell * block.vars_size);

                // odometer over the outer dimensions, last outer one fastest
                let mut d = n - 1;
                while d > 0 {
                    d -= 1;
                    coord[d] += 1;
                    if coord[d] < block.start_coord[d] + block.dim_sizes[d] {
                        break;
                    }
                    coord[d] = block.start_coord[d];
                }
            }
            offsets
        }
    }
}

/// Block and row offsets the calling task accesses during `phase`.
pub fn prepare_dataset_phase(
    test: &TestSpec,
    comm: &dyn Collective,
    phase: Phase,
) -> Result<DatasetPhase> {
    let dataset = test
        .workload
        .dataset()
        .ok_or_else(|| IoreError::Partition("workload is not dataset-kind".into()))?;
    let task_id = phase.effective_task_id(comm.task_id(), test.num_tasks(), test.read_reorder_offset);

    let block = decompose(dataset, task_id)?;
    let offsets = dataset_block_to_offsets(&block, test.file_mode);
    if offsets.is_empty() && block.size > 0 {
        return Err(IoreError::Partition(format!(
            "task {task_id}: no offsets for a {} byte block",
            block.size
        )));
    }

    log::debug!(
        "task {}: block start {:?} extent {:?}, {} rows of {} bytes",
        task_id,
        block.start_coord,
        block.dim_sizes,
        offsets.len(),
        block.row_len()
    );

    Ok(DatasetPhase { block, offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;
    use crate::workload::{CartesianDataset, VarType, WorkloadKind};

    fn dataset(sizes: &[u32], divs: &[u32], vars: &[VarType]) -> DatasetWorkload {
        DatasetWorkload {
            var_types: vars.to_vec(),
            shape: DatasetShape::Cartesian(CartesianDataset {
                dim_sizes: sizes.to_vec(),
                dim_divs: divs.to_vec(),
            }),
        }
    }

    /// Cells covered by every block, checked for overlaps and completeness.
    fn assert_blocks_tile(sizes: &[u32], divs: &[u32]) {
        let d = dataset(sizes, divs, &[VarType::Char]);
        let num_tasks: u32 = divs.iter().product();
        let total: usize = sizes.iter().map(|&s| s as usize).product();
        let mut owner = vec![u32::MAX; total];

        for t in 0..num_tasks {
            let block = decompose(&d, t).unwrap();
            let cells: usize = block.dim_sizes.iter().map(|&s| s as usize).product();
            assert_eq!(block.size, cells as u64);

            let mut idx = vec![0u32; sizes.len()];
            for _ in 0..cells {
                let mut flat = 0usize;
                for k in 0..sizes.len() {
                    flat = flat * sizes[k] as usize + (block.start_coord[k] + idx[k]) as usize;
                }
                assert_eq!(owner[flat], u32::MAX, "cell {flat} assigned twice");
                owner[flat] = t;

                for k in (0..sizes.len()).rev() {
                    idx[k] += 1;
                    if idx[k] < block.dim_sizes[k] {
                        break;
                    }
                    idx[k] = 0;
                }
            }
        }
        assert!(owner.iter().all(|&o| o != u32::MAX));
    }

    #[test]
    fn test_decompose_two_by_two() {
        let d = dataset(&[8, 16], &[2, 2], &[VarType::Double]);

        let b0 = decompose(&d, 0).unwrap();
        assert_eq!(b0.start_coord, vec![0, 0]);
        assert_eq!(b0.dim_sizes, vec![4, 8]);
        assert_eq!(b0.size, 8 * 4 * 8);

        let b1 = decompose(&d, 1).unwrap();
        assert_eq!(b1.start_coord, vec![4, 0]);

        let b3 = decompose(&d, 3).unwrap();
        assert_eq!(b3.start_coord, vec![4, 8]);
        assert_eq!(b3.dim_sizes, vec![4, 8]);
    }

    #[test]
    fn test_decompose_remainder_blocks() {
        let d = dataset(&[10], &[3], &[VarType::Integer]);
        let extents: Vec<u32> = (0..3).map(|t| decompose(&d, t).unwrap().dim_sizes[0]).collect();
        assert_eq!(extents, vec![4, 4, 2]);
        assert_eq!(decompose(&d, 2).unwrap().start_coord, vec![8]);
    }

    #[test]
    fn test_blocks_tile_global_array() {
        assert_blocks_tile(&[8, 16], &[2, 2]);
        assert_blocks_tile(&[7, 5, 9], &[3, 1, 2]);
        assert_blocks_tile(&[13], &[4]);
        assert_blocks_tile(&[3, 3, 3, 3], &[3, 1, 3, 1]);
    }

    #[test]
    fn test_offsets_shared_row_major() {
        let d = dataset(&[4, 6], &[2, 2], &[VarType::Char, VarType::Float]);
        let b3 = decompose(&d, 3).unwrap();
        assert_eq!(b3.start_coord, vec![2, 3]);
        let offsets = dataset_block_to_offsets(&b3, FileShareMode::Shared);
        // rows 2 and 3, starting at column 3, 5 bytes per cell
        assert_eq!(offsets, vec![(2 * 6 + 3) * 5, (3 * 6 + 3) * 5]);
        assert_eq!(b3.row_len(), 3 * 5);
    }

    #[test]
    fn test_offsets_shared_three_dims() {
        let d = dataset(&[2, 4, 4], &[1, 2, 2], &[VarType::Char]);
        let b = decompose(&d, 3).unwrap();
        assert_eq!(b.start_coord, vec![0, 2, 2]);
        let offsets = dataset_block_to_offsets(&b, FileShareMode::Shared);
        assert_eq!(offsets, vec![10, 14, 26, 30]);
    }

    #[test]
    fn test_offsets_shared_cover_file() {
        let d = dataset(&[6, 10], &[3, 2], &[VarType::Long]);
        let mut ranges = Vec::new();
        for t in 0..6 {
            let b = decompose(&d, t).unwrap();
            for off in dataset_block_to_offsets(&b, FileShareMode::Shared) {
                ranges.push((off, b.row_len()));
            }
        }
        ranges.sort_unstable();
        let covered: u64 = ranges.iter().map(|r| r.1).sum();
        assert_eq!(covered, 6 * 10 * 8);
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn test_offsets_per_task_contiguous() {
        let d = dataset(&[8, 16], &[2, 2], &[VarType::Double]);
        let b = decompose(&d, 2).unwrap();
        let offsets = dataset_block_to_offsets(&b, FileShareMode::PerTask);
        assert_eq!(offsets, (0..4u64).map(|k| k * 8 * 8).collect::<Vec<_>>());
    }

    #[test]
    fn test_one_dimension_single_offset() {
        let d = dataset(&[100], &[4], &[VarType::Char]);
        let b = decompose(&d, 2).unwrap();
        assert_eq!(dataset_block_to_offsets(&b, FileShareMode::Shared), vec![50]);
        assert_eq!(dataset_block_to_offsets(&b, FileShareMode::PerTask), vec![0]);
    }

    #[test]
    fn test_prepare_dataset_phase_reorders_reads() {
        let mut test = TestSpec::default();
        test.workload.num_tasks = 4;
        test.read_reorder_offset = 2;
        test.workload.kind = WorkloadKind::Dataset(dataset(&[8, 16], &[2, 2], &[VarType::Double]));

        let comm = LocalComm::new(1, 4);
        let write = prepare_dataset_phase(&test, &comm, Phase::Write).unwrap();
        let read = prepare_dataset_phase(&test, &comm, Phase::Read).unwrap();
        assert_eq!(write.block.task_id, 1);
        assert_eq!(read.block.task_id, 3);
        assert_eq!(read.block.start_coord, vec![4, 8]);
        assert_eq!(read.offsets.len(), 4);
    }
}
