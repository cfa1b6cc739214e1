//! Per-task partitioning of offset and dataset workloads.

pub mod dataset;
pub mod offset;

pub use dataset::{dataset_block_to_offsets, decompose, prepare_dataset_phase, DatasetBlock, DatasetPhase};
pub use offset::{partition_offsets, prepare_offset_phase, resolve_sizes, OffsetList, OffsetPhase};
