pub mod accounting;
pub mod aligned_buf;
pub mod backend;
pub mod backend_options;
pub mod comm;
pub mod config;
pub mod error;
pub mod experiment;
pub mod handle;
pub mod partition;
pub mod prng;
pub mod recorder;
pub mod shuffle;
pub mod test_spec;
pub mod workload;

// Re-export primary types for convenience
pub use aligned_buf::{AlignedBuffer, page_size};
pub use backend::{Backend, BackendFactory, BackendKind, BackendRegistry, BackendSpec};
pub use backend_options::{BackendOptions, OptionValue, extract_backend_options};
pub use comm::{Collective, LocalComm, MASTER_TASK};
pub use error::{IoreError, Result};
pub use experiment::{ExperimentSpec, RunOrder, RunSpec, StatsExporterSpec, StatsFormat};
pub use handle::{FileHandle, OpenFlags};
pub use partition::{
    DatasetBlock, DatasetPhase, OffsetList, OffsetPhase, dataset_block_to_offsets,
    prepare_dataset_phase, prepare_offset_phase, resolve_sizes,
};
pub use prng::{PrngDistribution, PrngKind, PrngStream};
pub use recorder::{Action, Recorder, TestRecord, now};
pub use test_spec::{Phase, SequenceId, TestFile, TestSpec};
pub use workload::{FileShareMode, Workload, WorkloadKind};
