pub mod batch;
pub mod checkpoint;
pub mod engine;
pub mod error;
pub mod sink;
pub mod window;

pub use batch::{DiscoveryBatch, SlotFetch};
pub use checkpoint::{Checkpoint, CheckpointCodec, CheckpointEntry, CheckpointStore, FileCheckpointStore};
pub use engine::{DiscoveryEngine, DiscoveryOptions, EngineState};
pub use error::{CheckpointError, DiscoveryError};
pub use sink::{BatchSink, DeliverySummary, DirectorySink};
pub use window::{lock_window, new_shared_window, SharedSlotWindow, SlotWindow};
