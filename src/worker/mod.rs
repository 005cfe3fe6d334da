pub mod cursor;
pub mod runner;
pub mod shard;

pub use cursor::{Cursor, CursorKey, CursorUpdate, Lane};
pub use runner::{
    BatchJob, BatchReport, BatchRunner, BatchWorker, RunSummary, StopHandle, StopSignal,
    stop_channel,
};
pub use shard::{ShardSpec, shard_for};
