pub mod engine;
pub mod fields;
pub mod partition;

pub use engine::{DiffEngine, PartitionOutcome, PushOutcome};
pub use fields::FieldDiff;
pub use partition::{PartitionDiff, diff_partition};
