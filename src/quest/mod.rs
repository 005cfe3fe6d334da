pub mod deriver;
pub mod lookup;
pub mod machine;

pub use deriver::{QUEST_SESSION_WORKER, SessionDeriver};
pub use lookup::{Quest, QuestAreaMap, QuestLookup};
pub use machine::{MachineOutcome, SessionMachine, SessionState};
