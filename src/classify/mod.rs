pub mod job;
pub mod score;

pub use job::{ACTIVITY_CLASSIFIER, ActivityClassifier};
pub use score::{ActivityScore, ScoreModel, average_session_minutes};
