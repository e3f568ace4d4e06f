use uuid::Uuid;

use crate::core::{
    domain::{StructuredError, Testrun},
    errors::{NotifyError, SinkError},
};

/// Append-only store for execution records. Records are never updated.
#[mockall::automock]
#[async_trait::async_trait]
pub trait TestrunSink: std::fmt::Debug + Send + Sync {
    async fn insert_testrun(&self, testrun: Testrun) -> Result<(), SinkError>;

    async fn insert_structured_errors(
        &self,
        submission_id: Uuid,
        errors: Vec<StructuredError>,
    ) -> Result<(), SinkError>;
}

/// Marks open feedback threads of a learner as resolved once the exercise is
/// fully solved.
#[mockall::automock]
#[async_trait::async_trait]
pub trait FullScoreNotifier: std::fmt::Debug + Send + Sync {
    async fn full_score_reached(&self, exercise_id: u64, user_id: &str) -> Result<(), NotifyError>;
}
