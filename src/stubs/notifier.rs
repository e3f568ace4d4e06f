use crate::core::{errors::NotifyError, traits::sink::FullScoreNotifier};

/// Only logs; feedback threads live outside this service.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl FullScoreNotifier for LogNotifier {
    async fn full_score_reached(&self, exercise_id: u64, user_id: &str) -> Result<(), NotifyError> {
        tracing::info!(exercise_id, user_id, "Full score reached");
        Ok(())
    }
}
