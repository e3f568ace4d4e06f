use futures::stream::BoxStream;

use crate::core::{
    domain::{ExecutionEnvironment, Runner, SubmissionFile},
    errors::RunnerError,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionEvent {
    Stdout(String),
    Stderr(String),
    Exit(i32),
}

/// Events of one command, ordered within each stream.
pub type EventStream = BoxStream<'static, Result<ExecutionEvent, RunnerError>>;

/// Client of the external runner management service. The service owns the
/// sandboxes; implementations only hand out and take back handles.
#[async_trait::async_trait]
pub trait RunnerPool: std::fmt::Debug + Send + Sync {
    /// Requests a sandbox for `principal` and copies `files` into it. The
    /// returned runner is `Ready`.
    async fn acquire(
        &self,
        principal: &str,
        environment: &ExecutionEnvironment,
        files: &[SubmissionFile],
    ) -> Result<Runner, RunnerError>;

    /// Idempotent.
    async fn release(&self, runner: &Runner) -> Result<(), RunnerError>;

    async fn attach(&self, runner: &Runner, command: &str) -> Result<EventStream, RunnerError>;
}
