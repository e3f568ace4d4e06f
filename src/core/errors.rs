use std::time::Duration;

use crate::core::domain::{CapturedOutput, ExecutionStatus, RunnerState};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    /// The pool has no free capacity. Callers may retry later.
    #[error("no runner available for execution environment {execution_environment_id}")]
    Depleted { execution_environment_id: u64 },
    #[error("runner allocation failed: {msg}")]
    Allocation { msg: String },
    #[error("runner {runner_id} is already executing a command")]
    RunnerInUse { runner_id: String },
    #[error("execution ran out of memory")]
    OutOfMemory,
    #[error("connection to runner lost: {msg}")]
    Connection { msg: String },
    #[error("runner {runner_id} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        runner_id: String,
        from: RunnerState,
        to: RunnerState,
    },
}

/// Failure of a single command. Every variant keeps what was captured before
/// the failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution exceeded its deadline after {duration:?}")]
    Timeout {
        output: CapturedOutput,
        duration: Duration,
    },
    #[error("execution was cancelled after {duration:?}")]
    Cancelled {
        output: CapturedOutput,
        duration: Duration,
    },
    #[error("execution failed after {duration:?}: {source}")]
    Runner {
        source: RunnerError,
        output: CapturedOutput,
        duration: Duration,
    },
}

impl ExecutionError {
    pub fn output(&self) -> &CapturedOutput {
        match self {
            ExecutionError::Timeout { output, .. }
            | ExecutionError::Cancelled { output, .. }
            | ExecutionError::Runner { output, .. } => output,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            ExecutionError::Timeout { duration, .. }
            | ExecutionError::Cancelled { duration, .. }
            | ExecutionError::Runner { duration, .. } => *duration,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            ExecutionError::Timeout { .. } => ExecutionStatus::Timeout,
            ExecutionError::Cancelled { .. } => ExecutionStatus::TerminatedByClient,
            ExecutionError::Runner { source, .. } => match source {
                RunnerError::Depleted { .. } => ExecutionStatus::ContainerDepleted,
                RunnerError::OutOfMemory => ExecutionStatus::OutOfMemory,
                RunnerError::RunnerInUse { .. } => ExecutionStatus::RunnerInUse,
                _ => ExecutionStatus::Failed,
            },
        }
    }
}

/// Configuration problems detected before any runner is requested.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SetupError {
    #[error("unsupported testing framework: {name}")]
    UnsupportedFramework { name: String },
    #[error("execution environment {environment} must define test command and testing framework together")]
    IncompleteTestSetup { environment: String },
    #[error("execution environment {environment} has no test setup")]
    MissingTestSetup { environment: String },
    #[error("invalid pattern in error template {template}: {msg}")]
    InvalidTemplate { template: String, msg: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("could not acquire a runner after waiting {waiting_duration:?}: {source}")]
    Acquisition {
        source: RunnerError,
        waiting_duration: Duration,
    },
    #[error("file {name} is not part of the submission")]
    UnknownFile { name: String },
    #[error("execution of {file} failed after waiting {waiting_duration:?}: {source}")]
    Execution {
        file: String,
        source: ExecutionError,
        waiting_duration: Duration,
    },
}

/// Non-fatal: the diagnostic keeps its original text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslationDegraded {
    #[error("invalid rewrite pattern {key}: {msg}")]
    InvalidPattern { key: String, msg: String },
    #[error("rewrite pattern {key} does not match the diagnostic")]
    NoMatch { key: String },
    #[error("replacement {key} references unknown capture {capture}")]
    MissingCapture { key: String, capture: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    #[error("testrun store unavailable: {msg}")]
    Unavailable { msg: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("feedback threads could not be updated: {msg}")]
    Failed { msg: String },
}
