use crate::core::{
    domain::{ExecutionEnvironment, Runner, SubmissionFile},
    errors::RunnerError,
    traits::runner_pool::{EventStream, RunnerPool},
};

const DISABLED: &str = "runner management is disabled";

/// Every acquisition fails with `Allocation`, so callers take their usual
/// failure path without a sandbox behind it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullRunnerPool;

#[async_trait::async_trait]
impl RunnerPool for NullRunnerPool {
    #[tracing::instrument(skip(self, _files))]
    async fn acquire(
        &self,
        principal: &str,
        environment: &ExecutionEnvironment,
        _files: &[SubmissionFile],
    ) -> Result<Runner, RunnerError> {
        Err(RunnerError::Allocation {
            msg: DISABLED.to_string(),
        })
    }

    async fn release(&self, _runner: &Runner) -> Result<(), RunnerError> {
        Ok(())
    }

    async fn attach(&self, _runner: &Runner, _command: &str) -> Result<EventStream, RunnerError> {
        Err(RunnerError::Allocation {
            msg: DISABLED.to_string(),
        })
    }
}
