use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Mutex, MutexGuard, mpsc::Sender},
    time::Instant,
};
use tokio_util::sync::CancellationToken;

use crate::core::{
    connection::{CompletedExecution, Connection},
    domain::{CapturedOutput, Runner, RunnerState},
    errors::{ExecutionError, RunnerError},
    traits::runner_pool::{ExecutionEvent, RunnerPool},
};

/// Stand-in deadline for limits too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Shared access to one acquired runner. Commands are serialized: a runner
/// never has more than one attached connection.
#[derive(Debug)]
pub struct RunnerHandle {
    pool: Arc<dyn RunnerPool>,
    runner: Mutex<Runner>,
}

/// Exclusive use of the runner until dropped.
#[derive(Debug)]
pub struct RunnerLease<'a> {
    pool: &'a Arc<dyn RunnerPool>,
    runner: MutexGuard<'a, Runner>,
}

impl RunnerHandle {
    pub fn new(pool: Arc<dyn RunnerPool>, runner: Runner) -> Self {
        Self {
            pool,
            runner: Mutex::new(runner),
        }
    }

    pub async fn lease(&self) -> RunnerLease<'_> {
        RunnerLease {
            pool: &self.pool,
            runner: self.runner.lock().await,
        }
    }

    pub async fn state(&self) -> RunnerState {
        self.runner.lock().await.state()
    }

    /// Hands the runner back to the pool. Safe to call repeatedly and after
    /// failed executions.
    pub async fn release(&self) {
        let mut runner = self.runner.lock().await;
        if runner.state() == RunnerState::Released {
            return;
        }

        if let Err(e) = self.pool.release(&runner).await {
            tracing::warn!(runner = %runner.id, "Failed to release runner: {}", e);
        }
        if let Err(e) = runner.transition(RunnerState::Released) {
            tracing::warn!("{}", e);
        }
    }
}

impl RunnerLease<'_> {
    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    #[tracing::instrument(skip(self, deadline, cancel, forward), fields(runner = %self.runner.id))]
    pub async fn execute(
        &mut self,
        command: &str,
        deadline: Duration,
        cancel: CancellationToken,
        forward: Option<Sender<ExecutionEvent>>,
    ) -> Result<CompletedExecution, ExecutionError> {
        let started = Instant::now();
        if let Err(source) = self.runner.transition(RunnerState::Executing) {
            return Err(ExecutionError::Runner {
                source,
                output: CapturedOutput::default(),
                duration: Duration::ZERO,
            });
        }

        let deadline_at = started
            .checked_add(deadline)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let attached = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled {
                output: CapturedOutput::default(),
                duration: started.elapsed(),
            }),
            _ = tokio::time::sleep_until(deadline_at) => Err(ExecutionError::Timeout {
                output: CapturedOutput::default(),
                duration: started.elapsed(),
            }),
            attached = self.pool.attach(&self.runner, command) => attached.map_err(|source| ExecutionError::Runner {
                source,
                output: CapturedOutput::default(),
                duration: started.elapsed(),
            }),
        };

        let result = match attached {
            Ok(events) => {
                let connection = Connection::new(events, cancel);
                let connection = match forward {
                    Some(tx) => connection.forward_to(tx),
                    None => connection,
                };
                // The deadline covers the whole command, attach included.
                connection
                    .wait(deadline_at.saturating_duration_since(Instant::now()))
                    .await
            }
            Err(e) => Err(e),
        };

        let next = match &result {
            Ok(_) => RunnerState::Completed,
            Err(ExecutionError::Timeout { .. }) => RunnerState::TimedOut,
            Err(ExecutionError::Runner {
                source: RunnerError::Depleted { .. },
                ..
            }) => RunnerState::Depleted,
            Err(_) => RunnerState::Failed,
        };
        if let Err(e) = self.runner.transition(next) {
            tracing::warn!("{}", e);
        }

        tracing::debug!("Execution result: {:?}", result);
        result
    }
}
