use std::time::Duration;

use futures::StreamExt;
use tokio::{sync::mpsc::Sender, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::core::{
    domain::CapturedOutput,
    errors::{ExecutionError, RunnerError},
    traits::runner_pool::{EventStream, ExecutionEvent},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedExecution {
    pub exit_code: i32,
    pub output: CapturedOutput,
    pub duration: Duration,
}

/// Live channel to one command running inside a runner.
pub struct Connection {
    events: EventStream,
    cancel: CancellationToken,
    forward: Option<Sender<ExecutionEvent>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("forwarding", &self.forward.is_some())
            .finish()
    }
}

impl Connection {
    pub fn new(events: EventStream, cancel: CancellationToken) -> Self {
        Self {
            events,
            cancel,
            forward: None,
        }
    }

    /// Mirrors every event to `tx` as it arrives.
    pub fn forward_to(mut self, tx: Sender<ExecutionEvent>) -> Self {
        self.forward = Some(tx);
        self
    }

    /// Consumes events until exit, deadline or cancellation. The stream is
    /// dropped on return, which closes the remote command.
    pub async fn wait(mut self, deadline: Duration) -> Result<CompletedExecution, ExecutionError> {
        let started = Instant::now();
        let mut output = CapturedOutput::default();
        let timer = tokio::time::sleep(deadline);
        tokio::pin!(timer);

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Execution cancelled by client");
                    return Err(ExecutionError::Cancelled {
                        output,
                        duration: started.elapsed(),
                    });
                }
                _ = &mut timer => {
                    tracing::debug!("Execution exceeded deadline of {:?}", deadline);
                    return Err(ExecutionError::Timeout {
                        output,
                        duration: started.elapsed(),
                    });
                }
                event = self.events.next() => event,
            };

            let event = match event {
                Some(Ok(event)) => event,
                Some(Err(source)) => {
                    return Err(ExecutionError::Runner {
                        source,
                        output,
                        duration: started.elapsed(),
                    });
                }
                None => {
                    return Err(ExecutionError::Runner {
                        source: RunnerError::Connection {
                            msg: "event stream closed before exit".to_string(),
                        },
                        output,
                        duration: started.elapsed(),
                    });
                }
            };

            let receiver_gone = match &self.forward {
                Some(tx) => tx.send(event.clone()).await.is_err(),
                None => false,
            };
            if receiver_gone {
                tracing::debug!("Event receiver dropped, no longer forwarding");
                self.forward = None;
            }

            match event {
                ExecutionEvent::Stdout(chunk) => output.stdout.push_str(&chunk),
                ExecutionEvent::Stderr(chunk) => output.stderr.push_str(&chunk),
                ExecutionEvent::Exit(exit_code) => {
                    return Ok(CompletedExecution {
                        exit_code,
                        output,
                        duration: started.elapsed(),
                    });
                }
            }
        }
    }
}
