use futures::{StreamExt, future};
use tonic::Code;

use crate::{
    core::{
        domain::{ExecutionEnvironment, Runner, RunnerState, SubmissionFile},
        errors::RunnerError,
        traits::runner_pool::{EventStream, ExecutionEvent, RunnerPool},
    },
    grpc::{
        client::RunnerManagementClient,
        mappers::{acquire_error, acquire_request, stream_error},
        models::{AttachRequest, CopyFilesRequest, FileCopy, ReleaseRequest},
    },
};

#[derive(Clone, Debug)]
pub struct GrpcRunnerPool {
    client: RunnerManagementClient,
}

impl GrpcRunnerPool {
    pub fn new(client: RunnerManagementClient) -> Self {
        Self { client }
    }

    pub fn connect_lazy(url: &str) -> Result<Self, tonic::transport::Error> {
        Ok(Self::new(RunnerManagementClient::connect_lazy(url)?))
    }

    async fn copy_files(&self, runner: &Runner, files: &[SubmissionFile]) -> Result<(), RunnerError> {
        let request = CopyFilesRequest {
            runner_id: runner.id.clone(),
            files: files.iter().map(FileCopy::from).collect(),
        };

        self.client
            .copy_files(request)
            .await
            .map(|_| ())
            .map_err(|status| RunnerError::Allocation {
                msg: format!("copying files failed: {}", status.message()),
            })
    }
}

#[async_trait::async_trait]
impl RunnerPool for GrpcRunnerPool {
    #[tracing::instrument(skip(self, environment, files), fields(environment = environment.id))]
    async fn acquire(
        &self,
        principal: &str,
        environment: &ExecutionEnvironment,
        files: &[SubmissionFile],
    ) -> Result<Runner, RunnerError> {
        let response = self
            .client
            .acquire(acquire_request(principal, environment))
            .await
            .map_err(|status| acquire_error(status, environment.id))?;

        let mut runner = Runner::new(&response.runner_id, principal, environment.id);
        runner.transition(RunnerState::Allocating)?;

        if let Err(e) = self.copy_files(&runner, files).await {
            tracing::warn!("Releasing runner {} after failed setup: {}", runner.id, e);
            runner.transition(RunnerState::Failed)?;
            if let Err(release_error) = self.release(&runner).await {
                tracing::warn!("{}", release_error);
            }
            return Err(e);
        }

        runner.transition(RunnerState::Ready)?;
        tracing::debug!("Runner ready: {:?}", runner);
        Ok(runner)
    }

    #[tracing::instrument(skip(self), fields(runner = %runner.id))]
    async fn release(&self, runner: &Runner) -> Result<(), RunnerError> {
        let request = ReleaseRequest {
            runner_id: runner.id.clone(),
        };

        match self.client.release(request).await {
            Ok(_) => Ok(()),
            Err(status) if status.code() == Code::NotFound => {
                tracing::debug!("Runner already released");
                Ok(())
            }
            Err(status) => Err(RunnerError::Connection {
                msg: status.message().to_string(),
            }),
        }
    }

    #[tracing::instrument(skip(self), fields(runner = %runner.id))]
    async fn attach(&self, runner: &Runner, command: &str) -> Result<EventStream, RunnerError> {
        let request = AttachRequest {
            runner_id: runner.id.clone(),
            command: command.to_string(),
        };
        let runner_id = runner.id.clone();

        let stream = self
            .client
            .attach(request)
            .await
            .map_err(|status| stream_error(status, &runner_id))?;

        Ok(stream
            .filter_map(move |item| {
                future::ready(match item {
                    Ok(message) => message.event.map(|event| Ok(ExecutionEvent::from(event))),
                    Err(status) => Some(Err(stream_error(status, &runner_id))),
                })
            })
            .boxed())
    }
}
