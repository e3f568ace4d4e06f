use tonic::{Code, Status};

use crate::{
    core::{
        domain::{ExecutionEnvironment, SubmissionFile},
        errors::RunnerError,
        traits::runner_pool,
    },
    grpc::models::{self, execution_event},
};

pub fn acquire_error(status: Status, execution_environment_id: u64) -> RunnerError {
    match status.code() {
        Code::ResourceExhausted => RunnerError::Depleted {
            execution_environment_id,
        },
        _ => RunnerError::Allocation {
            msg: status.message().to_string(),
        },
    }
}

pub fn stream_error(status: Status, runner_id: &str) -> RunnerError {
    match status.code() {
        Code::ResourceExhausted => RunnerError::OutOfMemory,
        Code::FailedPrecondition => RunnerError::RunnerInUse {
            runner_id: runner_id.to_string(),
        },
        _ => RunnerError::Connection {
            msg: status.message().to_string(),
        },
    }
}

pub fn acquire_request(principal: &str, environment: &ExecutionEnvironment) -> models::AcquireRequest {
    models::AcquireRequest {
        principal: principal.to_string(),
        execution_environment_id: environment.id,
        image: environment.docker_image.clone(),
        execution_timeout: prost_types::Duration::try_from(environment.permitted_execution_time()).ok(),
    }
}

impl From<&SubmissionFile> for models::FileCopy {
    fn from(file: &SubmissionFile) -> Self {
        Self {
            path: file.filepath(),
            content: file.content.clone().into_bytes(),
        }
    }
}

impl From<execution_event::Event> for runner_pool::ExecutionEvent {
    fn from(event: execution_event::Event) -> Self {
        match event {
            execution_event::Event::Stdout(chunk) => runner_pool::ExecutionEvent::Stdout(chunk),
            execution_event::Event::Stderr(chunk) => runner_pool::ExecutionEvent::Stderr(chunk),
            execution_event::Event::Exit(code) => runner_pool::ExecutionEvent::Exit(code),
        }
    }
}
