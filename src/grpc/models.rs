//! Messages of the `runnermanagement.RunnerManagement` service.

pub const ACQUIRE_PATH: &str = "/runnermanagement.RunnerManagement/Acquire";
pub const COPY_FILES_PATH: &str = "/runnermanagement.RunnerManagement/CopyFiles";
pub const RELEASE_PATH: &str = "/runnermanagement.RunnerManagement/Release";
pub const ATTACH_PATH: &str = "/runnermanagement.RunnerManagement/Attach";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireRequest {
    #[prost(string, tag = "1")]
    pub principal: String,
    #[prost(uint64, tag = "2")]
    pub execution_environment_id: u64,
    #[prost(string, tag = "3")]
    pub image: String,
    #[prost(message, optional, tag = "4")]
    pub execution_timeout: Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireResponse {
    #[prost(string, tag = "1")]
    pub runner_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FileCopy {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bytes = "vec", tag = "2")]
    pub content: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CopyFilesRequest {
    #[prost(string, tag = "1")]
    pub runner_id: String,
    #[prost(message, repeated, tag = "2")]
    pub files: Vec<FileCopy>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseRequest {
    #[prost(string, tag = "1")]
    pub runner_id: String,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachRequest {
    #[prost(string, tag = "1")]
    pub runner_id: String,
    #[prost(string, tag = "2")]
    pub command: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ExecutionEvent {
    #[prost(oneof = "execution_event::Event", tags = "1, 2, 3")]
    pub event: Option<execution_event::Event>,
}

pub mod execution_event {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Event {
        #[prost(string, tag = "1")]
        Stdout(String),
        #[prost(string, tag = "2")]
        Stderr(String),
        #[prost(int32, tag = "3")]
        Exit(i32),
    }
}
