use tonic::{
    Request, Status, Streaming,
    client::Grpc,
    codec::ProstCodec,
    codegen::http::uri::PathAndQuery,
    transport::{Channel, Endpoint},
};

use crate::grpc::models::{
    ACQUIRE_PATH, ATTACH_PATH, AcquireRequest, AcquireResponse, AttachRequest, COPY_FILES_PATH, CopyFilesRequest,
    Empty, ExecutionEvent, RELEASE_PATH, ReleaseRequest,
};

/// Thin client of the runner management service.
#[derive(Clone, Debug)]
pub struct RunnerManagementClient {
    inner: Grpc<Channel>,
}

impl RunnerManagementClient {
    /// The connection is established on first use.
    pub fn connect_lazy(url: &str) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(url.to_string())?.connect_lazy();
        Ok(Self {
            inner: Grpc::new(channel),
        })
    }

    async fn ready(&self) -> Result<Grpc<Channel>, Status> {
        let mut grpc = self.inner.clone();
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("runner management is not ready: {}", e)))?;
        Ok(grpc)
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, Status>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<Req, Resp> = ProstCodec::default();
        let response = grpc
            .unary(Request::new(request), PathAndQuery::from_static(path), codec)
            .await?;
        Ok(response.into_inner())
    }

    pub async fn acquire(&self, request: AcquireRequest) -> Result<AcquireResponse, Status> {
        self.unary(ACQUIRE_PATH, request).await
    }

    pub async fn copy_files(&self, request: CopyFilesRequest) -> Result<Empty, Status> {
        self.unary(COPY_FILES_PATH, request).await
    }

    pub async fn release(&self, request: ReleaseRequest) -> Result<Empty, Status> {
        self.unary(RELEASE_PATH, request).await
    }

    /// Opens the event stream of one command. The command runs until the
    /// returned stream is dropped or the runner reports an exit.
    pub async fn attach(&self, request: AttachRequest) -> Result<Streaming<ExecutionEvent>, Status> {
        let mut grpc = self.ready().await?;
        let codec: ProstCodec<AttachRequest, ExecutionEvent> = ProstCodec::default();
        let response = grpc
            .server_streaming(Request::new(request), PathAndQuery::from_static(ATTACH_PATH), codec)
            .await?;
        Ok(response.into_inner())
    }
}
