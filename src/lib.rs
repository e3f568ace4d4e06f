pub mod config;
pub mod constants;
pub mod core;
pub mod grpc;
pub mod null;
pub mod stubs;
