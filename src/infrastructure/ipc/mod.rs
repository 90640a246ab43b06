//! IPC 层：分帧、通道、RPC 客户端与服务端

pub mod client;
pub mod framing;
pub mod passthrough;
pub mod routes;
pub mod server;
pub mod transport;

pub use client::{ClientOptions, RpcClient, RpcError};
pub use framing::{FrameCodec, FrameError, DEFAULT_MAX_MESSAGE_SIZE};
pub use passthrough::{forward, passthrough_handler};
pub use routes::{build_router, GatewayServices};
pub use server::{
    HandlerFailure, HandlerResult, InflightChannel, RpcHandler, RpcRouter, RpcServer,
    ServerOptions,
};
pub use transport::{PortTransport, StreamTransport};
