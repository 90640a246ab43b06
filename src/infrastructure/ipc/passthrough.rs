//! Pass-through Channel
//!
//! 把一次入站调用原样转发给上游 RpcClient（type、payload、emit、abort）

use serde_json::Value;
use std::sync::Arc;

use super::client::{RpcClient, RpcError};
use super::server::{HandlerResult, InflightChannel, RpcHandler};
use crate::application::error::ApplicationError;

/// 以上游 stream 调用的方式执行入站调用
///
/// 外层通道的取消令牌直接交给内层调用，外层 Abort 即内层 Abort
pub async fn forward(channel: &InflightChannel, upstream: &RpcClient) -> HandlerResult {
    tracing::debug!(
        call_id = %channel.id(),
        call_type = %channel.call_type(),
        upstream = %upstream.transport_name(),
        "Forwarding call upstream"
    );

    upstream
        .stream(
            channel.call_type(),
            channel.payload().clone(),
            |value: Value| {
                if let Err(e) = channel.emit(value) {
                    tracing::debug!(call_id = %channel.id(), error = %e, "Dropping upstream emit");
                }
            },
            channel.cancellation_token(),
        )
        .await
        .map_err(ApplicationError::from)
}

/// 转发 handler，可注册到任意调用类型
pub fn passthrough_handler(upstream: Arc<RpcClient>) -> Arc<dyn RpcHandler> {
    Arc::new(move |channel: InflightChannel| {
        let upstream = upstream.clone();
        async move { forward(&channel, &upstream).await }
    })
}

impl From<RpcError> for ApplicationError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Aborted => Self::Aborted,
            RpcError::Transport(e) => Self::from(e),
            // 上游错误码原样透传
            RpcError::Rejected { code, message, .. } => match code.as_str() {
                "busy" => Self::Busy,
                "aborted" => Self::Aborted,
                "protocol" => Self::Protocol(message),
                "validation" => Self::ValidationError(message),
                "engine" => Self::Engine(message),
                "not_found" => Self::not_found("upstream resource", message),
                "transport" => Self::Transport(message),
                "repository" => Self::RepositoryError(message),
                "task" => Self::TaskError(message),
                _ => Self::InternalError(message),
            },
            other => Self::Transport(other.to_string()),
        }
    }
}
