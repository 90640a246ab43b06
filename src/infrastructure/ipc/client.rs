//! RPC Client
//!
//! 在任意 Transport 上发起 request / stream 调用

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{Transport, TransportError};
use crate::domain::ipc::{IpcMessage, IpcType};

/// 默认 Ping 间隔
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(2500);

/// 默认存活超时
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(10);

/// RPC 调用错误
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Transport disconnected: {transport}")]
    Disconnected { transport: String },

    #[error("Call rejected by {transport} [{code}]: {message}")]
    Rejected {
        transport: String,
        code: String,
        message: String,
    },

    #[error("Call aborted")]
    Aborted,

    #[error("Peer unresponsive: {transport}")]
    PeerUnresponsive { transport: String },
}

/// 客户端选项
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub ping_interval: Duration,
    pub liveness_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
        }
    }
}

/// RPC 客户端
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    options: ClientOptions,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>, options: ClientOptions) -> Self {
        Self { transport, options }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// 单次调用，返回 Resolve 载荷
    pub async fn request(
        &self,
        call_type: &str,
        payload: Value,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError> {
        self.stream(call_type, payload, |_| {}, cancel).await
    }

    /// 流式调用，每条 Emit 回调一次 `on_emit`，返回 Resolve 载荷
    ///
    /// 取消时发送 Abort 并立即返回，不等待对端确认
    pub async fn stream<F>(
        &self,
        call_type: &str,
        payload: Value,
        mut on_emit: F,
        cancel: CancellationToken,
    ) -> Result<Value, RpcError>
    where
        F: FnMut(Value) + Send,
    {
        let id = Uuid::new_v4().to_string();
        let transport_name = self.transport.name().to_string();

        // 先注册监听再发送 Open，避免错过快速返回的结果
        let mut listener = self.transport.listen();
        let closed = self.transport.closed();
        if closed.is_cancelled() {
            return Err(RpcError::Disconnected {
                transport: transport_name,
            });
        }
        if cancel.is_cancelled() {
            return Err(RpcError::Aborted);
        }

        self.transport
            .send(&IpcMessage::open(id.clone(), call_type, payload))?;
        tracing::debug!(call_id = %id, call_type = %call_type, transport = %transport_name, "Call opened");

        let period = self.options.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = self.transport.send(&IpcMessage::abort(id.clone())) {
                        tracing::debug!(call_id = %id, error = %e, "Failed to send abort");
                    }
                    tracing::debug!(call_id = %id, call_type = %call_type, "Call aborted");
                    return Err(RpcError::Aborted);
                }
                _ = closed.cancelled() => {
                    return Err(RpcError::Disconnected { transport: transport_name });
                }
                message = listener.recv() => {
                    let Some(message) = message else {
                        return Err(RpcError::Disconnected { transport: transport_name });
                    };
                    if message.id != id {
                        continue;
                    }
                    last_seen = Instant::now();
                    match message.ipc_type {
                        IpcType::Resolve => return Ok(message.payload),
                        IpcType::Reject => {
                            return Err(rejection(transport_name, message.payload));
                        }
                        IpcType::Emit => on_emit(message.payload),
                        _ => {}
                    }
                }
                _ = ping.tick() => {
                    if last_seen.elapsed() > self.options.liveness_timeout {
                        tracing::warn!(call_id = %id, transport = %transport_name, "No response from peer, giving up");
                        let _ = self.transport.send(&IpcMessage::abort(id.clone()));
                        return Err(RpcError::PeerUnresponsive { transport: transport_name });
                    }
                    self.transport.send(&IpcMessage::ping(id.clone()))?;
                }
            }
        }
    }
}

/// 解析 Reject 载荷：`{message, code}`，也接受纯字符串
fn rejection(transport: String, payload: Value) -> RpcError {
    let (message, code) = match &payload {
        Value::String(s) => (s.clone(), "unknown".to_string()),
        Value::Object(map) => (
            map.get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            map.get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        ),
        other => (other.to_string(), "unknown".to_string()),
    };
    RpcError::Rejected {
        transport,
        code,
        message,
    }
}
