//! Transport Port - 双工消息通道抽象
//!
//! RPC 协议可以承载在任何实现了该接口的通道上：
//! 带长度前缀的字节管道，或进程内的消息端口

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::ipc::IpcMessage;

/// Transport 错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Message too large: {size} bytes exceeds limit of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Transport disconnected: {0}")]
    Disconnected(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// 入站消息监听器
///
/// 按到达顺序接收通道上的每一条入站消息；drop 时自动注销
pub struct Listener {
    receiver: mpsc::UnboundedReceiver<IpcMessage>,
    on_drop: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Listener {
    pub fn new(
        receiver: mpsc::UnboundedReceiver<IpcMessage>,
        on_drop: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            receiver,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// 通道断开后返回 None
    pub async fn recv(&mut self) -> Option<IpcMessage> {
        self.receiver.recv().await
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

/// Transport Port
pub trait Transport: Send + Sync {
    /// 通道标识（用于诊断信息）
    fn name(&self) -> &str;

    /// 同步发送：序列化和大小检查失败时不会写出任何数据
    fn send(&self, message: &IpcMessage) -> Result<(), TransportError>;

    /// 注册入站消息监听器
    fn listen(&self) -> Listener;

    /// 断开时触发
    fn closed(&self) -> CancellationToken;

    /// 主动断开
    fn close(&self);
}
