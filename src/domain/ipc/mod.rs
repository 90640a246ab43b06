//! IPC Context - 通道协议消息
//!
//! 职责:
//! - 消息信封定义（Open / Abort / Ping / Resolve / Reject / Emit / Pong）
//! - 按 correlation id 关联同一调用的所有消息

mod message;

pub use message::{IpcMessage, IpcType};
