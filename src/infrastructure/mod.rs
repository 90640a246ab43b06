//! Infrastructure Layer - 基础设施层
//!
//! 提供所有端口的具体实现

pub mod adapters;
pub mod events;
pub mod inference;
pub mod ipc;
pub mod persistence;
pub mod tasks;

pub use events::EventPublisher;
pub use inference::LlmSessionManager;
pub use persistence::{FileChatContextStore, FileModelRepository};
pub use tasks::{TaskQueue, TaskWorker};
