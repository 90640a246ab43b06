//! Persistence Layer - 数据持久化
//!
//! 文件系统存储：模型清单 / 统计、对话检查点，均由建议性文件锁保护

pub mod chat_context_store;
pub mod file_lock;
pub mod model_repository;

pub use chat_context_store::FileChatContextStore;
pub use file_lock::{FileLock, LockError};
pub use model_repository::FileModelRepository;
