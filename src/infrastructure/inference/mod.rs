//! Inference - 推理会话管理

pub mod session_manager;

pub use session_manager::{LlmSessionManager, DEFAULT_AUTO_DISPOSE};
