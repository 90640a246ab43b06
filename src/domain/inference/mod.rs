//! Inference Context - 推理会话值对象
//!
//! 职责:
//! - 会话复用键（SessionConfig）
//! - 采样参数
//! - 对话历史

mod value_objects;

pub use value_objects::{
    ChatMessage, ChatRole, GpuEngine, PromptOptions, RepeatPenalty, SessionConfig,
    DEFAULT_CONTEXT_SIZE,
};
