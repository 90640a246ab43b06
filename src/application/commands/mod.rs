//! 应用层 - 命令（写操作）
//!
//! CQRS 命令侧：生成、会话释放、模型生命周期

mod inference_commands;
mod model_commands;

pub mod handlers;

pub use inference_commands::*;
pub use model_commands::*;
