//! Domain Layer - 领域层
//!
//! 包含四个限界上下文:
//! - IPC Context: 通道协议消息
//! - Inference Context: 推理会话配置与对话历史
//! - Model Context: 模型清单与统计
//! - Task Context: 模型安装任务

pub mod inference;
pub mod ipc;
pub mod model;
pub mod task;
