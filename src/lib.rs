//! inferd - 本地推理网关
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - IPC 信封、会话配置、模型清单、任务快照
//!
//! 应用层 (application/):
//! - Ports: 端口定义（Transport, Engine, Inference, ChatContext, ModelRepository, TaskQueue）
//! - Commands: 生成、会话释放、模型安装 / 更新 / 卸载
//! - Queries: 会话状态、模型列表与统计、当前任务
//!
//! 基础设施层 (infrastructure/):
//! - IPC: 分帧、通道、RPC 客户端 / 服务端、转发
//! - Inference: 单引擎会话管理
//! - Persistence: 文件锁、对话检查点、模型仓库
//! - Tasks: 串行任务队列
//! - Events: 进程内事件发布

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
