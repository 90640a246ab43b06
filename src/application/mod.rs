//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（Transport、Engine、Inference、ChatContext、ModelRepository、TaskQueue）
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    handlers::{
        DisposeSessionHandler, InstallModelHandler, PromptHandler, UninstallModelHandler,
        UpdateModelHandler,
    },
    DisposeSessionCommand, DisposeSessionResponse, InstallModel, PromptChunk, PromptCommand,
    UninstallModel, UpdateModel,
};

pub use error::ApplicationError;

pub use queries::{
    handlers::{CurrentTaskHandler, ListModelsHandler, ModelStatsHandler, SessionStatusHandler},
    GetCurrentTask, GetModelStats, GetSessionStatus, ListModels,
};
