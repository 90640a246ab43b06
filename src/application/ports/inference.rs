//! Inference Port - 推理会话生命周期管理
//!
//! 定义推理执行的抽象接口，具体实现在 infrastructure/inference 层

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::engine::EngineError;
use crate::domain::inference::{ChatMessage, PromptOptions, SessionConfig};

/// 推理会话错误
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session busy: another generation is in progress")]
    Busy,

    #[error("Prompt aborted")]
    Aborted,

    #[error("Model not installed: {0}")]
    ModelNotFound(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Chat context error: {0}")]
    ChatContext(String),
}

/// 对话上下文恢复请求
#[derive(Debug, Clone)]
pub struct ContextRequest {
    /// 持久化键
    pub tracking_id: String,
    /// 上一轮返回的 history hash，None 表示没有可用的检查点
    pub expected_hash: Option<String>,
    /// 检查点不可用时用于重建上下文的历史
    pub history: Vec<ChatMessage>,
}

/// 执行请求
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub session_id: String,
    pub config: SessionConfig,
    pub prompt: String,
    pub options: PromptOptions,
    pub context: Option<ContextRequest>,
}

/// 执行结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutcome {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_hash: Option<String>,
    /// 是否复用了已加载的引擎
    pub reused: bool,
}

/// 会话管理器状态
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub loaded: Option<SessionConfig>,
    pub session_ids: Vec<String>,
    pub busy: bool,
    pub loads: u64,
    pub reuses: u64,
    pub disposals: u64,
}

/// Inference Port
///
/// 进程内最多一个已加载引擎，同一时刻最多一个生成
#[async_trait]
pub trait InferencePort: Send + Sync {
    /// 执行一次生成；并发调用立即返回 `SessionError::Busy`
    async fn execute(
        &self,
        request: ExecuteRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, SessionError>;

    /// 释放逻辑会话，返回引擎是否因此被卸载
    async fn dispose(&self, session_id: &str) -> bool;

    fn status(&self) -> SessionStatus;
}
