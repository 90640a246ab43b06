//! Engine Port - 本地推理引擎抽象
//!
//! 引擎本身（模型加载、上下文、token 生成）对网关是不透明的能力，
//! 这里只定义网关需要的最小接口

use async_trait::async_trait;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::inference::{ChatMessage, GpuEngine, PromptOptions};

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Model load failed: {0}")]
    Load(String),

    #[error("Context creation failed: {0}")]
    Context(String),

    #[error("Grammar compilation failed: {0}")]
    Grammar(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("State persistence failed: {0}")]
    State(String),
}

/// 模型加载参数
#[derive(Debug, Clone, PartialEq)]
pub struct ModelParams {
    pub use_mmap: bool,
    pub gpu_engine: Option<GpuEngine>,
}

/// 上下文创建参数
#[derive(Debug, Clone, PartialEq)]
pub struct ContextParams {
    pub context_size: u32,
    pub flash_attention: bool,
    pub lora_adapter_path: Option<PathBuf>,
}

/// 编译后的约束解码语法
pub trait EngineGrammar: Send + Sync {
    /// 编译前的语法文本
    fn source(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

/// 单次生成请求
pub struct GenerationRequest<'a> {
    pub text: &'a str,
    pub options: &'a PromptOptions,
    pub grammar: Option<&'a dyn EngineGrammar>,
    pub cancel: &'a CancellationToken,
}

/// Engine Port
#[async_trait]
pub trait EnginePort: Send + Sync {
    async fn load_model(
        &self,
        path: &Path,
        params: ModelParams,
    ) -> Result<Box<dyn EngineModel>, EngineError>;
}

/// 已加载的模型
#[async_trait]
pub trait EngineModel: Send + Sync {
    async fn create_context(
        &self,
        params: ContextParams,
    ) -> Result<Box<dyn EngineContext>, EngineError>;

    async fn compile_grammar(&self, source: &str) -> Result<Arc<dyn EngineGrammar>, EngineError>;

    async fn dispose(&mut self);
}

/// 推理上下文（持有一个 sequence）
#[async_trait]
pub trait EngineContext: Send + Sync {
    async fn create_session(&self) -> Result<Box<dyn ChatSession>, EngineError>;

    async fn dispose(&mut self);
}

/// 可序列化到磁盘的引擎内部状态
#[async_trait]
pub trait EngineState: Send + Sync {
    async fn save_state(&self, path: &Path) -> Result<(), EngineError>;

    async fn load_state(&mut self, path: &Path) -> Result<(), EngineError>;
}

/// 对话会话
#[async_trait]
pub trait ChatSession: EngineState {
    fn history(&self) -> Vec<ChatMessage>;

    fn set_history(&mut self, history: Vec<ChatMessage>);

    /// 清空对话状态
    fn reset(&mut self);

    /// 生成回复，每个文本片段回调一次 `on_chunk`
    ///
    /// 取消时应尽快停止并返回 `EngineError::Cancelled`
    async fn prompt(
        &mut self,
        request: GenerationRequest<'_>,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, EngineError>;

    async fn dispose(&mut self);

    fn as_state(&self) -> &dyn EngineState;

    fn as_state_mut(&mut self) -> &mut dyn EngineState;
}
