//! Inference Commands - 推理相关命令

use serde::{Deserialize, Serialize};

use crate::application::error::ApplicationError;
use crate::application::ports::{ContextRequest, ExecuteRequest};
use crate::domain::inference::{
    ChatMessage, GpuEngine, PromptOptions, SessionConfig, DEFAULT_CONTEXT_SIZE,
};
use crate::domain::model::validate_model_id;

fn default_use_mmap() -> bool {
    true
}

/// 生成命令（`prompt` 调用的载荷）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCommand {
    pub session_id: String,
    pub model_id: String,
    /// `auto` / `cpu` / `cuda` / `metal` / `vulkan`
    #[serde(default)]
    pub gpu_engine: Option<String>,
    #[serde(default)]
    pub context_size: Option<u32>,
    #[serde(default)]
    pub flash_attention: bool,
    #[serde(default = "default_use_mmap")]
    pub use_mmap: bool,
    #[serde(default)]
    pub grammar: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub options: PromptOptions,
    /// 对话检查点的持久化键，缺省时不做上下文持久化
    #[serde(default)]
    pub tracking_id: Option<String>,
    #[serde(default)]
    pub history_hash: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl PromptCommand {
    /// 校验并转换为执行请求
    pub fn into_request(self) -> Result<ExecuteRequest, ApplicationError> {
        if self.session_id.trim().is_empty() {
            return Err(ApplicationError::validation("sessionId cannot be empty"));
        }
        validate_model_id(&self.model_id)
            .map_err(|e| ApplicationError::validation(format!("{}: {}", e, self.model_id)))?;

        let gpu_engine = match &self.gpu_engine {
            Some(name) => GpuEngine::parse(name).map_err(ApplicationError::validation)?,
            None => None,
        };
        let context_size = self.context_size.unwrap_or(DEFAULT_CONTEXT_SIZE);
        if context_size == 0 {
            return Err(ApplicationError::validation("contextSize must be positive"));
        }

        let config = SessionConfig::new(self.model_id)
            .with_gpu_engine(gpu_engine)
            .with_context_size(context_size)
            .with_flash_attention(self.flash_attention)
            .with_mmap(self.use_mmap)
            .with_grammar(self.grammar);

        let context = self.tracking_id.map(|tracking_id| ContextRequest {
            tracking_id,
            expected_hash: self.history_hash,
            history: self.history,
        });

        Ok(ExecuteRequest {
            session_id: self.session_id,
            config,
            prompt: self.prompt,
            options: self.options,
            context,
        })
    }
}

/// 流式输出片段
#[derive(Debug, Clone, Serialize)]
pub struct PromptChunk<'a> {
    pub chunk: &'a str,
}

/// 释放逻辑会话命令
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposeSessionCommand {
    pub session_id: String,
}

/// 释放逻辑会话响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisposeSessionResponse {
    /// 引擎是否因此被卸载
    pub released: bool,
}
