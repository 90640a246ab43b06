//! Chat Context Port - 对话状态检查点
//!
//! 按 tracking id 持久化引擎内部状态，用于跨进程重启恢复对话

use async_trait::async_trait;
use thiserror::Error;

use super::engine::{EngineError, EngineState};
use crate::domain::inference::ChatMessage;
use crate::domain::model::ModelIdentity;

/// Chat Context 错误
#[derive(Debug, Error)]
pub enum ChatContextError {
    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Engine state error: {0}")]
    Engine(#[from] EngineError),
}

/// Chat Context Port
#[async_trait]
pub trait ChatContextPort: Send + Sync {
    /// 保存检查点，返回新的 history hash
    async fn save(
        &self,
        tracking_id: &str,
        identity: &ModelIdentity,
        state: &dyn EngineState,
        history: &[ChatMessage],
    ) -> Result<String, ChatContextError>;

    /// 恢复检查点
    ///
    /// 版本或 hash 不匹配时返回 `Ok(None)`，且不修改 `state`
    async fn load(
        &self,
        tracking_id: &str,
        identity: &ModelIdentity,
        expected_hash: &str,
        state: &mut dyn EngineState,
    ) -> Result<Option<Vec<ChatMessage>>, ChatContextError>;

    /// 删除检查点
    async fn remove(&self, tracking_id: &str) -> Result<(), ChatContextError>;
}

/// 计算对话历史的 hash
pub fn history_hash(history: &[ChatMessage]) -> Result<String, ChatContextError> {
    let bytes =
        serde_json::to_vec(history).map_err(|e| ChatContextError::Serialization(e.to_string()))?;
    Ok(format!("{:x}", md5::compute(bytes)))
}

/// 计算版本 hash（应用版本 + 模型 id + 模型版本）
pub fn version_hash(app_version: &str, identity: &ModelIdentity) -> String {
    let source = format!("{}\n{}\n{}", app_version, identity.id, identity.version);
    format!("{:x}", md5::compute(source.as_bytes()))
}
