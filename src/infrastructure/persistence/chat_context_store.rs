//! File Chat Context Store
//!
//! 每个 tracking id 一个目录：`.lock`、`context.json`（元数据）、`context.bin`（引擎状态）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::file_lock::FileLock;
use crate::application::ports::{
    history_hash, version_hash, ChatContextError, ChatContextPort, EngineState,
};
use crate::domain::inference::ChatMessage;
use crate::domain::model::ModelIdentity;

const LOCK_FILE: &str = ".lock";
const META_FILE: &str = "context.json";
const STATE_FILE: &str = "context.bin";

/// context.json
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContextMeta {
    version: String,
    history: Vec<ChatMessage>,
    hash: String,
    /// 毫秒时间戳
    timestamp: i64,
}

/// 文件系统对话检查点存储
pub struct FileChatContextStore {
    base_dir: PathBuf,
    app_version: String,
}

impl FileChatContextStore {
    pub fn new(base_dir: impl AsRef<Path>, app_version: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            app_version: app_version.into(),
        }
    }

    /// tracking id 可能包含任意字符，目录名取其 md5
    pub fn context_dir(&self, tracking_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{:x}", md5::compute(tracking_id.as_bytes())))
    }

    async fn lock(&self, dir: &Path) -> Result<FileLock, ChatContextError> {
        FileLock::acquire(dir.join(LOCK_FILE))
            .await
            .map_err(|e| ChatContextError::Lock(e.to_string()))
    }

    async fn read_meta(&self, dir: &Path) -> Result<Option<ContextMeta>, ChatContextError> {
        let bytes = match fs::read(dir.join(META_FILE)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChatContextError::Io(e.to_string())),
        };

        match serde_json::from_slice(&bytes) {
            Ok(meta) => Ok(Some(meta)),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Ignoring corrupt chat context metadata");
                Ok(None)
            }
        }
    }
}

async fn write_pending(
    state: &dyn EngineState,
    meta: &ContextMeta,
    state_tmp: &Path,
    meta_tmp: &Path,
) -> Result<(), ChatContextError> {
    state.save_state(state_tmp).await?;
    let json = serde_json::to_vec_pretty(meta)
        .map_err(|e| ChatContextError::Serialization(e.to_string()))?;
    fs::write(meta_tmp, json)
        .await
        .map_err(|e| ChatContextError::Io(e.to_string()))
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %e, "Failed to discard temp file");
        }
    }
}

async fn remove_if_exists(path: &Path) -> Result<(), ChatContextError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ChatContextError::Io(e.to_string())),
    }
}

#[async_trait]
impl ChatContextPort for FileChatContextStore {
    async fn save(
        &self,
        tracking_id: &str,
        identity: &ModelIdentity,
        state: &dyn EngineState,
        history: &[ChatMessage],
    ) -> Result<String, ChatContextError> {
        let dir = self.context_dir(tracking_id);
        let _lock = self.lock(&dir).await?;

        let hash = history_hash(history)?;
        let meta = ContextMeta {
            version: version_hash(&self.app_version, identity),
            history: history.to_vec(),
            hash: hash.clone(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        // 两个临时文件都写好之后才动正式文件
        let state_tmp = dir.join(format!("{}.tmp", STATE_FILE));
        let meta_tmp = dir.join(format!("{}.tmp", META_FILE));
        if let Err(e) = write_pending(state, &meta, &state_tmp, &meta_tmp).await {
            discard(&state_tmp).await;
            discard(&meta_tmp).await;
            return Err(e);
        }

        // 旧元数据先失效：中途失败最多丢掉检查点，不会把旧历史和新状态配成一对
        remove_if_exists(&dir.join(META_FILE)).await?;
        fs::rename(&state_tmp, dir.join(STATE_FILE))
            .await
            .map_err(|e| ChatContextError::Io(e.to_string()))?;
        fs::rename(&meta_tmp, dir.join(META_FILE))
            .await
            .map_err(|e| ChatContextError::Io(e.to_string()))?;

        tracing::debug!(
            tracking_id = %tracking_id,
            model_id = %identity.id,
            messages = history.len(),
            hash = %hash,
            "Chat context saved"
        );

        Ok(hash)
    }

    async fn load(
        &self,
        tracking_id: &str,
        identity: &ModelIdentity,
        expected_hash: &str,
        state: &mut dyn EngineState,
    ) -> Result<Option<Vec<ChatMessage>>, ChatContextError> {
        let dir = self.context_dir(tracking_id);
        let _lock = self.lock(&dir).await?;

        let Some(meta) = self.read_meta(&dir).await? else {
            return Ok(None);
        };

        if meta.version != version_hash(&self.app_version, identity) {
            tracing::debug!(tracking_id = %tracking_id, "Chat context version mismatch");
            return Ok(None);
        }
        if meta.hash != expected_hash {
            tracing::debug!(tracking_id = %tracking_id, "Chat context hash mismatch");
            return Ok(None);
        }

        let state_path = dir.join(STATE_FILE);
        if fs::metadata(&state_path).await.is_err() {
            tracing::warn!(tracking_id = %tracking_id, "Chat context state file missing");
            return Ok(None);
        }
        state.load_state(&state_path).await?;

        tracing::debug!(
            tracking_id = %tracking_id,
            messages = meta.history.len(),
            "Chat context restored"
        );

        Ok(Some(meta.history))
    }

    async fn remove(&self, tracking_id: &str) -> Result<(), ChatContextError> {
        let dir = self.context_dir(tracking_id);
        if fs::metadata(&dir).await.is_err() {
            return Ok(());
        }

        let _lock = self.lock(&dir).await?;
        remove_if_exists(&dir.join(META_FILE)).await?;
        remove_if_exists(&dir.join(STATE_FILE)).await?;

        tracing::debug!(tracking_id = %tracking_id, "Chat context removed");
        Ok(())
    }
}
