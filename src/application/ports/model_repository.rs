//! Model Repository Port - 模型仓库
//!
//! 定义模型清单、使用统计和资源文件的抽象接口
//! 具体实现在 infrastructure/persistence 层（文件系统 + 文件锁）

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::domain::model::{ModelManifest, ModelStats, StatsDelta};

/// Repository 错误
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Model not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

/// 加载模型所需的文件路径
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub model: PathBuf,
    pub lora_adapter: Option<PathBuf>,
}

/// 资源回收结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// 被删除的文件
    pub removed: Vec<PathBuf>,
    /// 仍被引用而保留的文件数
    pub retained: usize,
}

/// Model Repository Port
#[async_trait]
pub trait ModelRepositoryPort: Send + Sync {
    /// 读取模型清单
    async fn manifest(&self, model_id: &str) -> Result<ModelManifest, RepositoryError>;

    /// 原子写入模型清单（读者不会看到写了一半的文件）
    async fn write_manifest(&self, manifest: &ModelManifest) -> Result<(), RepositoryError>;

    /// 删除模型清单与统计
    async fn remove_model(&self, model_id: &str) -> Result<(), RepositoryError>;

    /// 所有已安装模型
    async fn installed_models(&self) -> Result<Vec<ModelManifest>, RepositoryError>;

    /// 读取统计，不存在时返回默认值
    async fn stats(&self, model_id: &str) -> Result<ModelStats, RepositoryError>;

    /// 加锁读-合并-写，返回合并后的统计
    async fn update_stats(
        &self,
        model_id: &str,
        delta: StatsDelta,
    ) -> Result<ModelStats, RepositoryError>;

    /// 资源相对路径 -> 绝对路径
    fn asset_path(&self, relative: &str) -> Result<PathBuf, RepositoryError>;

    /// 解析模型的权重与适配器路径
    async fn model_files(&self, model_id: &str) -> Result<ModelFiles, RepositoryError>;

    /// 把外部文件导入资源目录
    async fn import_asset(&self, source: &Path, relative: &str)
        -> Result<PathBuf, RepositoryError>;

    /// 标记-清除：删除未被任何清单引用的资源文件
    async fn remove_unused_assets(&self) -> Result<GcReport, RepositoryError>;
}
