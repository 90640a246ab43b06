//! Model Commands - 模型安装 / 更新 / 卸载

use serde::Deserialize;
use std::path::PathBuf;

use crate::domain::model::ModelManifest;

/// 安装模型：从 `source_dir` 复制清单中的所有资源
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallModel {
    pub manifest: ModelManifest,
    pub source_dir: PathBuf,
}

/// 更新已安装的模型，完成后回收不再引用的资源
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModel {
    pub manifest: ModelManifest,
    pub source_dir: PathBuf,
}

/// 卸载模型
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallModel {
    pub model_id: String,
}
