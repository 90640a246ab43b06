//! Model Queries

use serde::Deserialize;

/// 列出已安装模型
#[derive(Debug, Clone)]
pub struct ListModels;

/// 查询模型统计信息
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetModelStats {
    pub model_id: String,
}
