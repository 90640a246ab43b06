//! Model Context - Manifest & Stats

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

/// 资源文件用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssetRole {
    /// 主权重文件
    Model,
    /// LoRA 适配器
    LoraAdapter,
    /// 其他附属文件
    Other,
}

/// 模型资源文件
///
/// `path` 为相对资源目录的路径，多个模型可以引用同一个文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAsset {
    pub path: String,
    pub role: AssetRole,
    #[serde(default)]
    pub size: Option<u64>,
}

/// 模型清单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelManifest {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
    pub assets: Vec<ModelAsset>,
}

impl ModelManifest {
    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            id: self.id.clone(),
            version: self.version.clone(),
        }
    }

    /// 主权重文件
    pub fn model_asset(&self) -> Option<&ModelAsset> {
        self.assets.iter().find(|a| a.role == AssetRole::Model)
    }

    pub fn lora_asset(&self) -> Option<&ModelAsset> {
        self.assets.iter().find(|a| a.role == AssetRole::LoraAdapter)
    }

    /// 校验 id 与所有资源路径
    pub fn validate(&self) -> Result<(), String> {
        validate_model_id(&self.id).map_err(|e| format!("{}: {}", e, self.id))?;
        if self.version.trim().is_empty() {
            return Err(format!("model version cannot be empty: {}", self.id));
        }
        if self.model_asset().is_none() {
            return Err(format!("model has no weights asset: {}", self.id));
        }
        for asset in &self.assets {
            validate_asset_path(&asset.path).map_err(|e| format!("{}: {}", e, asset.path))?;
        }
        Ok(())
    }
}

/// 模型标识（用于上下文缓存的版本校验）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub id: String,
    pub version: String,
}

/// 模型使用统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStats {
    /// 最近使用时间（毫秒时间戳）
    #[serde(default, rename = "usedTS")]
    pub used_ts: Option<i64>,
    /// 最近安装/更新时间（毫秒时间戳）
    #[serde(default, rename = "updateTS")]
    pub update_ts: Option<i64>,
    /// 本机性能评分
    #[serde(default)]
    pub machine_score: Option<f64>,
}

impl ModelStats {
    /// 合并增量：增量中的 Some 字段覆盖原值
    pub fn merge(&mut self, delta: &StatsDelta) {
        if let Some(ts) = delta.used_ts {
            self.used_ts = Some(ts);
        }
        if let Some(ts) = delta.update_ts {
            self.update_ts = Some(ts);
        }
        if let Some(score) = delta.machine_score {
            self.machine_score = Some(score);
        }
    }
}

/// 统计增量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsDelta {
    #[serde(default, rename = "usedTS")]
    pub used_ts: Option<i64>,
    #[serde(default, rename = "updateTS")]
    pub update_ts: Option<i64>,
    #[serde(default)]
    pub machine_score: Option<f64>,
}

impl StatsDelta {
    pub fn used_at(ts: i64) -> Self {
        Self {
            used_ts: Some(ts),
            ..Default::default()
        }
    }

    pub fn updated_at(ts: i64) -> Self {
        Self {
            update_ts: Some(ts),
            ..Default::default()
        }
    }
}

/// 模型 id 会作为目录名使用
pub fn validate_model_id(id: &str) -> Result<(), &'static str> {
    if id.trim().is_empty() {
        return Err("model id cannot be empty");
    }
    if id == "." || id == ".." {
        return Err("model id cannot be a relative directory");
    }
    if id.contains(['/', '\\', '\0']) {
        return Err("model id cannot contain path separators");
    }
    Ok(())
}

/// 资源路径必须是不含 `..` 的相对路径
pub fn validate_asset_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("asset path cannot be empty");
    }
    let mut has_normal = false;
    for component in Path::new(path).components() {
        match component {
            Component::Normal(_) => has_normal = true,
            Component::CurDir => {}
            _ => return Err("asset path must be relative and stay inside the asset directory"),
        }
    }
    if !has_normal {
        return Err("asset path must name a file");
    }
    Ok(())
}
