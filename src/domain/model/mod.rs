//! Model Context - 模型仓库领域对象
//!
//! 职责:
//! - 模型清单（manifest）与资源文件描述
//! - 使用统计（stats）及其合并规则
//! - 模型标识校验

mod manifest;

pub use manifest::{
    validate_asset_path, validate_model_id, AssetRole, ModelAsset, ModelIdentity, ModelManifest,
    ModelStats, StatsDelta,
};
