//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;
use crate::infrastructure::adapters::engine::FakeEngineConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `INFERD_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `INFERD_IPC__PING_INTERVAL_MS=1000`
/// - `INFERD_INFERENCE__AUTO_DISPOSE_SECS=60`
/// - `INFERD_STORAGE__MODELS_DIR=/data/models`
/// - `INFERD_LOG__JSON=true`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let engine = FakeEngineConfig::default();
    let mut builder = Config::builder();

    // 1. 首先设置默认值（最低优先级）
    builder = builder
        .set_default("ipc.max_message_size", 1_000_000_u64)?
        .set_default("ipc.ping_interval_ms", 2500)?
        .set_default("ipc.liveness_timeout_ms", 10_000)?
        .set_default("inference.auto_dispose_secs", 300)?
        .set_default("storage.models_dir", "data/models")?
        .set_default("storage.assets_dir", "data/assets")?
        .set_default("storage.contexts_dir", "data/contexts")?
        .set_default("engine.reply", engine.reply)?
        .set_default("engine.chunk_delay_ms", engine.chunk_delay_ms)?
        .set_default("app.version", env!("CARGO_PKG_VERSION"))?
        .set_default("log.level", "info")?
        .set_default("log.json", false)?;

    // 2. 添加配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 添加环境变量（最高优先级）
    // 列表类型（upstream.args / forward_types）以逗号分隔
    builder = builder.add_source(
        Environment::with_prefix("INFERD")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("ipc.upstream.args")
            .with_list_parse_key("ipc.upstream.forward_types"),
    );

    let config = builder.build()?;
    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.ipc.max_message_size == 0 {
        return Err(ConfigError::ValidationError(
            "ipc.max_message_size cannot be 0".to_string(),
        ));
    }

    if config.ipc.ping_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "ipc.ping_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.ipc.liveness_timeout_ms < config.ipc.ping_interval_ms {
        return Err(ConfigError::ValidationError(format!(
            "ipc.liveness_timeout_ms ({}) must not be shorter than ipc.ping_interval_ms ({})",
            config.ipc.liveness_timeout_ms, config.ipc.ping_interval_ms
        )));
    }

    if config.inference.auto_dispose_secs == 0 {
        return Err(ConfigError::ValidationError(
            "inference.auto_dispose_secs cannot be 0".to_string(),
        ));
    }

    let storage = &config.storage;
    for (key, path) in [
        ("storage.models_dir", &storage.models_dir),
        ("storage.assets_dir", &storage.assets_dir),
        ("storage.contexts_dir", &storage.contexts_dir),
    ] {
        if path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", key)));
        }
    }

    if config.app.version.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "app.version cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("App Version: {}", config.app.version);
    tracing::info!("Max Message Size: {} bytes", config.ipc.max_message_size);
    tracing::info!(
        "Ping Interval: {}ms, Liveness Timeout: {}ms",
        config.ipc.ping_interval_ms,
        config.ipc.liveness_timeout_ms
    );
    match &config.ipc.upstream.program {
        Some(program) => tracing::info!(
            "Upstream: {} {:?} (forward: {:?})",
            program,
            config.ipc.upstream.args,
            config.ipc.upstream.forward_types
        ),
        None => tracing::info!("Upstream: disabled"),
    }
    tracing::info!("Auto Dispose: {}s", config.inference.auto_dispose_secs);
    tracing::info!("Models Directory: {:?}", config.storage.models_dir);
    tracing::info!("Assets Directory: {:?}", config.storage.assets_dir);
    tracing::info!("Contexts Directory: {:?}", config.storage.contexts_dir);
    tracing::info!("Engine Chunk Delay: {}ms", config.engine.chunk_delay_ms);
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
