//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::infrastructure::adapters::engine::FakeEngineConfig;
use crate::infrastructure::ipc::{ClientOptions, DEFAULT_MAX_MESSAGE_SIZE};

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// IPC 配置
    #[serde(default)]
    pub ipc: IpcConfig,

    /// 推理会话配置
    #[serde(default)]
    pub inference: InferenceConfig,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 引擎配置
    #[serde(default)]
    pub engine: EngineConfig,

    /// 应用信息
    #[serde(default)]
    pub app: AppInfoConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// IPC 配置
#[derive(Debug, Clone, Deserialize)]
pub struct IpcConfig {
    /// 单条消息最大字节数
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// 客户端 Ping 间隔（毫秒）
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// 超过该时长没有任何消息即视为对端失联（毫秒）
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,

    /// 上游进程（转发未在本地处理的调用）
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_ping_interval_ms() -> u64 {
    2500
}

fn default_liveness_timeout_ms() -> u64 {
    10_000
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            ping_interval_ms: default_ping_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl IpcConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    /// 上游 RpcClient 选项
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            ping_interval: self.ping_interval(),
            liveness_timeout: self.liveness_timeout(),
        }
    }
}

/// 上游进程配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamConfig {
    /// 可执行文件，未设置时不启动上游
    #[serde(default)]
    pub program: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// 转发给上游的调用类型
    #[serde(default)]
    pub forward_types: Vec<String>,
}

/// 推理会话配置
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// 空闲多久后自动卸载引擎（秒）
    #[serde(default = "default_auto_dispose_secs")]
    pub auto_dispose_secs: u64,
}

fn default_auto_dispose_secs() -> u64 {
    300
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            auto_dispose_secs: default_auto_dispose_secs(),
        }
    }
}

impl InferenceConfig {
    pub fn auto_dispose(&self) -> Duration {
        Duration::from_secs(self.auto_dispose_secs)
    }
}

/// 存储配置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// 模型清单与统计
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// 模型资源文件
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// 对话检查点
    #[serde(default = "default_contexts_dir")]
    pub contexts_dir: PathBuf,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("data/models")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("data/assets")
}

fn default_contexts_dir() -> PathBuf {
    PathBuf::from("data/contexts")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            assets_dir: default_assets_dir(),
            contexts_dir: default_contexts_dir(),
        }
    }
}

/// 引擎配置（本地 fake 引擎）
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// 固定回复
    #[serde(default = "default_engine_reply")]
    pub reply: String,

    /// 片段间延迟（毫秒）
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

fn default_engine_reply() -> String {
    FakeEngineConfig::default().reply
}

fn default_chunk_delay_ms() -> u64 {
    FakeEngineConfig::default().chunk_delay_ms
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply: default_engine_reply(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

impl From<&EngineConfig> for FakeEngineConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            reply: config.reply.clone(),
            chunk_delay_ms: config.chunk_delay_ms,
        }
    }
}

/// 应用信息
#[derive(Debug, Clone, Deserialize)]
pub struct AppInfoConfig {
    /// 参与对话检查点的版本校验
    #[serde(default = "default_app_version")]
    pub version: String,
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for AppInfoConfig {
    fn default() -> Self {
        Self {
            version: default_app_version(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    /// 可选: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
