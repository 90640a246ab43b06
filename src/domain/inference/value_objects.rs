//! Inference Context - Value Objects

use serde::{Deserialize, Serialize};

/// 默认上下文长度（token）
pub const DEFAULT_CONTEXT_SIZE: u32 = 4096;

/// GPU 后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuEngine {
    Cpu,
    Cuda,
    Metal,
    Vulkan,
}

impl GpuEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            GpuEngine::Cpu => "cpu",
            GpuEngine::Cuda => "cuda",
            GpuEngine::Metal => "metal",
            GpuEngine::Vulkan => "vulkan",
        }
    }

    /// 解析后端名称，`auto` 及空串返回 None（交给引擎选择）
    pub fn parse(s: &str) -> Result<Option<Self>, String> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(None),
            "cpu" => Ok(Some(GpuEngine::Cpu)),
            "cuda" => Ok(Some(GpuEngine::Cuda)),
            "metal" => Ok(Some(GpuEngine::Metal)),
            "vulkan" => Ok(Some(GpuEngine::Vulkan)),
            other => Err(format!("unknown gpu engine: {}", other)),
        }
    }
}

/// 推理会话配置 - 会话复用的唯一判定依据
///
/// 两次请求只有在所有字段完全相等时才共享同一个已加载引擎。
/// 不包含 session id；grammar 按文本比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub model_id: String,
    #[serde(default)]
    pub gpu_engine: Option<GpuEngine>,
    pub context_size: u32,
    pub flash_attention: bool,
    pub use_mmap: bool,
    #[serde(default)]
    pub grammar: Option<String>,
}

impl SessionConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            gpu_engine: None,
            context_size: DEFAULT_CONTEXT_SIZE,
            flash_attention: false,
            use_mmap: true,
            grammar: None,
        }
    }

    pub fn with_gpu_engine(mut self, gpu_engine: Option<GpuEngine>) -> Self {
        self.gpu_engine = gpu_engine;
        self
    }

    pub fn with_context_size(mut self, context_size: u32) -> Self {
        self.context_size = context_size;
        self
    }

    pub fn with_flash_attention(mut self, flash_attention: bool) -> Self {
        self.flash_attention = flash_attention;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn with_grammar(mut self, grammar: Option<String>) -> Self {
        self.grammar = grammar;
        self
    }
}

/// 重复惩罚参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatPenalty {
    #[serde(default)]
    pub last_tokens: Option<u32>,
    #[serde(default)]
    pub penalty: Option<f32>,
    #[serde(default)]
    pub frequency_penalty: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
}

/// 采样参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptions {
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub repeat_penalty: Option<RepeatPenalty>,
}

/// 对话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Model,
}

/// 对话历史条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(ChatRole::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(ChatRole::User, text)
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(ChatRole::Model, text)
    }
}
