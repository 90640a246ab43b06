//! Fake Engine - 不做真实推理的本地引擎
//!
//! 把固定回复按词切片流式输出，用于联调与测试；对话历史用 bincode 存盘

use async_trait::async_trait;
use std::any::Any;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::application::ports::{
    ChatSession, ContextParams, EngineContext, EngineError, EngineGrammar, EngineModel,
    EnginePort, EngineState, GenerationRequest, ModelParams,
};
use crate::domain::inference::ChatMessage;

/// Fake Engine 配置
#[derive(Debug, Clone)]
pub struct FakeEngineConfig {
    /// 固定回复
    pub reply: String,
    /// 每个片段之间的延迟（毫秒）
    pub chunk_delay_ms: u64,
}

impl Default for FakeEngineConfig {
    fn default() -> Self {
        Self {
            reply: "This is a reply from the local fake engine.".to_string(),
            chunk_delay_ms: 20,
        }
    }
}

/// 生命周期日志（加载、创建、释放顺序）
pub type EngineJournal = Arc<Mutex<Vec<String>>>;

fn record(journal: &EngineJournal, entry: impl Into<String>) {
    if let Ok(mut journal) = journal.lock() {
        journal.push(entry.into());
    }
}

/// Fake Engine
pub struct FakeEngine {
    config: FakeEngineConfig,
    journal: EngineJournal,
}

impl FakeEngine {
    pub fn new(config: FakeEngineConfig) -> Self {
        tracing::info!(
            chunk_delay_ms = config.chunk_delay_ms,
            "FakeEngine initialized"
        );
        Self {
            config,
            journal: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new(FakeEngineConfig::default())
    }
}

#[async_trait]
impl EnginePort for FakeEngine {
    async fn load_model(
        &self,
        path: &Path,
        params: ModelParams,
    ) -> Result<Box<dyn EngineModel>, EngineError> {
        if tokio::fs::metadata(path).await.is_err() {
            return Err(EngineError::Load(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        tracing::debug!(
            path = %path.display(),
            use_mmap = params.use_mmap,
            gpu_engine = ?params.gpu_engine,
            "FakeEngine: model loaded"
        );
        record(&self.journal, "load model");

        Ok(Box::new(FakeModel {
            config: self.config.clone(),
            journal: self.journal.clone(),
            disposed: false,
        }))
    }
}

struct FakeModel {
    config: FakeEngineConfig,
    journal: EngineJournal,
    disposed: bool,
}

#[async_trait]
impl EngineModel for FakeModel {
    async fn create_context(
        &self,
        params: ContextParams,
    ) -> Result<Box<dyn EngineContext>, EngineError> {
        if self.disposed {
            return Err(EngineError::Context("model already disposed".to_string()));
        }
        if params.context_size == 0 {
            return Err(EngineError::Context("context size must be positive".to_string()));
        }
        if let Some(lora) = &params.lora_adapter_path {
            if tokio::fs::metadata(lora).await.is_err() {
                return Err(EngineError::Context(format!(
                    "lora adapter not found: {}",
                    lora.display()
                )));
            }
        }

        record(&self.journal, "create context");
        Ok(Box::new(FakeContext {
            config: self.config.clone(),
            journal: self.journal.clone(),
            disposed: false,
        }))
    }

    async fn compile_grammar(&self, source: &str) -> Result<Arc<dyn EngineGrammar>, EngineError> {
        if source.trim().is_empty() {
            return Err(EngineError::Grammar("grammar is empty".to_string()));
        }
        record(&self.journal, "compile grammar");
        Ok(Arc::new(FakeGrammar {
            source: source.to_string(),
        }))
    }

    async fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            record(&self.journal, "dispose model");
        }
    }
}

struct FakeContext {
    config: FakeEngineConfig,
    journal: EngineJournal,
    disposed: bool,
}

#[async_trait]
impl EngineContext for FakeContext {
    async fn create_session(&self) -> Result<Box<dyn ChatSession>, EngineError> {
        if self.disposed {
            return Err(EngineError::Context("context already disposed".to_string()));
        }
        record(&self.journal, "create session");
        Ok(Box::new(FakeChatSession {
            config: self.config.clone(),
            journal: self.journal.clone(),
            history: Vec::new(),
            disposed: false,
        }))
    }

    async fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            record(&self.journal, "dispose context");
        }
    }
}

struct FakeGrammar {
    source: String,
}

impl EngineGrammar for FakeGrammar {
    fn source(&self) -> &str {
        &self.source
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FakeChatSession {
    config: FakeEngineConfig,
    journal: EngineJournal,
    history: Vec<ChatMessage>,
    disposed: bool,
}

#[async_trait]
impl EngineState for FakeChatSession {
    async fn save_state(&self, path: &Path) -> Result<(), EngineError> {
        let bytes =
            bincode::serialize(&self.history).map_err(|e| EngineError::State(e.to_string()))?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| EngineError::State(e.to_string()))
    }

    async fn load_state(&mut self, path: &Path) -> Result<(), EngineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::State(e.to_string()))?;
        self.history =
            bincode::deserialize(&bytes).map_err(|e| EngineError::State(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ChatSession for FakeChatSession {
    fn history(&self) -> Vec<ChatMessage> {
        self.history.clone()
    }

    fn set_history(&mut self, history: Vec<ChatMessage>) {
        self.history = history;
    }

    fn reset(&mut self) {
        self.history.clear();
    }

    async fn prompt(
        &mut self,
        request: GenerationRequest<'_>,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<String, EngineError> {
        if self.disposed {
            return Err(EngineError::Generation("session already disposed".to_string()));
        }
        if let Some(grammar) = request.grammar {
            tracing::debug!(grammar_len = grammar.source().len(), "FakeEngine: grammar ignored");
        }

        let delay = Duration::from_millis(self.config.chunk_delay_ms);
        let mut text = String::new();
        for chunk in self.config.reply.split_inclusive(' ') {
            if request.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if !delay.is_zero() {
                tokio::select! {
                    _ = request.cancel.cancelled() => return Err(EngineError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            on_chunk(chunk);
            text.push_str(chunk);
        }

        self.history.push(ChatMessage::user(request.text));
        self.history.push(ChatMessage::model(text.clone()));
        Ok(text)
    }

    async fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            record(&self.journal, "dispose session");
        }
    }

    fn as_state(&self) -> &dyn EngineState {
        self
    }

    fn as_state_mut(&mut self) -> &mut dyn EngineState {
        self
    }
}
