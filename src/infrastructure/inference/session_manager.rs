//! LLM Session Manager Implementation
//!
//! 进程内唯一的引擎持有者：
//! - 配置完全相等时复用，否则卸载后重新加载
//! - 同一时刻最多一个生成，并发调用立即返回 Busy
//! - 空闲超时后自动卸载

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    ChatContextPort, ChatSession, ContextParams, EngineContext, EngineError, EngineGrammar,
    EngineModel, EnginePort, ExecuteOutcome, ExecuteRequest, GenerationRequest, InferencePort,
    ModelParams, ModelRepositoryPort, RepositoryError, SessionError, SessionStatus,
};
use crate::domain::inference::SessionConfig;
use crate::domain::model::{ModelIdentity, StatsDelta};
use crate::infrastructure::events::EventPublisher;

/// 默认空闲卸载时间
pub const DEFAULT_AUTO_DISPOSE: Duration = Duration::from_secs(300);

/// 已加载的引擎句柄
struct LoadedSession {
    config: SessionConfig,
    identity: ModelIdentity,
    model: Option<Box<dyn EngineModel>>,
    context: Option<Box<dyn EngineContext>>,
    chat: Option<Box<dyn ChatSession>>,
    grammar: Option<Arc<dyn EngineGrammar>>,
}

impl LoadedSession {
    /// 按 chat → context → model 顺序释放，已释放的句柄跳过
    async fn release(&mut self) {
        if let Some(mut chat) = self.chat.take() {
            chat.dispose().await;
        }
        if let Some(mut context) = self.context.take() {
            context.dispose().await;
        }
        self.grammar = None;
        if let Some(mut model) = self.model.take() {
            model.dispose().await;
        }
    }
}

/// 卸载条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReleaseMode {
    /// 空闲超时：不再等待逻辑会话释放
    Idle,
    /// 显式 dispose：只有没有逻辑会话引用时才卸载
    Unreferenced,
}

impl ReleaseMode {
    fn reason(&self) -> &'static str {
        match self {
            ReleaseMode::Idle => "idle",
            ReleaseMode::Unreferenced => "disposed",
        }
    }
}

struct ManagerInner {
    engine: Arc<dyn EnginePort>,
    repository: Arc<dyn ModelRepositoryPort>,
    chat_store: Arc<dyn ChatContextPort>,
    publisher: Arc<EventPublisher>,
    idle_timeout: Duration,

    busy: AtomicBool,
    loaded: tokio::sync::Mutex<Option<LoadedSession>>,
    /// status() 用的同步副本
    loaded_config: Mutex<Option<SessionConfig>>,
    session_ids: Mutex<HashSet<String>>,
    /// session id -> tracking id
    tracked: Mutex<HashMap<String, String>>,
    auto_dispose: Mutex<Option<JoinHandle<()>>>,

    loads: AtomicU64,
    reuses: AtomicU64,
    disposals: AtomicU64,
}

/// 生成期间持有；drop 时清除 busy 并重新安排卸载
struct FlightGuard {
    inner: Arc<ManagerInner>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.busy.store(false, Ordering::SeqCst);
        self.inner.finish_flight();
    }
}

impl ManagerInner {
    fn session_ids_empty(&self) -> bool {
        self.session_ids.lock().map(|ids| ids.is_empty()).unwrap_or(true)
    }

    fn set_loaded_config(&self, config: Option<SessionConfig>) {
        if let Ok(mut loaded) = self.loaded_config.lock() {
            *loaded = config;
        }
    }

    fn cancel_auto_dispose(&self) {
        if let Some(handle) = self.auto_dispose.lock().ok().and_then(|mut h| h.take()) {
            handle.abort();
        }
    }

    fn arm_auto_dispose(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let timeout = self.idle_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                // 卸载放到独立任务中，计时器被 abort 时不会中断释放过程
                tokio::spawn(async move {
                    inner.release(ReleaseMode::Idle).await;
                });
            }
        });

        if let Ok(mut slot) = self.auto_dispose.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    /// 生成结束后：没有逻辑会话引用则立即卸载，否则重新计时
    fn finish_flight(self: &Arc<Self>) {
        let loaded = self
            .loaded_config
            .lock()
            .map(|c| c.is_some())
            .unwrap_or(false);

        if loaded && self.session_ids_empty() {
            let inner = self.clone();
            tokio::spawn(async move {
                inner.release(ReleaseMode::Unreferenced).await;
            });
        } else {
            self.arm_auto_dispose();
        }
    }

    async fn release(&self, mode: ReleaseMode) -> bool {
        let mut loaded = self.loaded.lock().await;
        if self.busy.load(Ordering::SeqCst) {
            return false;
        }
        if mode == ReleaseMode::Unreferenced && !self.session_ids_empty() {
            return false;
        }
        let Some(mut session) = loaded.take() else {
            return false;
        };

        session.release().await;
        drop(loaded);

        if let Ok(mut ids) = self.session_ids.lock() {
            ids.clear();
        }
        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.clear();
        }
        self.set_loaded_config(None);
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.publisher
            .publish_session_disposed(&session.config.model_id, mode.reason());

        tracing::info!(
            model_id = %session.config.model_id,
            reason = mode.reason(),
            "Engine released"
        );
        true
    }

    async fn load(&self, config: &SessionConfig) -> Result<LoadedSession, SessionError> {
        let manifest = self
            .repository
            .manifest(&config.model_id)
            .await
            .map_err(repository_error)?;
        let files = self
            .repository
            .model_files(&config.model_id)
            .await
            .map_err(repository_error)?;

        let mut session = LoadedSession {
            config: config.clone(),
            identity: manifest.identity(),
            model: None,
            context: None,
            chat: None,
            grammar: None,
        };

        let model = session.model.insert(
            self.engine
                .load_model(
                    &files.model,
                    ModelParams {
                        use_mmap: config.use_mmap,
                        gpu_engine: config.gpu_engine,
                    },
                )
                .await?,
        );

        let prepared = async {
            let context = model
                .create_context(ContextParams {
                    context_size: config.context_size,
                    flash_attention: config.flash_attention,
                    lora_adapter_path: files.lora_adapter.clone(),
                })
                .await?;
            let grammar = match &config.grammar {
                Some(source) => Some(model.compile_grammar(source).await?),
                None => None,
            };
            Ok::<_, EngineError>((context, grammar))
        }
        .await;

        let (context, grammar) = match prepared {
            Ok(parts) => parts,
            Err(e) => {
                session.release().await;
                return Err(e.into());
            }
        };
        let context = session.context.insert(context);
        session.grammar = grammar;

        let created = context.create_session().await;
        match created {
            Ok(chat) => session.chat = Some(chat),
            Err(e) => {
                session.release().await;
                return Err(e.into());
            }
        }

        tracing::info!(
            model_id = %config.model_id,
            model_version = %session.identity.version,
            context_size = config.context_size,
            gpu_engine = ?config.gpu_engine,
            grammar = config.grammar.is_some(),
            "Engine loaded"
        );
        Ok(session)
    }

    async fn run(
        &self,
        request: ExecuteRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, SessionError> {
        let mut loaded = self.loaded.lock().await;

        let reused = matches!(loaded.as_ref(), Some(s) if s.config == request.config);
        if reused {
            self.reuses.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                session_id = %request.session_id,
                model_id = %request.config.model_id,
                "Reusing loaded engine"
            );
        } else {
            if let Some(mut old) = loaded.take() {
                old.release().await;
                self.set_loaded_config(None);
                self.disposals.fetch_add(1, Ordering::SeqCst);
                self.publisher
                    .publish_session_disposed(&old.config.model_id, "reload");
                if let Ok(mut ids) = self.session_ids.lock() {
                    ids.clear();
                }
            }
            *loaded = Some(self.load(&request.config).await?);
            self.set_loaded_config(Some(request.config.clone()));
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.publisher
                .publish_session_loaded(&request.config.model_id);
        }

        if let Ok(mut ids) = self.session_ids.lock() {
            ids.insert(request.session_id.clone());
        }

        let Some(session) = loaded.as_mut() else {
            return Err(EngineError::Context("engine not loaded".to_string()).into());
        };
        let LoadedSession {
            identity,
            chat,
            grammar,
            ..
        } = session;
        let Some(chat) = chat.as_mut() else {
            return Err(EngineError::Context("chat session released".to_string()).into());
        };

        if let Err(e) = self
            .repository
            .update_stats(
                &identity.id,
                StatsDelta::used_at(chrono::Utc::now().timestamp_millis()),
            )
            .await
        {
            tracing::warn!(model_id = %identity.id, error = %e, "Failed to record model usage");
        }

        chat.reset();
        if let Some(context) = &request.context {
            let mut restored = false;
            if let Some(hash) = &context.expected_hash {
                match self
                    .chat_store
                    .load(&context.tracking_id, identity, hash, chat.as_state_mut())
                    .await
                {
                    Ok(Some(history)) => {
                        chat.set_history(history);
                        restored = true;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(tracking_id = %context.tracking_id, error = %e, "Failed to restore chat context");
                    }
                }
            }
            if !restored {
                chat.reset();
                chat.set_history(context.history.clone());
            }
            tracing::debug!(
                session_id = %request.session_id,
                tracking_id = %context.tracking_id,
                restored,
                "Chat context prepared"
            );
            if let Ok(mut tracked) = self.tracked.lock() {
                tracked.insert(request.session_id.clone(), context.tracking_id.clone());
            }
        }

        if cancel.is_cancelled() {
            return Err(SessionError::Aborted);
        }

        let text = chat
            .prompt(
                GenerationRequest {
                    text: &request.prompt,
                    options: &request.options,
                    grammar: grammar.as_deref(),
                    cancel: &cancel,
                },
                on_chunk,
            )
            .await
            .map_err(|e| match e {
                EngineError::Cancelled => SessionError::Aborted,
                other => SessionError::Engine(other),
            })?;

        let history_hash = match &request.context {
            Some(context) => {
                let history = chat.history();
                match self
                    .chat_store
                    .save(&context.tracking_id, identity, chat.as_state(), &history)
                    .await
                {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        tracing::warn!(tracking_id = %context.tracking_id, error = %e, "Failed to save chat context");
                        None
                    }
                }
            }
            None => None,
        };

        Ok(ExecuteOutcome {
            text,
            history_hash,
            reused,
        })
    }
}

fn repository_error(err: RepositoryError) -> SessionError {
    match err {
        RepositoryError::NotFound(id) => SessionError::ModelNotFound(id),
        other => SessionError::Repository(other.to_string()),
    }
}

/// LLM 会话管理器
pub struct LlmSessionManager {
    inner: Arc<ManagerInner>,
}

impl LlmSessionManager {
    pub fn new(
        engine: Arc<dyn EnginePort>,
        repository: Arc<dyn ModelRepositoryPort>,
        chat_store: Arc<dyn ChatContextPort>,
        publisher: Arc<EventPublisher>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                engine,
                repository,
                chat_store,
                publisher,
                idle_timeout,
                busy: AtomicBool::new(false),
                loaded: tokio::sync::Mutex::new(None),
                loaded_config: Mutex::new(None),
                session_ids: Mutex::new(HashSet::new()),
                tracked: Mutex::new(HashMap::new()),
                auto_dispose: Mutex::new(None),
                loads: AtomicU64::new(0),
                reuses: AtomicU64::new(0),
                disposals: AtomicU64::new(0),
            }),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 立即卸载引擎（进程退出时使用）
    pub async fn shutdown(&self) {
        self.inner.cancel_auto_dispose();
        if self.inner.release(ReleaseMode::Idle).await {
            tracing::info!("Engine released on shutdown");
        }
    }
}

#[async_trait]
impl InferencePort for LlmSessionManager {
    async fn execute(
        &self,
        request: ExecuteRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
        cancel: CancellationToken,
    ) -> Result<ExecuteOutcome, SessionError> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(session_id = %request.session_id, "Rejecting concurrent generation");
            return Err(SessionError::Busy);
        }
        let _flight = FlightGuard {
            inner: self.inner.clone(),
        };
        self.inner.cancel_auto_dispose();

        let session_id = request.session_id.clone();
        let result = self.inner.run(request, on_chunk, cancel).await;
        match &result {
            Ok(outcome) => tracing::debug!(
                session_id = %session_id,
                reused = outcome.reused,
                chars = outcome.text.len(),
                "Generation completed"
            ),
            Err(e) => tracing::info!(session_id = %session_id, error = %e, "Generation failed"),
        }
        result
    }

    async fn dispose(&self, session_id: &str) -> bool {
        let tracking_id = self
            .inner
            .tracked
            .lock()
            .ok()
            .and_then(|mut tracked| tracked.remove(session_id));
        if let Some(tracking_id) = tracking_id {
            if let Err(e) = self.inner.chat_store.remove(&tracking_id).await {
                tracing::warn!(tracking_id = %tracking_id, error = %e, "Failed to remove chat context");
            }
        }

        let (removed, empty) = match self.inner.session_ids.lock() {
            Ok(mut ids) => (ids.remove(session_id), ids.is_empty()),
            Err(_) => (false, false),
        };
        tracing::debug!(session_id = %session_id, removed, "Session disposed");

        // 生成进行中时由其完成回调负责卸载
        if !removed || !empty || self.inner.busy.load(Ordering::SeqCst) {
            return false;
        }
        self.inner.release(ReleaseMode::Unreferenced).await
    }

    fn status(&self) -> SessionStatus {
        let mut session_ids: Vec<String> = self
            .inner
            .session_ids
            .lock()
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();
        session_ids.sort();

        SessionStatus {
            loaded: self.inner.loaded_config.lock().ok().and_then(|c| c.clone()),
            session_ids,
            busy: self.inner.busy.load(Ordering::SeqCst),
            loads: self.inner.loads.load(Ordering::SeqCst),
            reuses: self.inner.reuses.load(Ordering::SeqCst),
            disposals: self.inner.disposals.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{history_hash, ContextRequest};
    use crate::domain::inference::{ChatMessage, PromptOptions};
    use crate::domain::model::{AssetRole, ModelAsset, ModelManifest};
    use crate::infrastructure::adapters::engine::{FakeEngine, FakeEngineConfig};
    use crate::infrastructure::persistence::{FileChatContextStore, FileModelRepository};
    use std::path::Path;
    use tempfile::TempDir;

    const REPLY: &str = "fine thanks";

    struct Fixture {
        _dir: TempDir,
        engine: Arc<FakeEngine>,
        repository: Arc<FileModelRepository>,
        chat_store: Arc<FileChatContextStore>,
        manager: Arc<LlmSessionManager>,
    }

    async fn install(repository: &FileModelRepository, root: &Path, id: &str) {
        let path = format!("{}/w.gguf", id);
        let file = root.join("assets").join(&path);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"weights").unwrap();
        repository
            .write_manifest(&ModelManifest {
                id: id.to_string(),
                version: "1".to_string(),
                name: None,
                assets: vec![ModelAsset {
                    path,
                    role: AssetRole::Model,
                    size: None,
                }],
            })
            .await
            .unwrap();
    }

    async fn fixture(chunk_delay_ms: u64, idle_timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(FileModelRepository::new(
            dir.path().join("models"),
            dir.path().join("assets"),
        ));
        install(&repository, dir.path(), "gemma").await;
        install(&repository, dir.path(), "phi").await;

        let engine = FakeEngine::new(FakeEngineConfig {
            reply: REPLY.to_string(),
            chunk_delay_ms,
        })
        .arc();
        let chat_store = Arc::new(FileChatContextStore::new(
            dir.path().join("contexts"),
            "test",
        ));
        let manager = LlmSessionManager::new(
            engine.clone(),
            repository.clone(),
            chat_store.clone(),
            EventPublisher::new().arc(),
            idle_timeout,
        )
        .arc();

        Fixture {
            _dir: dir,
            engine,
            repository,
            chat_store,
            manager,
        }
    }

    fn request(session_id: &str, config: SessionConfig) -> ExecuteRequest {
        ExecuteRequest {
            session_id: session_id.to_string(),
            config,
            prompt: "how are you".to_string(),
            options: PromptOptions::default(),
            context: None,
        }
    }

    async fn run(manager: &LlmSessionManager, req: ExecuteRequest) -> Result<ExecuteOutcome, SessionError> {
        manager
            .execute(req, &mut |_: &str| {}, CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_identical_config_reuses_engine() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        let config = SessionConfig::new("gemma");

        let first = run(&f.manager, request("s1", config.clone())).await.unwrap();
        let second = run(&f.manager, request("s2", config)).await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(second.text, REPLY);
        let status = f.manager.status();
        assert_eq!((status.loads, status.reuses, status.disposals), (1, 1, 0));
        assert_eq!(status.session_ids, vec!["s1", "s2"]);
        let loads = f.engine.journal().iter().filter(|e| *e == "load model").count();
        assert_eq!(loads, 1);
    }

    #[tokio::test]
    async fn test_changed_config_reloads_once_in_release_order() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;

        run(&f.manager, request("s1", SessionConfig::new("gemma")))
            .await
            .unwrap();
        let outcome = run(
            &f.manager,
            request("s1", SessionConfig::new("gemma").with_context_size(1024)),
        )
        .await
        .unwrap();

        assert!(!outcome.reused);
        let status = f.manager.status();
        assert_eq!((status.loads, status.disposals), (2, 1));
        assert_eq!(
            status.loaded.map(|c| c.context_size),
            Some(1024)
        );

        let journal = f.engine.journal();
        let start = journal.iter().position(|e| e == "dispose session").unwrap();
        assert_eq!(
            &journal[start..start + 4],
            &["dispose session", "dispose context", "dispose model", "load model"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_execute_is_busy() {
        let f = fixture(30, DEFAULT_AUTO_DISPOSE).await;
        let manager = f.manager.clone();
        let first = tokio::spawn(async move {
            run(&manager, request("s1", SessionConfig::new("gemma"))).await
        });

        while !f.manager.status().busy {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let second = run(&f.manager, request("s2", SessionConfig::new("phi"))).await;

        assert!(matches!(second, Err(SessionError::Busy)));
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.text, REPLY);
        assert_eq!(f.manager.status().loads, 1);
    }

    #[tokio::test]
    async fn test_cancellation_maps_to_aborted() {
        let f = fixture(50, DEFAULT_AUTO_DISPOSE).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = f
            .manager
            .execute(
                request("s1", SessionConfig::new("gemma")),
                &mut move |_: &str| trigger.cancel(),
                cancel,
            )
            .await;

        assert!(matches!(result, Err(SessionError::Aborted)));
        assert!(!f.manager.status().busy);
        assert!(run(&f.manager, request("s1", SessionConfig::new("gemma")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_missing_model_is_reported() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        let result = run(&f.manager, request("s1", SessionConfig::new("nope"))).await;

        assert!(matches!(result, Err(SessionError::ModelNotFound(id)) if id == "nope"));
        assert!(!f.manager.status().busy);
        assert!(f.manager.status().loaded.is_none());
    }

    #[tokio::test]
    async fn test_dispose_releases_when_last_session_leaves() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        let config = SessionConfig::new("gemma");
        run(&f.manager, request("s1", config.clone())).await.unwrap();
        run(&f.manager, request("s2", config)).await.unwrap();

        assert!(!f.manager.dispose("s1").await);
        assert!(f.manager.status().loaded.is_some());
        assert!(!f.manager.dispose("unknown").await);

        assert!(f.manager.dispose("s2").await);
        let status = f.manager.status();
        assert!(status.loaded.is_none());
        assert_eq!(status.disposals, 1);
        assert!(f.engine.journal().contains(&"dispose model".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_engine_is_released_automatically() {
        let f = fixture(0, Duration::from_secs(60)).await;
        run(&f.manager, request("s1", SessionConfig::new("gemma")))
            .await
            .unwrap();
        assert!(f.manager.status().loaded.is_some());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(f.manager.status().loaded.is_some());

        tokio::time::sleep(Duration::from_secs(31)).await;
        for _ in 0..50 {
            if f.manager.status().loaded.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let status = f.manager.status();
        assert!(status.loaded.is_none());
        assert!(status.session_ids.is_empty());
        assert_eq!(status.disposals, 1);
    }

    #[tokio::test]
    async fn test_usage_timestamp_is_recorded() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        run(&f.manager, request("s1", SessionConfig::new("gemma")))
            .await
            .unwrap();

        let stats = f.repository.stats("gemma").await.unwrap();
        assert!(stats.used_ts.is_some());
    }

    #[tokio::test]
    async fn test_chat_context_is_checkpointed_and_restored() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        let config = SessionConfig::new("gemma");

        let mut first = request("s1", config.clone());
        first.prompt = "first".to_string();
        first.context = Some(ContextRequest {
            tracking_id: "conv".to_string(),
            expected_hash: None,
            history: vec![],
        });
        let hash = run(&f.manager, first).await.unwrap().history_hash.unwrap();

        let mut second = request("s1", config.clone());
        second.prompt = "second".to_string();
        second.context = Some(ContextRequest {
            tracking_id: "conv".to_string(),
            expected_hash: Some(hash),
            history: vec![],
        });
        let restored = run(&f.manager, second).await.unwrap();

        let expected = vec![
            ChatMessage::user("first"),
            ChatMessage::model(REPLY),
            ChatMessage::user("second"),
            ChatMessage::model(REPLY),
        ];
        assert_eq!(restored.history_hash, Some(history_hash(&expected).unwrap()));

        // 过期 hash：用请求中提供的历史重建
        let mut stale = request("s1", config);
        stale.prompt = "third".to_string();
        stale.context = Some(ContextRequest {
            tracking_id: "conv".to_string(),
            expected_hash: Some("stale".to_string()),
            history: vec![ChatMessage::system("be brief")],
        });
        let rebuilt = run(&f.manager, stale).await.unwrap();
        let expected = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("third"),
            ChatMessage::model(REPLY),
        ];
        assert_eq!(rebuilt.history_hash, Some(history_hash(&expected).unwrap()));
    }

    #[tokio::test]
    async fn test_dispose_removes_tracked_context() {
        let f = fixture(0, DEFAULT_AUTO_DISPOSE).await;
        let mut req = request("s1", SessionConfig::new("gemma"));
        req.context = Some(ContextRequest {
            tracking_id: "conv".to_string(),
            expected_hash: None,
            history: vec![],
        });
        let hash = run(&f.manager, req).await.unwrap().history_hash.unwrap();
        let context_dir = f.chat_store.context_dir("conv");
        assert!(context_dir.join("context.json").exists());

        f.manager.dispose("s1").await;
        assert!(!context_dir.join("context.json").exists());
        assert!(!hash.is_empty());
    }
}
