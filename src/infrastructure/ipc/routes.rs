//! RPC Routes - 调用类型到应用层 handler 的映射

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

use super::server::{HandlerResult, InflightChannel, RpcRouter};
use crate::application::error::ApplicationError;
use crate::application::ports::{InferencePort, ModelRepositoryPort, TaskQueuePort, TaskTicket};
use crate::application::{
    CurrentTaskHandler, DisposeSessionCommand, DisposeSessionHandler, GetCurrentTask,
    GetModelStats, GetSessionStatus, InstallModel, InstallModelHandler, ListModels,
    ListModelsHandler, ModelStatsHandler, PromptChunk, PromptCommand, PromptHandler,
    SessionStatusHandler, UninstallModel, UninstallModelHandler, UpdateModel,
    UpdateModelHandler,
};
use crate::infrastructure::events::{EventPublisher, GatewayEvent};

/// 路由依赖的服务
#[derive(Clone)]
pub struct GatewayServices {
    pub inference: Arc<dyn InferencePort>,
    pub repository: Arc<dyn ModelRepositoryPort>,
    pub task_queue: Arc<dyn TaskQueuePort>,
    pub publisher: Arc<EventPublisher>,
}

fn to_value(value: impl Serialize) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| ApplicationError::internal(e.to_string()))
}

/// 构建本地调用的路由表
pub fn build_router(services: GatewayServices) -> RpcRouter {
    let prompt = Arc::new(PromptHandler::new(services.inference.clone()));
    let dispose = Arc::new(DisposeSessionHandler::new(services.inference.clone()));
    let status = Arc::new(SessionStatusHandler::new(services.inference.clone()));
    let list_models = Arc::new(ListModelsHandler::new(services.repository.clone()));
    let model_stats = Arc::new(ModelStatsHandler::new(services.repository.clone()));
    let install = Arc::new(InstallModelHandler::new(
        services.repository.clone(),
        services.task_queue.clone(),
    ));
    let update = Arc::new(UpdateModelHandler::new(
        services.repository.clone(),
        services.task_queue.clone(),
    ));
    let uninstall = Arc::new(UninstallModelHandler::new(
        services.repository.clone(),
        services.task_queue.clone(),
    ));
    let current_task = Arc::new(CurrentTaskHandler::new(services.task_queue.clone()));

    let install_events = services.publisher.clone();
    let update_events = services.publisher.clone();
    let uninstall_events = services.publisher.clone();
    let watch_events = services.publisher.clone();
    let watch_queue = current_task.clone();

    RpcRouter::new()
        .route("prompt", move |channel: InflightChannel| {
            let handler = prompt.clone();
            async move { run_prompt(&handler, &channel).await }
        })
        .route("session.dispose", move |channel: InflightChannel| {
            let handler = dispose.clone();
            async move {
                let cmd: DisposeSessionCommand = channel.parse_payload()?;
                to_value(handler.handle(cmd).await?)
            }
        })
        .route("session.status", move |_channel: InflightChannel| {
            let handler = status.clone();
            async move { to_value(handler.handle(GetSessionStatus)?) }
        })
        .route("model.list", move |_channel: InflightChannel| {
            let handler = list_models.clone();
            async move { to_value(handler.handle(ListModels).await?) }
        })
        .route("model.stats", move |channel: InflightChannel| {
            let handler = model_stats.clone();
            async move {
                let query: GetModelStats = channel.parse_payload()?;
                to_value(handler.handle(query).await?)
            }
        })
        .route("model.install", move |channel: InflightChannel| {
            let handler = install.clone();
            let events = install_events.subscribe();
            async move {
                let cmd: InstallModel = channel.parse_payload()?;
                let ticket = handler.submit(cmd).await?;
                follow_task(&channel, events, ticket).await
            }
        })
        .route("model.update", move |channel: InflightChannel| {
            let handler = update.clone();
            let events = update_events.subscribe();
            async move {
                let cmd: UpdateModel = channel.parse_payload()?;
                let ticket = handler.submit(cmd).await?;
                follow_task(&channel, events, ticket).await
            }
        })
        .route("model.uninstall", move |channel: InflightChannel| {
            let handler = uninstall.clone();
            let events = uninstall_events.subscribe();
            async move {
                let cmd: UninstallModel = channel.parse_payload()?;
                let ticket = handler.submit(cmd).await?;
                follow_task(&channel, events, ticket).await
            }
        })
        .route("task.current", move |_channel: InflightChannel| {
            let handler = current_task.clone();
            async move { to_value(handler.handle(GetCurrentTask)?) }
        })
        .route("task.watch", move |channel: InflightChannel| {
            let handler = watch_queue.clone();
            let events = watch_events.subscribe();
            async move { watch_tasks(&channel, &handler, events).await }
        })
}

async fn run_prompt(handler: &PromptHandler, channel: &InflightChannel) -> HandlerResult {
    let cmd: PromptCommand = channel.parse_payload()?;
    let mut on_chunk = |chunk: &str| {
        if let Err(e) = channel.emit(PromptChunk { chunk }) {
            tracing::debug!(call_id = %channel.id(), error = %e, "Dropping prompt chunk");
        }
    };
    let outcome = handler
        .handle(cmd, &mut on_chunk, channel.cancellation_token())
        .await?;
    to_value(outcome)
}

/// 转发本任务的快照，直到任务结束
///
/// 通道被取消时只停止跟踪，任务本身继续执行
async fn follow_task(
    channel: &InflightChannel,
    mut events: broadcast::Receiver<GatewayEvent>,
    ticket: TaskTicket,
) -> HandlerResult {
    let task_id = ticket.id().to_string();
    let cancel = channel.cancellation_token();
    let result = ticket.result();
    tokio::pin!(result);

    loop {
        // 事件先于结果发布，优先转发完缓冲中的快照
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApplicationError::Aborted),
            event = events.recv() => match event {
                Ok(GatewayEvent::TaskChanged { task: Some(task) }) if task.id == task_id => {
                    if let Err(e) = channel.emit(&task) {
                        tracing::debug!(call_id = %channel.id(), error = %e, "Dropping task snapshot");
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(call_id = %channel.id(), skipped, "Task follower lagged");
                }
                Err(RecvError::Closed) => return Ok(result.await?),
            },
            result = &mut result => return Ok(result?),
        }
    }
}

/// 推送当前任务及之后的每次变化，直到通道被取消
async fn watch_tasks(
    channel: &InflightChannel,
    current: &CurrentTaskHandler,
    mut events: broadcast::Receiver<GatewayEvent>,
) -> HandlerResult {
    let cancel = channel.cancellation_token();
    channel.emit(current.handle(GetCurrentTask)?)?;

    loop {
        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return Err(ApplicationError::Aborted),
            event = events.recv() => match event {
                Ok(GatewayEvent::TaskChanged { task }) => task,
                Ok(_) => continue,
                // 丢失了中间状态，直接补发最新状态
                Err(RecvError::Lagged(_)) => current.handle(GetCurrentTask)?,
                Err(RecvError::Closed) => return Ok(Value::Null),
            },
        };
        channel.emit(snapshot)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ChatContextPort;
    use crate::domain::model::{AssetRole, ModelAsset, ModelManifest};
    use crate::infrastructure::adapters::engine::{FakeEngine, FakeEngineConfig};
    use crate::infrastructure::inference::{LlmSessionManager, DEFAULT_AUTO_DISPOSE};
    use crate::infrastructure::ipc::client::{ClientOptions, RpcClient, RpcError};
    use crate::infrastructure::ipc::server::{RpcServer, ServerOptions};
    use crate::infrastructure::ipc::transport::PortTransport;
    use crate::infrastructure::persistence::{FileChatContextStore, FileModelRepository};
    use crate::infrastructure::tasks::TaskQueue;
    use serde_json::json;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct Gateway {
        dir: TempDir,
        client: Arc<RpcClient>,
        repository: Arc<FileModelRepository>,
    }

    fn gateway(chunk_delay_ms: u64) -> Gateway {
        let dir = tempfile::tempdir().unwrap();
        let repository = Arc::new(FileModelRepository::new(
            dir.path().join("models"),
            dir.path().join("assets"),
        ));
        let chat_store: Arc<dyn ChatContextPort> = Arc::new(FileChatContextStore::new(
            dir.path().join("contexts"),
            "test",
        ));
        let publisher = EventPublisher::new().arc();
        let engine = FakeEngine::new(FakeEngineConfig {
            reply: "hello there friend".to_string(),
            chunk_delay_ms,
        })
        .arc();
        let inference = LlmSessionManager::new(
            engine,
            repository.clone(),
            chat_store,
            publisher.clone(),
            DEFAULT_AUTO_DISPOSE,
        )
        .arc();
        let (queue, worker) = TaskQueue::new(publisher.clone());
        tokio::spawn(worker.run());

        let router = build_router(GatewayServices {
            inference,
            repository: repository.clone(),
            task_queue: queue.arc(),
            publisher,
        });
        let (client_end, server_end) = PortTransport::pair("client", "server");
        let (server, _failures) = RpcServer::new(server_end, router, ServerOptions::default());
        tokio::spawn(server.serve());

        Gateway {
            dir,
            client: RpcClient::new(client_end, ClientOptions::default()).arc(),
            repository,
        }
    }

    fn download(g: &Gateway) -> PathBuf {
        let source = g.dir.path().join("download");
        std::fs::create_dir_all(source.join("gemma")).unwrap();
        std::fs::write(source.join("gemma/w.gguf"), b"weights").unwrap();
        source
    }

    fn manifest() -> ModelManifest {
        ModelManifest {
            id: "gemma".to_string(),
            version: "1".to_string(),
            name: None,
            assets: vec![ModelAsset {
                path: "gemma/w.gguf".to_string(),
                role: AssetRole::Model,
                size: None,
            }],
        }
    }

    async fn install(g: &Gateway) -> Vec<Value> {
        let payload = json!({ "manifest": manifest(), "sourceDir": download(g) });
        let mut snapshots = Vec::new();
        let result = g
            .client
            .stream(
                "model.install",
                payload,
                |v| snapshots.push(v),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result["modelId"], "gemma");
        snapshots
    }

    fn prompt_payload(session_id: &str) -> Value {
        json!({ "sessionId": session_id, "modelId": "gemma", "prompt": "hi" })
    }

    #[tokio::test]
    async fn test_install_then_prompt_then_dispose() {
        let g = gateway(0);
        let snapshots = install(&g).await;
        assert!(!snapshots.is_empty());
        assert!(snapshots.iter().all(|s| s["type"] == "install"));
        assert_eq!(snapshots.last().unwrap()["progress"], json!(1.0));

        let models = g
            .client
            .request("model.list", Value::Null, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(models[0]["id"], "gemma");

        let mut chunks = Vec::new();
        let outcome = g
            .client
            .stream(
                "prompt",
                prompt_payload("s1"),
                |v| chunks.push(v["chunk"].as_str().unwrap_or_default().to_string()),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome["text"], "hello there friend");
        assert_eq!(outcome["reused"], false);
        assert_eq!(chunks.concat(), "hello there friend");

        let status = g
            .client
            .request("session.status", Value::Null, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status["loaded"]["modelId"], "gemma");
        assert_eq!(status["sessionIds"], json!(["s1"]));

        let stats = g
            .client
            .request("model.stats", json!({"modelId": "gemma"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(stats["usedTS"].is_i64());

        let disposed = g
            .client
            .request("session.dispose", json!({"sessionId": "s1"}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(disposed, json!({"released": true}));
    }

    #[tokio::test]
    async fn test_second_prompt_while_generating_is_busy() {
        let g = gateway(40);
        install(&g).await;

        let client = g.client.clone();
        let first = tokio::spawn(async move {
            client
                .request("prompt", prompt_payload("s1"), CancellationToken::new())
                .await
        });
        while g.repository.stats("gemma").await.unwrap().used_ts.is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let err = g
            .client
            .request("prompt", prompt_payload("s2"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rejected { ref code, .. } if code == "busy"));
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_errors_carry_codes() {
        let g = gateway(0);

        let err = g
            .client
            .request("prompt", prompt_payload("s1"), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rejected { ref code, .. } if code == "not_found"));

        let err = g
            .client
            .request("model.stats", json!({"model": 1}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rejected { ref code, .. } if code == "validation"));

        let err = g
            .client
            .request("model.uninstall", json!({"modelId": "gemma"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Rejected { ref code, .. } if code == "not_found"));
    }

    #[tokio::test]
    async fn test_task_watch_reports_transitions_until_aborted() {
        let g = gateway(0);
        let seen = Arc::new(Mutex::new(Vec::<Value>::new()));
        let cancel = CancellationToken::new();

        let watcher = {
            let client = g.client.clone();
            let seen = seen.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                client
                    .stream(
                        "task.watch",
                        Value::Null,
                        move |v| seen.lock().unwrap().push(v),
                        cancel,
                    )
                    .await
            })
        };
        // 初始状态：空闲
        while seen.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        install(&g).await;
        let settled = || {
            let seen = seen.lock().unwrap();
            seen.len() >= 3 && seen.last() == Some(&Value::Null)
        };
        while !settled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        assert!(matches!(watcher.await.unwrap(), Err(RpcError::Aborted)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Value::Null);
        assert_eq!(seen[1]["type"], "install");

        let current = g
            .client
            .request("task.current", Value::Null, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(current, Value::Null);
    }
}
