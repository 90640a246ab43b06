//! inferd - 本地推理网关
//!
//! 通过 stdin/stdout 上的分帧 RPC 对外提供服务：
//! - 本地处理：prompt、会话、模型生命周期、任务
//! - 可选上游进程：其余调用类型原样转发

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::Context;
use inferd::application::ports::Transport;
use inferd::config::{load_config_from_path, print_config, IpcConfig, LogConfig};
use inferd::infrastructure::adapters::{FakeEngine, FakeEngineConfig};
use inferd::infrastructure::events::EventPublisher;
use inferd::infrastructure::inference::LlmSessionManager;
use inferd::infrastructure::ipc::{
    build_router, passthrough_handler, GatewayServices, RpcClient, RpcServer, ServerOptions,
    StreamTransport,
};
use inferd::infrastructure::persistence::{FileChatContextStore, FileModelRepository};
use inferd::infrastructure::tasks::TaskQueue;
use tokio::process::{Child, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config_from_path(config_path.as_deref())
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // stdout 是 IPC 通道，日志只能写 stderr
    init_tracing(&config.log);

    tracing::info!("inferd - local inference gateway");
    print_config(&config);

    // 确保数据目录存在
    for dir in [
        &config.storage.models_dir,
        &config.storage.assets_dir,
        &config.storage.contexts_dir,
    ] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let repository = Arc::new(FileModelRepository::new(
        &config.storage.models_dir,
        &config.storage.assets_dir,
    ));
    let chat_store = Arc::new(FileChatContextStore::new(
        &config.storage.contexts_dir,
        config.app.version.clone(),
    ));
    let publisher = EventPublisher::new().arc();
    let engine = FakeEngine::new(FakeEngineConfig::from(&config.engine)).arc();

    let session_manager = LlmSessionManager::new(
        engine,
        repository.clone(),
        chat_store,
        publisher.clone(),
        config.inference.auto_dispose(),
    )
    .arc();

    // 创建任务队列并启动 Worker
    let (task_queue, worker) = TaskQueue::new(publisher.clone());
    tokio::spawn(worker.run());

    let mut router = build_router(GatewayServices {
        inference: session_manager.clone(),
        repository,
        task_queue: task_queue.arc(),
        publisher,
    });

    // 上游进程（可选）
    let mut upstream = spawn_upstream(&config.ipc)?;
    if let Some((_, client)) = &upstream {
        for call_type in &config.ipc.upstream.forward_types {
            if router.contains(call_type) {
                tracing::warn!(call_type = %call_type, "Call type handled locally, not forwarding");
                continue;
            }
            router = router.route_arc(call_type.clone(), passthrough_handler(client.clone()));
        }
    }
    tracing::info!(call_types = ?router.call_types(), "Routes registered");

    // 在 stdin/stdout 上提供 RPC 服务
    let transport = StreamTransport::spawn(
        "stdio",
        tokio::io::stdin(),
        tokio::io::stdout(),
        config.ipc.max_message_size,
    );
    let closed = transport.closed();
    let (server, mut failures) = RpcServer::new(
        transport,
        router,
        ServerOptions {
            liveness_timeout: Some(config.ipc.liveness_timeout()),
        },
    );
    tokio::spawn(server.serve());

    tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            tracing::warn!(
                call_id = %failure.call_id,
                call_type = ?failure.call_type,
                code = failure.error.code(),
                error = %failure.error,
                "RPC call failed"
            );
        }
    });

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = closed.cancelled() => tracing::info!("IPC pipe closed"),
        _ = ctrl_c => tracing::info!("Received shutdown signal"),
    }

    session_manager.shutdown().await;
    if let Some((child, _)) = upstream.as_mut() {
        if let Err(e) = child.kill().await {
            tracing::warn!(error = %e, "Failed to stop upstream process");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let log_filter = format!("{},inferd={}", log.level, log.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if log.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// 启动上游进程，并在其 stdin/stdout 上建立 RPC 客户端
fn spawn_upstream(config: &IpcConfig) -> anyhow::Result<Option<(Child, Arc<RpcClient>)>> {
    let Some(program) = &config.upstream.program else {
        return Ok(None);
    };

    let mut child = Command::new(program)
        .args(&config.upstream.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to spawn upstream {}", program))?;

    let stdin = child
        .stdin
        .take()
        .context("Upstream stdin unavailable")?;
    let stdout = child
        .stdout
        .take()
        .context("Upstream stdout unavailable")?;

    let transport = StreamTransport::spawn(
        format!("upstream:{}", program),
        stdout,
        stdin,
        config.max_message_size,
    );
    let client = RpcClient::new(transport, config.client_options()).arc();

    tracing::info!(
        program = %program,
        pid = ?child.id(),
        forward_types = ?config.upstream.forward_types,
        "Upstream process started"
    );
    Ok(Some((child, client)))
}
