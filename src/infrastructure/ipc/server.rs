//! RPC Server
//!
//! 绑定一个 Transport 和 `type → handler` 路由表，为每个 Open 建立 InflightChannel

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::error::ApplicationError;
use crate::application::ports::{Listener, Transport, TransportError};
use crate::domain::ipc::{IpcMessage, IpcType};

/// Handler 返回值
pub type HandlerResult = Result<Value, ApplicationError>;

/// RPC Handler
pub trait RpcHandler: Send + Sync {
    fn call(&self, channel: InflightChannel) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> RpcHandler for F
where
    F: Fn(InflightChannel) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, channel: InflightChannel) -> BoxFuture<'static, HandlerResult> {
        Box::pin(self(channel))
    }
}

/// 路由表
#[derive(Clone, Default)]
pub struct RpcRouter {
    routes: HashMap<String, Arc<dyn RpcHandler>>,
}

impl RpcRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册调用类型，重复注册时后者覆盖前者
    pub fn route<F, Fut>(self, call_type: impl Into<String>, handler: F) -> Self
    where
        F: Fn(InflightChannel) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route_arc(call_type, Arc::new(handler))
    }

    pub fn route_arc(mut self, call_type: impl Into<String>, handler: Arc<dyn RpcHandler>) -> Self {
        self.routes.insert(call_type.into(), handler);
        self
    }

    pub fn contains(&self, call_type: &str) -> bool {
        self.routes.contains_key(call_type)
    }

    pub fn call_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.routes.keys().cloned().collect();
        types.sort();
        types
    }

    fn get(&self, call_type: &str) -> Option<Arc<dyn RpcHandler>> {
        self.routes.get(call_type).cloned()
    }
}

/// 服务端选项
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    /// 超过该时长未收到 Ping 的通道视为客户端已失联；None 表示不检查
    pub liveness_timeout: Option<Duration>,
}

/// 已回复客户端之后上报给服务端调用方的错误
#[derive(Debug)]
pub struct HandlerFailure {
    pub call_id: String,
    pub call_type: Option<String>,
    pub error: ApplicationError,
}

struct ChannelEntry {
    serial: u64,
    token: CancellationToken,
    deadline: Mutex<Instant>,
}

struct ServerShared {
    transport: Arc<dyn Transport>,
    channels: DashMap<String, ChannelEntry>,
    next_serial: AtomicU64,
    liveness_timeout: Option<Duration>,
    failures: mpsc::UnboundedSender<HandlerFailure>,
}

impl ServerShared {
    fn deadline(&self) -> Instant {
        let timeout = self
            .liveness_timeout
            .unwrap_or(Duration::from_secs(365 * 24 * 3600));
        Instant::now() + timeout
    }

    fn report(&self, call_id: &str, call_type: Option<String>, error: ApplicationError) {
        let _ = self.failures.send(HandlerFailure {
            call_id: call_id.to_string(),
            call_type,
            error,
        });
    }

    fn send(&self, message: IpcMessage) -> Result<(), TransportError> {
        self.transport.send(&message)
    }

    /// 从表中摘除通道；只有摘除成功的一方可以发送终止消息
    fn take(&self, id: &str, serial: u64) -> bool {
        self.channels
            .remove_if(id, |_, entry| entry.serial == serial)
            .is_some()
    }

    fn finish(&self, id: String, serial: u64, call_type: String, result: HandlerResult) {
        if !self.take(&id, serial) {
            tracing::debug!(call_id = %id, call_type = %call_type, "Discarding result of closed channel");
            return;
        }

        match result {
            Ok(value) => {
                if let Err(e) = self.send(IpcMessage::resolve(id.clone(), value)) {
                    // 结果发不出去时退化为 Reject，客户端不会一直等下去
                    let error = ApplicationError::from(e);
                    let _ = self.send(IpcMessage::reject(id.clone(), error.to_reject_payload()));
                    self.report(&id, Some(call_type), error);
                }
            }
            Err(error) => {
                if let Err(e) = self.send(IpcMessage::reject(id.clone(), error.to_reject_payload())) {
                    tracing::debug!(call_id = %id, error = %e, "Failed to send reject");
                }
                self.report(&id, Some(call_type), error);
            }
        }
    }

    fn teardown_all(&self) {
        for entry in self.channels.iter() {
            entry.token.cancel();
        }
        self.channels.clear();
    }
}

/// 服务端一次调用的上下文
pub struct InflightChannel {
    id: String,
    call_type: String,
    payload: Value,
    token: CancellationToken,
    serial: u64,
    shared: Arc<ServerShared>,
}

impl InflightChannel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn call_type(&self) -> &str {
        &self.call_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// 按目标类型解析载荷，失败时返回验证错误
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, ApplicationError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ApplicationError::validation(format!("Invalid {} payload: {}", self.call_type, e))
        })
    }

    /// Abort、失联或断开时触发
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_live(&self) -> bool {
        !self.token.is_cancelled()
            && self
                .shared
                .channels
                .get(&self.id)
                .map(|entry| entry.serial == self.serial)
                .unwrap_or(false)
    }

    /// 发送一条 Emit；通道已终止时返回 Disconnected
    pub fn emit(&self, value: impl Serialize) -> Result<(), TransportError> {
        if !self.is_live() {
            return Err(TransportError::Disconnected(format!(
                "channel {} is closed",
                self.id
            )));
        }
        let value =
            serde_json::to_value(value).map_err(|e| TransportError::Serialization(e.to_string()))?;
        self.shared.send(IpcMessage::emit(self.id.clone(), value))
    }
}

/// RPC 服务端
pub struct RpcServer {
    shared: Arc<ServerShared>,
    router: RpcRouter,
    listener: Option<Listener>,
}

impl RpcServer {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: RpcRouter,
        options: ServerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<HandlerFailure>) {
        let (failures, failures_rx) = mpsc::unbounded_channel();
        // 构造时就注册监听器，serve 任务启动前到达的消息不会丢失
        let listener = transport.listen();
        let shared = Arc::new(ServerShared {
            transport,
            channels: DashMap::new(),
            next_serial: AtomicU64::new(0),
            liveness_timeout: options.liveness_timeout,
            failures,
        });
        (
            Self {
                shared,
                router,
                listener: Some(listener),
            },
            failures_rx,
        )
    }

    /// 存活的通道数量
    pub fn live_channels(&self) -> usize {
        self.shared.channels.len()
    }

    /// 处理入站消息，直到通道断开
    pub async fn serve(mut self) {
        let transport = self.shared.transport.clone();
        let mut listener = match self.listener.take() {
            Some(listener) => listener,
            None => transport.listen(),
        };
        let closed = transport.closed();

        let sweep_period = self
            .shared
            .liveness_timeout
            .map(|t| (t / 2).max(Duration::from_millis(10)))
            .unwrap_or(Duration::from_secs(3600));
        let mut sweep = interval(sweep_period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            transport = %transport.name(),
            routes = ?self.router.call_types(),
            "RPC server started"
        );

        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                message = listener.recv() => match message {
                    Some(message) => self.dispatch(message),
                    None => break,
                },
                _ = sweep.tick(), if self.shared.liveness_timeout.is_some() => self.sweep(),
            }
        }

        let live = self.shared.channels.len();
        self.shared.teardown_all();
        tracing::info!(transport = %transport.name(), live_channels = live, "RPC server stopped");
    }

    fn dispatch(&self, message: IpcMessage) {
        match message.ipc_type {
            IpcType::Open => self.open(message),
            IpcType::Abort => self.abort(&message.id),
            IpcType::Ping => self.ping(&message.id),
            // 同一通道上本端发起调用的回应，由 RpcClient 处理
            IpcType::Resolve | IpcType::Reject | IpcType::Emit | IpcType::Pong => {}
        }
    }

    fn open(&self, message: IpcMessage) {
        let IpcMessage {
            id,
            call_type,
            payload,
            ..
        } = message;

        let Some(call_type) = call_type else {
            self.reject_protocol(&id, None, "Open message without call type".to_string());
            return;
        };
        let Some(handler) = self.router.get(&call_type) else {
            self.reject_protocol(
                &id,
                Some(call_type.clone()),
                format!("Unknown call type: {}", call_type),
            );
            return;
        };

        let serial = self.shared.next_serial.fetch_add(1, Ordering::Relaxed);
        let token = self.shared.transport.closed().child_token();
        match self.shared.channels.entry(id.clone()) {
            Entry::Occupied(_) => {
                tracing::warn!(call_id = %id, call_type = %call_type, "Ignoring Open for a live channel");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(ChannelEntry {
                    serial,
                    token: token.clone(),
                    deadline: Mutex::new(self.shared.deadline()),
                });
            }
        }

        tracing::debug!(call_id = %id, call_type = %call_type, "Channel opened");

        let channel = InflightChannel {
            id: id.clone(),
            call_type: call_type.clone(),
            payload,
            token,
            serial,
            shared: self.shared.clone(),
        };
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let result = handler.call(channel).await;
            shared.finish(id, serial, call_type, result);
        });
    }

    fn reject_protocol(&self, id: &str, call_type: Option<String>, message: String) {
        tracing::warn!(call_id = %id, reason = %message, "Rejecting call");
        let error = ApplicationError::protocol(message);
        if let Err(e) = self
            .shared
            .send(IpcMessage::reject(id.to_string(), error.to_reject_payload()))
        {
            tracing::debug!(call_id = %id, error = %e, "Failed to send reject");
        }
        self.shared.report(id, call_type, error);
    }

    fn abort(&self, id: &str) {
        if let Some((_, entry)) = self.shared.channels.remove(id) {
            entry.token.cancel();
            tracing::debug!(call_id = %id, "Channel aborted");
        }
    }

    fn ping(&self, id: &str) {
        if let Some(entry) = self.shared.channels.get(id) {
            if let Ok(mut deadline) = entry.deadline.lock() {
                *deadline = self.shared.deadline();
            }
        }
        if let Err(e) = self.shared.send(IpcMessage::pong(id.to_string())) {
            tracing::debug!(call_id = %id, error = %e, "Failed to send pong");
        }
    }

    fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<(String, u64)> = self
            .shared
            .channels
            .iter()
            .filter(|entry| {
                entry
                    .deadline
                    .lock()
                    .map(|deadline| *deadline <= now)
                    .unwrap_or(false)
            })
            .map(|entry| (entry.key().clone(), entry.serial))
            .collect();

        for (id, serial) in expired {
            if let Some((_, entry)) = self
                .shared
                .channels
                .remove_if(&id, |_, entry| entry.serial == serial)
            {
                entry.token.cancel();
                tracing::warn!(call_id = %id, "Channel liveness expired, tearing down");
            }
        }
    }
}
