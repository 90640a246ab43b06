//! Event Publisher Implementation
//!
//! 进程内状态变更事件（任务队列、推理会话），通过 broadcast 分发给订阅者

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::task::TaskSnapshot;

/// 事件通道容量；慢订阅者会丢失旧事件，但总能看到最新状态
const CHANNEL_CAPACITY: usize = 100;

/// 网关事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum GatewayEvent {
    /// 任务队列状态变更，`task` 为 None 表示空闲
    TaskChanged { task: Option<TaskSnapshot> },
    /// 引擎已加载
    SessionLoaded { model_id: String },
    /// 引擎已卸载
    SessionDisposed { model_id: String, reason: String },
}

/// 事件发布器
pub struct EventPublisher {
    channel: broadcast::Sender<GatewayEvent>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { channel }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.channel.subscribe()
    }

    /// 发布任务变更事件
    pub fn publish_task_changed(&self, task: Option<TaskSnapshot>) {
        self.publish(GatewayEvent::TaskChanged { task });
    }

    /// 发布引擎加载事件
    pub fn publish_session_loaded(&self, model_id: &str) {
        self.publish(GatewayEvent::SessionLoaded {
            model_id: model_id.to_string(),
        });
    }

    /// 发布引擎卸载事件
    pub fn publish_session_disposed(&self, model_id: &str, reason: &str) {
        self.publish(GatewayEvent::SessionDisposed {
            model_id: model_id.to_string(),
            reason: reason.to_string(),
        });
    }

    fn publish(&self, event: GatewayEvent) {
        if let Err(e) = self.channel.send(event) {
            tracing::trace!(error = %e, "Event dropped (no receivers)");
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::TaskType;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish_task_changed(Some(TaskSnapshot::started("t1", TaskType::Install)));
        publisher.publish_task_changed(None);

        assert!(matches!(
            rx.recv().await.unwrap(),
            GatewayEvent::TaskChanged { task: Some(_) }
        ));
        assert_eq!(
            rx.recv().await.unwrap(),
            GatewayEvent::TaskChanged { task: None }
        );
    }

    #[test]
    fn test_event_wire_format() {
        let event = GatewayEvent::SessionDisposed {
            model_id: "gemma".to_string(),
            reason: "idle".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "SessionDisposed");
        assert_eq!(json["data"]["reason"], "idle");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        EventPublisher::new().publish_session_loaded("gemma");
    }
}
