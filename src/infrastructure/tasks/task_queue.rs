//! Task Queue Implementation
//!
//! 单消费者 FIFO：TaskWorker 逐个执行任务，每次状态变化发布 TaskChanged

use serde_json::Value;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::application::ports::{
    TaskContext, TaskError, TaskExecutor, TaskQueuePort, TaskReporter, TaskTicket,
};
use crate::domain::task::{TaskSnapshot, TaskType};
use crate::infrastructure::events::EventPublisher;

struct QueuedTask {
    id: String,
    task_type: TaskType,
    executor: TaskExecutor,
    reply: oneshot::Sender<Result<Value, TaskError>>,
}

/// 队列共享状态
struct QueueState {
    current: Mutex<Option<TaskSnapshot>>,
    pending: AtomicUsize,
    publisher: Arc<EventPublisher>,
}

impl QueueState {
    fn set_current(&self, snapshot: Option<TaskSnapshot>) {
        if let Ok(mut current) = self.current.lock() {
            *current = snapshot.clone();
        }
        self.publisher.publish_task_changed(snapshot);
    }

    /// 只更新仍在运行的同一任务
    fn update(&self, task_id: &str, apply: impl FnOnce(&mut TaskSnapshot)) {
        let snapshot = match self.current.lock() {
            Ok(mut current) => match current.as_mut() {
                Some(task) if task.id == task_id => {
                    apply(task);
                    Some(task.clone())
                }
                _ => None,
            },
            Err(_) => None,
        };

        match snapshot {
            Some(snapshot) => self.publisher.publish_task_changed(Some(snapshot)),
            None => tracing::debug!(task_id = %task_id, "Ignoring update for inactive task"),
        }
    }
}

impl TaskReporter for QueueState {
    fn set_progress(&self, task_id: &str, progress: Option<f64>) {
        self.update(task_id, |task| task.progress = progress);
    }

    fn set_state(&self, task_id: &str, state: Value) {
        self.update(task_id, |task| task.state = state);
    }
}

/// 任务队列（提交端）
pub struct TaskQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    state: Arc<QueueState>,
}

/// 任务队列（执行端）
pub struct TaskWorker {
    receiver: mpsc::UnboundedReceiver<QueuedTask>,
    state: Arc<QueueState>,
}

impl TaskQueue {
    pub fn new(publisher: Arc<EventPublisher>) -> (Self, TaskWorker) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState {
            current: Mutex::new(None),
            pending: AtomicUsize::new(0),
            publisher,
        });

        (
            Self {
                sender,
                state: state.clone(),
            },
            TaskWorker { receiver, state },
        )
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl TaskQueuePort for TaskQueue {
    fn submit(&self, task_type: TaskType, executor: TaskExecutor) -> TaskTicket {
        let (reply, receiver) = oneshot::channel();
        let id = Uuid::new_v4().to_string();
        self.state.pending.fetch_add(1, Ordering::SeqCst);

        if self
            .sender
            .send(QueuedTask {
                id: id.clone(),
                task_type,
                executor,
                reply,
            })
            .is_err()
        {
            // worker 已退出，reply 随消息一起丢弃，ticket 得到 QueueClosed
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(task_type = %task_type, "Task queue closed, task dropped");
        } else {
            tracing::debug!(task_id = %id, task_type = %task_type, "Task submitted");
        }

        TaskTicket::new(id, receiver)
    }

    fn current_task(&self) -> Option<TaskSnapshot> {
        self.state.current.lock().ok().and_then(|c| c.clone())
    }

    fn pending_count(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }
}

impl TaskWorker {
    /// 启动 Worker，所有 TaskQueue 句柄释放后退出
    pub async fn run(mut self) {
        tracing::info!("TaskWorker started");

        while let Some(task) = self.receiver.recv().await {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            let task_id = task.id;
            let task_type = task.task_type;

            self.state
                .set_current(Some(TaskSnapshot::started(task_id.clone(), task_type)));
            tracing::info!(task_id = %task_id, task_type = %task_type, "Task started");

            let context = TaskContext::new(
                task_id.clone(),
                task_type,
                self.state.clone() as Arc<dyn TaskReporter>,
            );
            // 独立任务中执行，panic 只影响这一个提交者
            let result = match tokio::spawn((task.executor)(context)).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
                Err(e) => Err(TaskError::Failed(e.to_string())),
            };

            match &result {
                Ok(_) => tracing::info!(task_id = %task_id, task_type = %task_type, "Task completed"),
                Err(e) => {
                    tracing::warn!(task_id = %task_id, task_type = %task_type, error = %e, "Task failed")
                }
            }

            self.state.set_current(None);
            let _ = task.reply.send(result);
        }

        tracing::info!("TaskWorker stopped");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
