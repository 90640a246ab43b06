//! Task Queue Port - 模型安装任务队列
//!
//! 安装 / 更新 / 卸载任务严格按提交顺序执行，同一时刻最多一个

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use super::model_repository::RepositoryError;
use crate::domain::task::{TaskSnapshot, TaskType};

/// Task 错误
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task queue closed")]
    QueueClosed,
}

impl From<RepositoryError> for TaskError {
    fn from(err: RepositoryError) -> Self {
        TaskError::Failed(err.to_string())
    }
}

/// 任务进度上报
pub trait TaskReporter: Send + Sync {
    fn set_progress(&self, task_id: &str, progress: Option<f64>);

    fn set_state(&self, task_id: &str, state: Value);
}

/// 执行器上下文
#[derive(Clone)]
pub struct TaskContext {
    id: String,
    task_type: TaskType,
    reporter: Arc<dyn TaskReporter>,
}

impl TaskContext {
    pub fn new(id: String, task_type: TaskType, reporter: Arc<dyn TaskReporter>) -> Self {
        Self {
            id,
            task_type,
            reporter,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn set_progress(&self, progress: Option<f64>) {
        self.reporter.set_progress(&self.id, progress);
    }

    pub fn set_state(&self, state: Value) {
        self.reporter.set_state(&self.id, state);
    }
}

/// 任务执行器
pub type TaskExecutor =
    Box<dyn FnOnce(TaskContext) -> BoxFuture<'static, Result<Value, TaskError>> + Send>;

/// 提交凭据，用于等待任务结果
#[derive(Debug)]
pub struct TaskTicket {
    id: String,
    receiver: oneshot::Receiver<Result<Value, TaskError>>,
}

impl TaskTicket {
    pub fn new(id: String, receiver: oneshot::Receiver<Result<Value, TaskError>>) -> Self {
        Self { id, receiver }
    }

    /// 任务 id（提交时分配，与 TaskSnapshot::id 一致）
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 等待任务完成（无论任务何时真正开始执行）
    pub async fn result(self) -> Result<Value, TaskError> {
        self.receiver.await.unwrap_or(Err(TaskError::QueueClosed))
    }
}

/// Task Queue Port
pub trait TaskQueuePort: Send + Sync {
    fn submit(&self, task_type: TaskType, executor: TaskExecutor) -> TaskTicket;

    fn current_task(&self) -> Option<TaskSnapshot>;

    fn pending_count(&self) -> usize;
}
