//! Task Context - Value Objects

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Install,
    Uninstall,
    Update,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Install => "install",
            TaskType::Uninstall => "uninstall",
            TaskType::Update => "update",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 运行中任务快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// 进度（0.0 - 1.0），未知时为 None
    pub progress: Option<f64>,
    /// 执行器自定义状态
    pub state: Value,
}

impl TaskSnapshot {
    pub fn started(id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            task_type,
            progress: None,
            state: Value::Null,
        }
    }
}
