//! Task Context - 模型安装任务
//!
//! 职责:
//! - 任务类型（安装 / 卸载 / 更新）
//! - 运行中任务快照

mod value_objects;

pub use value_objects::{TaskSnapshot, TaskType};
