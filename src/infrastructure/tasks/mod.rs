//! Tasks - 模型安装任务队列

pub mod task_queue;

pub use task_queue::{TaskQueue, TaskWorker};
