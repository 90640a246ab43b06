//! Task Queries

/// 查询当前运行的任务
#[derive(Debug, Clone)]
pub struct GetCurrentTask;
