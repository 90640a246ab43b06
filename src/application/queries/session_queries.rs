//! Session Queries

/// 查询会话管理器状态
#[derive(Debug, Clone)]
pub struct GetSessionStatus;
