//! 应用层错误定义
//!
//! 统一的命令处理错误类型，同时决定 Reject 消息中的错误码

use serde_json::{json, Value};
use thiserror::Error;

use crate::application::ports::{
    ChatContextError, RepositoryError, SessionError, TaskError, TransportError,
};

/// 应用层错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 通道错误（断开、消息超长）
    #[error("Transport error: {0}")]
    Transport(String),

    /// 协议错误（未知调用类型、信封格式错误）
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 已有生成在进行中
    #[error("Session busy: another generation is in progress")]
    Busy,

    /// 调用被取消
    #[error("Prompt aborted")]
    Aborted,

    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// 引擎错误
    #[error("Engine error: {0}")]
    Engine(String),

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 仓储错误
    #[error("Repository error: {0}")]
    RepositoryError(String),

    /// 任务执行失败
    #[error("Task error: {0}")]
    TaskError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ApplicationError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建协议错误
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Reject 消息中的错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Busy => "busy",
            Self::Aborted => "aborted",
            Self::NotFound { .. } => "not_found",
            Self::Engine(_) => "engine",
            Self::ValidationError(_) => "validation",
            Self::RepositoryError(_) => "repository",
            Self::TaskError(_) => "task",
            Self::InternalError(_) => "internal",
        }
    }

    /// Reject 消息载荷
    pub fn to_reject_payload(&self) -> Value {
        json!({
            "message": self.to_string(),
            "code": self.code(),
        })
    }
}

impl From<TransportError> for ApplicationError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<SessionError> for ApplicationError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Busy => Self::Busy,
            SessionError::Aborted => Self::Aborted,
            SessionError::ModelNotFound(id) => Self::not_found("Model", id),
            SessionError::Engine(e) => Self::Engine(e.to_string()),
            SessionError::Repository(msg) => Self::RepositoryError(msg),
            SessionError::ChatContext(msg) => Self::InternalError(msg),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => Self::not_found("Model", id),
            RepositoryError::InvalidPath(msg) | RepositoryError::InvalidManifest(msg) => {
                Self::ValidationError(msg)
            }
            other => Self::RepositoryError(other.to_string()),
        }
    }
}

impl From<ChatContextError> for ApplicationError {
    fn from(err: ChatContextError) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<TaskError> for ApplicationError {
    fn from(err: TaskError) -> Self {
        Self::TaskError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_payload_carries_code() {
        let payload = ApplicationError::Busy.to_reject_payload();
        assert_eq!(payload["code"], "busy");
        assert_eq!(
            payload["message"],
            "Session busy: another generation is in progress"
        );
    }

    #[test]
    fn test_session_error_mapping() {
        assert!(matches!(
            ApplicationError::from(SessionError::Aborted),
            ApplicationError::Aborted
        ));
        let err = ApplicationError::from(SessionError::ModelNotFound("gemma".into()));
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.to_string(), "Model not found: gemma");
    }

    #[test]
    fn test_repository_error_mapping() {
        let err = ApplicationError::from(RepositoryError::InvalidPath("../x".into()));
        assert_eq!(err.code(), "validation");
    }
}
