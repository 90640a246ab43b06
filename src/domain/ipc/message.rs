//! IPC Context - Message Envelope

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 消息类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpcType {
    /// 客户端发起调用
    Open,
    /// 客户端取消调用
    Abort,
    /// 客户端存活探测
    Ping,
    /// 服务端返回最终结果
    Resolve,
    /// 服务端返回错误
    Reject,
    /// 服务端推送中间结果
    Emit,
    /// 服务端回应 Ping
    Pong,
}

impl IpcType {
    /// Resolve / Reject 之后通道不再有任何状态转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, IpcType::Resolve | IpcType::Reject)
    }
}

/// 消息信封
///
/// 线上格式: `{ id, ipcType, type?, payload }`，`type` 仅出现在 Open 上
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpcMessage {
    pub id: String,
    pub ipc_type: IpcType,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl IpcMessage {
    pub fn open(id: impl Into<String>, call_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ipc_type: IpcType::Open,
            call_type: Some(call_type.into()),
            payload,
        }
    }

    pub fn abort(id: impl Into<String>) -> Self {
        Self::bare(id, IpcType::Abort)
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self::bare(id, IpcType::Ping)
    }

    pub fn pong(id: impl Into<String>) -> Self {
        Self::bare(id, IpcType::Pong)
    }

    pub fn resolve(id: impl Into<String>, payload: Value) -> Self {
        Self::with_payload(id, IpcType::Resolve, payload)
    }

    pub fn reject(id: impl Into<String>, payload: Value) -> Self {
        Self::with_payload(id, IpcType::Reject, payload)
    }

    pub fn emit(id: impl Into<String>, payload: Value) -> Self {
        Self::with_payload(id, IpcType::Emit, payload)
    }

    fn bare(id: impl Into<String>, ipc_type: IpcType) -> Self {
        Self::with_payload(id, ipc_type, Value::Null)
    }

    fn with_payload(id: impl Into<String>, ipc_type: IpcType, payload: Value) -> Self {
        Self {
            id: id.into(),
            ipc_type,
            call_type: None,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_open_wire_shape() {
        let msg = IpcMessage::open("abc", "prompt", json!({"text": "hi"}));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"id": "abc", "ipcType": "Open", "type": "prompt", "payload": {"text": "hi"}})
        );
    }

    #[test]
    fn test_type_omitted_on_non_open() {
        let value = serde_json::to_value(IpcMessage::ping("abc")).unwrap();
        assert!(value.get("type").is_none());
        assert_eq!(value["ipcType"], "Ping");
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let msg: IpcMessage = serde_json::from_str(r#"{"id":"x","ipcType":"Abort"}"#).unwrap();
        assert_eq!(msg.ipc_type, IpcType::Abort);
        assert_eq!(msg.payload, Value::Null);
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(IpcType::Resolve.is_terminal());
        assert!(IpcType::Reject.is_terminal());
        assert!(!IpcType::Emit.is_terminal());
        assert!(!IpcType::Abort.is_terminal());
    }
}
