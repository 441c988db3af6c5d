//! JSON-RPC 2.0 wire types

use crate::capture::CaptureEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string carried in every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Application error code for a refused or failed command
pub const SERVER_ERROR: i32 = -32000;

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0")
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Optional parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Request ID (None for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Build a request with the given id
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id: Some(id),
        }
    }

    /// Whether the sender expects no reply
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Request ID
    pub id: Option<Value>,
    /// Result (success case)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error (failure case)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::error(None, -32700, message)
    }

    /// Invalid request (-32600)
    pub fn invalid_request(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32600, message)
    }

    /// Method not found (-32601)
    pub fn method_not_found(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32601, message)
    }

    /// Invalid params (-32602)
    pub fn invalid_params(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32602, message)
    }

    /// Internal error (-32603)
    pub fn internal_error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, -32603, message)
    }

    /// Refused or failed command (-32000); the message is the reason
    pub fn server_error(id: Option<Value>, message: impl Into<String>) -> Self {
        Self::error(id, SERVER_ERROR, message)
    }

    /// Whether this is an error response
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
    /// Additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Server-to-client notification (a request without an id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// JSON-RPC version
    pub jsonrpc: String,
    /// Notification name
    pub method: String,
    /// Payload
    pub params: Value,
}

impl JsonRpcNotification {
    /// Notification for a capture event, with the event's fields as params
    pub fn from_event(event: &CaptureEvent) -> Self {
        let mut params = serde_json::to_value(event).unwrap_or(Value::Null);
        match params.as_object_mut() {
            Some(fields) => {
                fields.remove("type");
            }
            None => params = Value::Object(Default::default()),
        }
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: event.method().to_string(),
            params,
        }
    }
}

/// Reply to commands that only acknowledge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Always true
    pub ok: bool,
}

impl Ack {
    /// Positive acknowledgement
    pub const OK: Ack = Ack { ok: true };
}

/// Server identity returned by `initialize`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
    /// Supported command names
    pub methods: Vec<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: crate::NAME.to_string(),
            version: crate::VERSION.to_string(),
            methods: super::METHODS.iter().map(|m| m.to_string()).collect(),
        }
    }
}
