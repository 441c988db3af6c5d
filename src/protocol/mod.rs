//! Control protocol
//!
//! JSON-RPC 2.0 over stdio between a settings/progress client and the
//! orchestrator. Commands are requests; progress and results come back as
//! notifications named after [`CaptureEvent::method`](crate::capture::CaptureEvent::method).

mod server;
/// Wire types
pub mod types;

pub use server::ProtocolServer;
pub use types::{
    Ack, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerInfo,
    JSONRPC_VERSION, SERVER_ERROR,
};

/// Commands the server answers
pub const METHODS: &[&str] = &[
    "initialize",
    "startCapture",
    "stopCapture",
    "getStatus",
    "getMetrics",
    "ping",
];
