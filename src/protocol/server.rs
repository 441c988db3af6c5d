//! Stdio protocol server
//!
//! Reads one JSON-RPC request per line, answers on the same stream, and
//! forwards orchestrator events as notifications in between. Responses and
//! notifications share a single writer task so lines never interleave.

use super::types::{Ack, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ServerInfo};
use super::JSONRPC_VERSION;
use crate::capture::{CaptureEvent, CaptureOrchestrator, SessionConfig, SessionOutcome};
use crate::error::{ProtocolError, Result};
use crate::metrics::global_metrics;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Outbound lines buffered ahead of the writer
const OUTBOUND_CAPACITY: usize = 256;

const INTERNAL_ERROR_LINE: &str =
    r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"Internal error"}}"#;

/// JSON-RPC front end over a [`CaptureOrchestrator`]
pub struct ProtocolServer {
    orchestrator: Arc<CaptureOrchestrator>,
    info: ServerInfo,
    sessions: Mutex<Vec<JoinHandle<SessionOutcome>>>,
}

impl ProtocolServer {
    /// Create a server driving `orchestrator`
    pub fn new(orchestrator: Arc<CaptureOrchestrator>) -> Self {
        Self {
            orchestrator,
            info: ServerInfo::default(),
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Identity reported by `initialize`
    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Serve on the process's stdin and stdout until stdin closes
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        info!("Starting protocol server: {} v{}", self.info.name, self.info.version);
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve on arbitrary streams
    ///
    /// On end of input any running session is stopped and awaited, so its
    /// terminal notification is written before this returns.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
        let writer_task = tokio::spawn(write_lines(rx, writer));

        let forwarding = CancellationToken::new();
        let forwarder = tokio::spawn(forward_events(
            self.orchestrator.events().subscribe(),
            tx.clone(),
            forwarding.clone(),
        ));

        let mut lines = reader.lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read line: {}", e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }
            debug!("Received: {}", line);

            if let Some(response) = self.handle_line(&line).await {
                let encoded = encode(&response);
                debug!("Sending: {}", encoded);
                if tx.send(encoded).await.is_err() {
                    error!("Output closed, stopping server");
                    break;
                }
            }
        }

        self.drain_sessions().await;
        forwarding.cancel();
        if let Err(e) = forwarder.await {
            warn!("Event forwarder ended abnormally: {}", e);
        }
        drop(tx);
        if let Err(e) = writer_task.await {
            warn!("Writer ended abnormally: {}", e);
        }
        info!("Protocol server shutting down");
        Ok(())
    }

    async fn drain_sessions(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.sessions.lock());
        if handles.is_empty() {
            return;
        }
        if self.orchestrator.stop() {
            info!("Input closed, stopping running session");
        }
        for handle in handles {
            match handle.await {
                Ok(outcome) => debug!(
                    session = %outcome.session_id,
                    end = outcome.end.label(),
                    "Session drained"
                ),
                Err(e) => warn!("Session task failed: {}", e),
            }
        }
    }

    /// Handle a single line of input
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                warn!("Failed to parse request: {}", e);
                return Some(JsonRpcResponse::parse_error(
                    ProtocolError::ParseError(e.to_string()).to_string(),
                ));
            }
        };
        self.handle_request(request).await
    }

    /// Dispatch one request; notifications (no id) get no response
    #[instrument(skip(self, request), fields(method = %request.method))]
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        let silent = request.is_notification();

        if request.jsonrpc != JSONRPC_VERSION {
            let reason = ProtocolError::InvalidRequest(format!(
                "unsupported jsonrpc version {:?}",
                request.jsonrpc
            ));
            return (!silent).then(|| JsonRpcResponse::invalid_request(id, reason.to_string()));
        }

        debug!("Handling method: {}", request.method);
        let response = match request.method.as_str() {
            "initialize" => JsonRpcResponse::success(id, to_value(&self.info)),
            "startCapture" => self.handle_start(id, request.params).await,
            "stopCapture" => self.handle_stop(id),
            "getStatus" => JsonRpcResponse::success(id, to_value(&self.orchestrator.status())),
            "getMetrics" => JsonRpcResponse::success(
                id,
                Value::String(global_metrics().to_prometheus_format()),
            ),
            "ping" => JsonRpcResponse::success(id, json!({ "pong": true })),
            method => {
                warn!("Unknown method: {}", method);
                JsonRpcResponse::method_not_found(
                    id,
                    ProtocolError::UnknownMethod(method.to_string()).to_string(),
                )
            }
        };

        (!silent).then_some(response)
    }

    async fn handle_start(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::invalid_params(
                id,
                ProtocolError::InvalidParams("missing session parameters".into()).to_string(),
            );
        };
        let config: SessionConfig = match serde_json::from_value(params) {
            Ok(config) => config,
            Err(e) => {
                return JsonRpcResponse::invalid_params(
                    id,
                    ProtocolError::InvalidParams(e.to_string()).to_string(),
                )
            }
        };

        match self.orchestrator.start(config).await {
            Ok(handle) => {
                let mut sessions = self.sessions.lock();
                sessions.retain(|h| !h.is_finished());
                sessions.push(handle);
                JsonRpcResponse::success(id, to_value(&Ack::OK))
            }
            Err(e) => {
                warn!("startCapture refused: {}", e);
                global_metrics().record_error("start_refused");
                JsonRpcResponse::server_error(id, e.to_string())
            }
        }
    }

    fn handle_stop(&self, id: Option<Value>) -> JsonRpcResponse {
        if !self.orchestrator.stop() {
            debug!("stopCapture with no running session");
        }
        JsonRpcResponse::success(id, to_value(&Ack::OK))
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        error!("Failed to serialize result: {}", e);
        Value::Null
    })
}

fn encode<T: Serialize>(message: &T) -> String {
    serde_json::to_string(message).unwrap_or_else(|e| {
        error!("Failed to serialize message: {}", e);
        INTERNAL_ERROR_LINE.to_string()
    })
}

async fn forward_events(
    mut events: broadcast::Receiver<CaptureEvent>,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            received = events.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Notification listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = token.cancelled() => break,
        };

        let notification = JsonRpcNotification::from_event(&event);
        if tx.send(encode(&notification)).await.is_err() {
            break;
        }
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(mut rx: mpsc::Receiver<String>, mut writer: W) {
    while let Some(line) = rx.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            error!("Failed to write output: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{NoopKeepAlive, OrchestratorConfig, SurfaceProvider, TargetSurface};
    use crate::delivery::MemorySink;
    use crate::error::SurfaceError;
    use async_trait::async_trait;

    struct NoSurface;

    #[async_trait]
    impl SurfaceProvider for NoSurface {
        async fn active_surface(&self) -> Result<Arc<dyn TargetSurface>> {
            Err(SurfaceError::NoActiveSurface.into())
        }
    }

    fn server() -> ProtocolServer {
        let orchestrator = CaptureOrchestrator::new(
            Arc::new(NoSurface),
            Arc::new(MemorySink::new()),
            Arc::new(NoopKeepAlive),
            OrchestratorConfig::default(),
        );
        ProtocolServer::new(Arc::new(orchestrator))
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest::new(method, params, json!(1))
    }

    #[tokio::test]
    async fn test_ping() {
        let response = server().handle_request(request("ping", None)).await.unwrap();
        assert_eq!(response.result, Some(json!({ "pong": true })));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let response = server()
            .handle_request(request("tools/list", None))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32601);
        assert_eq!(error.message, "Unknown method: tools/list");
    }

    #[tokio::test]
    async fn test_wrong_version_rejected() {
        let mut req = request("ping", None);
        req.jsonrpc = "1.0".into();
        let response = server().handle_request(req).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32600);
    }

    #[tokio::test]
    async fn test_notification_gets_no_response() {
        let mut req = request("ping", None);
        req.id = None;
        assert!(server().handle_request(req).await.is_none());
    }

    #[tokio::test]
    async fn test_parse_error() {
        let response = server().handle_line("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, -32700);
    }

    #[tokio::test]
    async fn test_start_without_params() {
        let response = server()
            .handle_request(request("startCapture", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn test_start_invalid_range_reports_reason() {
        let params = json!({ "pageRange": { "start": 5, "end": 2 } });
        let response = server()
            .handle_request(request("startCapture", Some(params)))
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, -32000);
        assert!(error.message.contains("Invalid page range"));
    }

    #[tokio::test]
    async fn test_start_without_surface() {
        let params = json!({ "pageRange": { "start": 1, "end": 3 } });
        let server = server();
        let response = server
            .handle_request(request("startCapture", Some(params)))
            .await
            .unwrap();
        assert!(response.error.unwrap().message.contains("No active target surface"));
        assert!(!server.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_status_when_idle() {
        let response = server()
            .handle_request(request("getStatus", None))
            .await
            .unwrap();
        let status = response.result.unwrap();
        assert_eq!(status["isRunning"], false);
        assert_eq!(status["status"], "idle");
    }

    #[tokio::test]
    async fn test_stop_when_idle_acknowledges() {
        let response = server()
            .handle_request(request("stopCapture", None))
            .await
            .unwrap();
        assert_eq!(response.result, Some(json!({ "ok": true })));
    }

    #[tokio::test]
    async fn test_metrics_is_prometheus_text() {
        crate::metrics::init();
        let response = server()
            .handle_request(request("getMetrics", None))
            .await
            .unwrap();
        let text = response.result.unwrap();
        assert!(text.as_str().unwrap().contains("pagecast_sessions_started_total"));
    }
}
