//! Initiator side of an MCP session.
//!
//! `RagSession` walks `Unconnected → Handshaking → Ready → Closing → Closed`.
//! Tool calls are only accepted in `Ready`; one exchange is in flight at a
//! time. Closing cancels any waiter with [`SessionError::Closed`] before the
//! running service (and with it the transport) is shut down.
use std::borrow::Cow;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rmcp::model::{CallToolRequestParams, ErrorCode, ErrorData, Tool};
use rmcp::service::{Peer, RunningService, ServiceError};
use rmcp::transport::IntoTransport;
use rmcp::{RoleClient, ServiceExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::models::SlotId;
use crate::mcp::tools::{NO_RESULTS, error_kind};

/// Default bound on a single request/response exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unconnected => "unconnected",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not ready (state: {0})")]
    NotReady(SessionState),

    #[error("session closed")]
    Closed,

    #[error("transport closed")]
    TransportClosed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("tool failed: {0}")]
    ToolFailed(String),

    /// The responder's embedding provider failed or timed out.
    #[error("embedding provider failed: {0}")]
    EmbeddingProvider(String),

    /// The responder's provider produced vectors of the wrong dimension.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A tool as advertised by the responder.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl From<Tool> for ToolDescriptor {
    fn from(tool: Tool) -> Self {
        Self {
            name: tool.name.into_owned(),
            description: tool.description.map(Cow::into_owned).unwrap_or_default(),
            input_schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

/// One line of a `retrieve_docs` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievedDoc {
    pub slot: SlotId,
    pub text: String,
}

struct Inner {
    state: SessionState,
    peer: Option<Peer<RoleClient>>,
}

pub struct RagSession {
    inner: Mutex<Inner>,
    service: AsyncMutex<Option<RunningService<RoleClient, ()>>>,
    shutdown: CancellationToken,
    in_flight: AsyncMutex<()>,
    call_timeout: Duration,
}

impl Default for RagSession {
    fn default() -> Self {
        Self::new()
    }
}

impl RagSession {
    #[must_use]
    pub fn new() -> Self {
        Self::with_call_timeout(DEFAULT_CALL_TIMEOUT)
    }

    #[must_use]
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Unconnected,
                peer: None,
            }),
            service: AsyncMutex::new(None),
            shutdown: CancellationToken::new(),
            in_flight: AsyncMutex::new(()),
            call_timeout,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// Run the initialize handshake over `transport` and move to `Ready`.
    pub async fn connect<T, E, A>(&self, transport: T) -> Result<(), SessionError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        {
            let mut inner = self.inner();
            if inner.state != SessionState::Unconnected {
                return Err(SessionError::Protocol(format!(
                    "connect called in state {}",
                    inner.state
                )));
            }
            inner.state = SessionState::Handshaking;
        }

        let service = tokio::select! {
            result = ().serve(transport) => match result {
                Ok(service) => service,
                Err(e) => {
                    self.mark_closed();
                    return Err(SessionError::Handshake(e.to_string()));
                }
            },
            _ = self.shutdown.cancelled() => {
                self.mark_closed();
                return Err(SessionError::Closed);
            }
        };

        let mut slot = self.service.lock().await;
        let ready = {
            let mut inner = self.inner();
            if inner.state == SessionState::Handshaking {
                inner.peer = Some(service.peer().clone());
                inner.state = SessionState::Ready;
                true
            } else {
                false
            }
        };
        if !ready {
            // close() ran while the handshake was in flight.
            drop(slot);
            let _ = service.cancel().await;
            return Err(SessionError::Closed);
        }
        *slot = Some(service);
        info!("MCP session ready");
        Ok(())
    }

    fn ready_peer(&self) -> Result<Peer<RoleClient>, SessionError> {
        let inner = self.inner();
        match (inner.state, &inner.peer) {
            (SessionState::Ready, Some(peer)) => Ok(peer.clone()),
            (SessionState::Closing | SessionState::Closed, _) => Err(SessionError::Closed),
            (state, _) => Err(SessionError::NotReady(state)),
        }
    }

    fn mark_closed(&self) {
        let mut inner = self.inner();
        inner.state = SessionState::Closed;
        inner.peer = None;
    }

    /// Run one request/response exchange, honouring close and the call timeout.
    async fn exchange<T>(
        &self,
        request: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, SessionError> {
        let _guard = tokio::select! {
            guard = self.in_flight.lock() => guard,
            _ = self.shutdown.cancelled() => return Err(SessionError::Closed),
        };

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(SessionError::Closed),
            outcome = tokio::time::timeout(self.call_timeout, request) => outcome,
        };

        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.classify(e)),
            Err(_) => Err(SessionError::Timeout(self.call_timeout)),
        }
    }

    fn classify(&self, err: ServiceError) -> SessionError {
        match err {
            ServiceError::McpError(data) => from_error_data(data),
            ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
                warn!("Transport closed under an open session");
                self.mark_closed();
                SessionError::TransportClosed
            }
            other => SessionError::Protocol(other.to_string()),
        }
    }

    /// Discover the responder's tools.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, SessionError> {
        let peer = self.ready_peer()?;
        let tools = self.exchange(peer.list_all_tools()).await?;
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    /// Call `name` with a JSON object of arguments and return its text output.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String, SessionError> {
        let peer = self.ready_peer()?;

        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(SessionError::InvalidArgument(format!(
                    "arguments must be a JSON object, got {other}"
                )));
            }
        };
        let request: CallToolRequestParams =
            serde_json::from_value(json!({ "name": name, "arguments": arguments }))
                .map_err(|e| SessionError::Protocol(e.to_string()))?;

        debug!("Calling tool {name}");
        let result = self.exchange(peer.call_tool(request)).await?;

        let text = result
            .content
            .iter()
            .filter_map(|c| c.as_text())
            .map(|t| t.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error == Some(true) {
            return Err(SessionError::ToolFailed(text));
        }
        Ok(text)
    }

    /// Index `docs` and return the responder's summary line.
    pub async fn index_docs<S: AsRef<str>>(&self, docs: &[S]) -> Result<String, SessionError> {
        let docs: Vec<&str> = docs.iter().map(AsRef::as_ref).collect();
        self.call_tool("index_docs", json!({ "docs": docs })).await
    }

    /// Retrieve up to `top_k` documents; an empty store yields an empty list.
    pub async fn retrieve_docs(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDoc>, SessionError> {
        let text = self
            .call_tool("retrieve_docs", json!({ "query": query, "top_k": top_k }))
            .await?;
        Ok(parse_retrieval(&text))
    }

    /// End the session, then release the transport.
    ///
    /// Outstanding calls fail with [`SessionError::Closed`]. Idempotent.
    pub async fn close(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.inner();
            if matches!(inner.state, SessionState::Closing | SessionState::Closed) {
                return Ok(());
            }
            inner.state = SessionState::Closing;
            inner.peer = None;
        }
        self.shutdown.cancel();

        let service = self.service.lock().await.take();
        let result = match service {
            Some(service) => match service.cancel().await {
                Ok(reason) => {
                    debug!("Session ended: {reason:?}");
                    Ok(())
                }
                Err(e) => Err(SessionError::Protocol(format!(
                    "session task failed during close: {e}"
                ))),
            },
            None => Ok(()),
        };

        self.mark_closed();
        info!("Session closed");
        result
    }
}

impl Drop for RagSession {
    fn drop(&mut self) {
        let state = self.inner().state;
        if state != SessionState::Closed && state != SessionState::Unconnected {
            warn!("RagSession dropped in state {state}; cancelling");
        }
        self.shutdown.cancel();
    }
}

fn from_error_data(data: ErrorData) -> SessionError {
    let kind = data
        .data
        .as_ref()
        .and_then(|d| d.get("kind"))
        .and_then(Value::as_str);
    let message = data.message.into_owned();

    if data.code.0 == ErrorCode::METHOD_NOT_FOUND.0 {
        return SessionError::UnknownTool(message);
    }
    if data.code.0 == ErrorCode::INVALID_PARAMS.0 {
        if kind.is_none() && message.to_ascii_lowercase().contains("tool not found") {
            return SessionError::UnknownTool(message);
        }
        return SessionError::InvalidArgument(message);
    }
    match kind {
        Some(error_kind::INVALID_ARGUMENT) => SessionError::InvalidArgument(message),
        Some(error_kind::EMBEDDING_PROVIDER) => SessionError::EmbeddingProvider(message),
        Some(error_kind::DIMENSION_MISMATCH) => SessionError::DimensionMismatch(message),
        _ => SessionError::ToolFailed(message),
    }
}

/// Parse `[slot] text` lines. Lines without a slot prefix continue the
/// previous document's text.
#[must_use]
pub fn parse_retrieval(text: &str) -> Vec<RetrievedDoc> {
    if text.trim() == NO_RESULTS {
        return Vec::new();
    }

    let mut docs: Vec<RetrievedDoc> = Vec::new();
    for line in text.lines() {
        let parsed = line
            .strip_prefix('[')
            .and_then(|rest| rest.split_once("] "))
            .and_then(|(slot, body)| Some((slot.parse::<SlotId>().ok()?, body)));

        match (parsed, docs.last_mut()) {
            (Some((slot, body)), _) => docs.push(RetrievedDoc {
                slot,
                text: body.to_string(),
            }),
            (None, Some(last)) => {
                last.text.push('\n');
                last.text.push_str(line);
            }
            (None, None) => warn!("Unexpected retrieve_docs line: {line}"),
        }
    }
    docs
}
