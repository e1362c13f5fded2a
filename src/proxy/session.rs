//! Per-request proxy session: state tracking, single-fire error reporting and
//! exactly-once upstream teardown.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::connection::HttpConnection;
use crate::http::exchange::HttpExchange;
use crate::observability::metrics;
use crate::proxy::error::{ErrorHandler, ProxyError};
use crate::proxy::upstream::UpstreamClient;

/// Forwarding progress of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Resolving,
    Connecting,
    StreamingRequest,
    AwaitingHeaders,
    StreamingResponse,
    Done,
    Errored,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Done | SessionState::Errored)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Resolving => "resolving",
            SessionState::Connecting => "connecting",
            SessionState::StreamingRequest => "streaming_request",
            SessionState::AwaitingHeaders => "awaiting_headers",
            SessionState::StreamingResponse => "streaming_response",
            SessionState::Done => "done",
            SessionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// One proxied request, shared by the response path and the request relay.
pub struct ProxySession {
    exchange: Arc<HttpExchange>,
    errors: Arc<dyn ErrorHandler>,
    client: OnceLock<Arc<UpstreamClient>>,
    state: Mutex<SessionState>,
    reported: AtomicBool,
}

impl fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxySession")
            .field("exchange", &self.exchange.id())
            .field("state", &self.state())
            .field("client", &self.client.get())
            .finish()
    }
}

impl ProxySession {
    pub fn new(exchange: Arc<HttpExchange>, errors: Arc<dyn ErrorHandler>) -> Arc<Self> {
        Arc::new(Self {
            exchange,
            errors,
            client: OnceLock::new(),
            state: Mutex::new(SessionState::Resolving),
            reported: AtomicBool::new(false),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        *self.lock()
    }

    /// Move forward. Terminal states are never left.
    pub fn transition(&self, next: SessionState) {
        let mut state = self.lock();
        if state.is_terminal() {
            return;
        }
        tracing::trace!(from = %*state, to = %next, "Proxy session transition");
        *state = next;
    }

    /// Attach the upstream connection. A session that already ended destroys
    /// it straight away.
    pub fn attach(&self, client: Arc<UpstreamClient>) {
        if self.client.set(client).is_err() {
            tracing::error!("Proxy session attached twice");
            return;
        }
        if self.state().is_terminal() {
            self.teardown();
        }
    }

    /// Destroy the upstream connection unless already destroyed.
    pub fn teardown(&self) -> bool {
        self.client.get().is_some_and(|client| client.destroy())
    }

    /// The response was fully relayed.
    pub fn complete(&self) {
        self.teardown();
        *self.lock() = SessionState::Done;
    }

    /// Stop without reporting: the failure is not the client's to see.
    pub fn abort(&self) {
        self.teardown();
        let mut state = self.lock();
        if !state.is_terminal() {
            *state = SessionState::Errored;
        }
    }

    /// Stop and report `error` through the error handler, once per session.
    pub fn fail(&self, error: ProxyError) {
        self.teardown();
        {
            let mut state = self.lock();
            if *state == SessionState::Done {
                tracing::info!(error = %error, "Upstream error after the response completed");
                return;
            }
            *state = SessionState::Errored;
        }

        if self.reported.swap(true, Ordering::AcqRel) {
            tracing::debug!(error = %error, "Proxy error already reported");
            return;
        }

        let status = error.status();
        let message = error.to_string();
        metrics::record_proxy_error(status.as_u16());
        tracing::warn!(
            exchange_id = %self.exchange.id(),
            authority = self.exchange.authority().unwrap_or_default(),
            status = status.as_u16(),
            error = %message,
            "Proxy request failed"
        );
        self.errors
            .handle(HttpConnection::new(Arc::clone(&self.exchange)), &message, status);
    }
}
