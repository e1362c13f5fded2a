//! Upstream HTTP/2 client: one connection per proxied request.
//!
//! # Responsibilities
//! - Connect over TCP and run the HTTP/2 handshake (prior knowledge)
//! - Drive the connection in a background task that only logs its errors
//! - Tear the connection down exactly once
//!
//! # Design Decisions
//! - No pooling: the connection lives and dies with its session
//! - `destroy` aborts the driver, which resets every stream still open

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::http::{Request, Response};
use futures_util::future::{BoxFuture, FutureExt};
use hyper::body::Incoming;
use hyper::client::conn::http2::{self, SendRequest};
use hyper_util::rt::{TokioExecutor, TokioIo};
use http_body_util::BodyExt;
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::stream::outcome::{ListenOutcome, PauseOutcome, ResumeOutcome};
use crate::stream::sink::ChannelBody;
use crate::stream::source::{pump, ChunkSource, DataListener, EndListener, ErrorListener, SourceCore};

/// Resolves with the upstream response head.
pub type ResponseFuture = BoxFuture<'static, Result<Response<Incoming>, ProxyError>>;

/// An HTTP/2 client connection to one upstream address.
pub struct UpstreamClient {
    address: String,
    sender: Mutex<Option<SendRequest<ChannelBody>>>,
    driver: AbortHandle,
    destroyed: AtomicBool,
}

impl std::fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("address", &self.address)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl UpstreamClient {
    /// Open a connection to `address` (`host:port`).
    pub async fn connect(address: &str) -> Result<Self, ProxyError> {
        let result = Self::open(address).await;
        metrics::record_upstream_connect(if result.is_ok() { "ok" } else { "error" });
        result
    }

    async fn open(address: &str) -> Result<Self, ProxyError> {
        let stream = TcpStream::connect(address).await.map_err(|error| {
            tracing::warn!(upstream = %address, error = %error, "Upstream connect failed");
            ProxyError::upstream(error)
        })?;
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
            .await
            .map_err(ProxyError::upstream)?;

        let logged = address.to_owned();
        let driver = tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(upstream = %logged, error = %error, "Upstream connection error");
            }
        })
        .abort_handle();

        let client = Self {
            address: address.to_owned(),
            sender: Mutex::new(Some(sender)),
            driver,
            destroyed: AtomicBool::new(false),
        };

        if client.is_closed() {
            client.destroy();
            return Err(ProxyError::ClientClosed);
        }

        tracing::debug!(upstream = %address, "Upstream connected");
        Ok(client)
    }

    fn sender(&self) -> MutexGuard<'_, Option<SendRequest<ChannelBody>>> {
        self.sender.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// True once the connection can no longer carry requests.
    pub fn is_closed(&self) -> bool {
        self.sender().as_ref().map_or(true, SendRequest::is_closed)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Open a stream for `request`. The body is polled by the connection once
    /// this returns; the returned future yields the response head.
    pub async fn open_stream(&self, request: Request<ChannelBody>) -> Result<ResponseFuture, ProxyError> {
        let mut sender = self.sender().clone().ok_or(ProxyError::RequestClosed)?;
        if sender.ready().await.is_err() {
            return Err(ProxyError::RequestClosed);
        }
        let response = sender.send_request(request);
        Ok(async move { response.await.map_err(ProxyError::upstream) }.boxed())
    }

    /// Tear the connection down. Returns true only for the call that did it.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sender().take();
        self.driver.abort();
        tracing::debug!(upstream = %self.address, "Upstream client destroyed");
        true
    }
}

impl Drop for UpstreamClient {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// An upstream response body exposed as a pausable chunk source.
#[derive(Debug)]
pub struct UpstreamBody {
    core: Arc<SourceCore>,
}

impl UpstreamBody {
    pub fn new(body: Incoming) -> Arc<Self> {
        let core = SourceCore::new();
        tokio::spawn(pump(Arc::downgrade(&core), body.into_data_stream()));
        Arc::new(Self { core })
    }
}

impl ChunkSource for UpstreamBody {
    fn pause(&self) -> PauseOutcome {
        self.core.pause()
    }

    fn resume(&self) -> ResumeOutcome {
        self.core.resume()
    }

    fn on_data(&self, listener: DataListener) -> ListenOutcome {
        self.core.on_data(listener)
    }

    fn on_end(&self, listener: EndListener) -> ListenOutcome {
        self.core.on_end(listener)
    }

    fn on_error(&self, listener: ErrorListener) -> ListenOutcome {
        self.core.on_error(listener)
    }

    fn destroy(&self) {
        self.core.destroy();
    }
}
