//! The request primitive: one inbound HTTP/1 or HTTP/2 exchange behind a
//! single state-checked interface.
//!
//! # Responsibilities
//! - Normalize method, url, authority and headers across protocol versions
//! - Expose the inbound body as a pausable [`ChunkSource`]
//! - Expose the response as a [`ChunkSink`] that enforces head-before-body,
//!   a single head and a single end
//!
//! # Design Decisions
//! - Nothing here fails by panicking or erroring; every call returns an
//!   outcome tag the caller must match
//! - The response head travels to hyper through a oneshot; the body follows
//!   through a buffered channel with drain notifications
//! - Exchange ids use a relaxed atomic counter: only uniqueness matters

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Body;
use axum::http::header::{CONNECTION, HOST};
use axum::http::uri::Authority;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::stream::outcome::{
    DrainOutcome, EncodingOutcome, EndOutcome, HeadOutcome, ListenOutcome, PauseOutcome,
    ResumeOutcome, WriteOutcome,
};
use crate::stream::sink::{
    body_channel, BodyWriter, ChannelBody, ChunkSink, DrainListener, DEFAULT_HIGH_WATER_MARK,
};
use crate::stream::source::{
    pump, ChunkSource, DataListener, Encoding, EndListener, ErrorListener, SourceCore,
};

static EXCHANGE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an exchange, used in tracing spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExchangeId(u64);

impl ExchangeId {
    fn next() -> Self {
        Self(EXCHANGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ex-{}", self.0)
    }
}

/// Wire protocol of the inbound exchange, chosen from the negotiated version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    pub fn from_version(version: Version) -> Self {
        if version == Version::HTTP_2 {
            Protocol::Http2
        } else {
            Protocol::Http1
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http1 => "http1",
            Protocol::Http2 => "http2",
        }
    }

    /// Routing authority without port.
    ///
    /// HTTP/2 carries it in `:authority` (the request URI); HTTP/1 in `Host`.
    /// Each variant falls back to the other location.
    pub fn authority(&self, uri: &Uri, headers: &HeaderMap) -> Option<String> {
        let from_uri = || uri.authority().map(|authority| authority.host().to_owned());
        let from_host = || {
            headers
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .map(strip_port)
        };
        match self {
            Protocol::Http2 => from_uri().or_else(from_host),
            Protocol::Http1 => from_host().or_else(from_uri),
        }
    }
}

fn strip_port(host: &str) -> String {
    match host.parse::<Authority>() {
        Ok(authority) => authority.host().to_owned(),
        Err(_) => host.split(':').next().unwrap_or_default().to_owned(),
    }
}

/// Ordered response header list; repeated names produce repeated fields.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders {
    entries: Vec<(String, HeaderValue)>,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn append(&mut self, name: impl Into<String>, value: HeaderValue) -> &mut Self {
        self.entries.push((name.into(), value));
        self
    }

    /// Append a field from text. Values that are not valid header text are
    /// skipped and reported as `false`.
    pub fn append_str(&mut self, name: impl Into<String>, value: &str) -> bool {
        let name = name.into();
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.entries.push((name, value));
                true
            }
            Err(_) => {
                tracing::warn!(header = %name, "Skipping header with invalid value");
                false
            }
        }
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn into_header_map(self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (name, value) in self.entries {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => {
                    map.append(name, value);
                }
                Err(_) => tracing::warn!(header = %name, "Skipping header with invalid name"),
            }
        }
        map
    }
}

#[derive(Debug)]
struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
}

#[derive(Debug)]
struct HeadState {
    sender: Option<oneshot::Sender<ResponseHead>>,
    sent: bool,
}

/// One inbound request/response exchange.
pub struct HttpExchange {
    id: ExchangeId,
    protocol: Protocol,
    url: Option<String>,
    method: Option<String>,
    authority: Option<String>,
    headers: HeaderMap,
    request: Arc<SourceCore>,
    head: Mutex<HeadState>,
    body: BodyWriter,
}

impl fmt::Debug for HttpExchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpExchange")
            .field("id", &self.id)
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}

/// The response hyper is waiting for; resolves once a head is written.
#[derive(Debug)]
pub struct PendingResponse {
    id: ExchangeId,
    head: oneshot::Receiver<ResponseHead>,
    body: ChannelBody,
}

impl PendingResponse {
    pub async fn into_response(self) -> Response<Body> {
        match self.head.await {
            Ok(head) => {
                let mut response = Response::new(Body::new(self.body));
                *response.status_mut() = head.status;
                *response.headers_mut() = head.headers;
                response
            }
            Err(_) => {
                tracing::warn!(exchange_id = %self.id, "Exchange dropped before a response head was written");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl HttpExchange {
    /// Wrap an inbound request. Must be called inside a Tokio runtime: the
    /// inbound body is driven by a spawned task.
    pub fn accept(request: Request<Body>) -> (Arc<Self>, PendingResponse) {
        let (parts, body) = request.into_parts();
        let id = ExchangeId::next();
        let protocol = Protocol::from_version(parts.version);
        let authority = protocol.authority(&parts.uri, &parts.headers);
        let url = parts
            .uri
            .path_and_query()
            .map(|path_and_query| path_and_query.as_str().to_owned());

        // pseudo-headers never reach the header map
        let mut headers = parts.headers;
        headers.remove(CONNECTION);
        headers.remove(HOST);

        let request = SourceCore::new();
        tokio::spawn(pump(Arc::downgrade(&request), body.into_data_stream()));

        let (writer, channel) = body_channel(DEFAULT_HIGH_WATER_MARK);
        let (head_tx, head_rx) = oneshot::channel();

        let exchange = Arc::new(Self {
            id,
            protocol,
            url,
            method: Some(parts.method.as_str().to_owned()),
            authority,
            headers,
            request,
            head: Mutex::new(HeadState {
                sender: Some(head_tx),
                sent: false,
            }),
            body: writer,
        });

        tracing::debug!(
            exchange_id = %id,
            protocol = protocol.as_str(),
            method = exchange.method.as_deref().unwrap_or_default(),
            url = exchange.url.as_deref().unwrap_or_default(),
            "Exchange accepted"
        );

        (
            exchange,
            PendingResponse {
                id,
                head: head_rx,
                body: channel,
            },
        )
    }

    fn head(&self) -> MutexGuard<'_, HeadState> {
        self.head.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> ExchangeId {
        self.id
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// Inbound headers without `connection` and `host`.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_sent(&self) -> bool {
        self.head().sent
    }

    pub fn is_response_ended(&self) -> bool {
        self.body.is_ended()
    }

    pub fn is_request_ended(&self) -> bool {
        self.request.is_ended()
    }

    // --- inbound body ---

    pub fn set_request_encoding(&self, encoding: Encoding) -> EncodingOutcome {
        self.request.set_encoding(encoding)
    }

    pub fn pause_request(&self) -> PauseOutcome {
        self.request.pause()
    }

    pub fn resume_request(&self) -> ResumeOutcome {
        self.request.resume()
    }

    pub fn on_request_data(&self, callback: impl FnMut(Bytes) + Send + 'static) -> ListenOutcome {
        self.request.on_data(Box::new(callback))
    }

    pub fn on_request_end(&self, callback: impl FnOnce() + Send + 'static) -> ListenOutcome {
        self.request.on_end(Box::new(callback))
    }

    pub fn on_request_error(&self, callback: impl FnOnce(&str) + Send + 'static) -> ListenOutcome {
        self.request.on_error(Box::new(callback))
    }

    // --- response ---

    pub fn write_response_head(&self, status: StatusCode, headers: ResponseHeaders) -> HeadOutcome {
        let mut head = self.head();
        if self.body.is_ended() {
            return HeadOutcome::FailedWritableEnded;
        }
        if head.sent {
            return HeadOutcome::FailedHeadersSent;
        }
        head.sent = true;

        let response = ResponseHead {
            status,
            headers: headers.into_header_map(),
        };
        if let Some(sender) = head.sender.take() {
            if sender.send(response).is_err() {
                tracing::debug!(exchange_id = %self.id, "Response head written after the client went away");
            }
        }
        HeadOutcome::Success
    }

    pub fn write_response(&self, chunk: impl Into<Bytes>) -> WriteOutcome {
        if self.body.is_ended() {
            return WriteOutcome::FailedWritableEnded;
        }
        if !self.headers_sent() {
            return WriteOutcome::FailedHeadersNotSent;
        }
        self.body.write(chunk.into())
    }

    pub fn end_response(&self) -> EndOutcome {
        if self.body.is_ended() {
            return EndOutcome::FailedWritableEnded;
        }
        if !self.headers_sent() {
            return EndOutcome::FailedHeadersNotSent;
        }
        self.body.end()
    }

    pub fn once_response_drain(&self, callback: impl FnOnce() + Send + 'static) -> DrainOutcome {
        if self.body.is_ended() {
            return DrainOutcome::FailedWritableEnded;
        }
        if !self.headers_sent() {
            return DrainOutcome::FailedHeadersNotSent;
        }
        self.body.once_drain(Box::new(callback))
    }
}

impl ChunkSource for HttpExchange {
    fn pause(&self) -> PauseOutcome {
        self.pause_request()
    }

    fn resume(&self) -> ResumeOutcome {
        self.resume_request()
    }

    fn on_data(&self, listener: DataListener) -> ListenOutcome {
        self.request.on_data(listener)
    }

    fn on_end(&self, listener: EndListener) -> ListenOutcome {
        self.request.on_end(listener)
    }

    fn on_error(&self, listener: ErrorListener) -> ListenOutcome {
        self.request.on_error(listener)
    }

    fn destroy(&self) {
        self.request.destroy();
    }
}

impl ChunkSink for HttpExchange {
    fn write(&self, chunk: Bytes) -> WriteOutcome {
        self.write_response(chunk)
    }

    fn end(&self) -> EndOutcome {
        self.end_response()
    }

    fn once_drain(&self, listener: DrainListener) -> DrainOutcome {
        self.once_response_drain(listener)
    }
}
