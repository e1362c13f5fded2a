//! Connection: a parsed, read-only view over one exchange plus the three
//! ways of answering it.
//!
//! # Data Flow
//! ```text
//! HttpExchange
//!     → HttpConnection::new (method, pathname, search, params, cookies, body)
//!     → send_file  → metadata → head → RangeFileReader → pipe → exchange
//!     → send_data  → head → write → end
//!     → send_href  → head (Location) → end
//! ```
//!
//! # Design Decisions
//! - Parsing is done once at construction; accessors only borrow
//! - The request body is collected as text from construction on and resolves
//!   on end, on transport failure, or after [`BODY_TIMEOUT`], never failing

pub mod content;
pub mod range;
pub mod site;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::header::{COOKIE, RANGE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::http::exchange::{HttpExchange, ResponseHeaders};
use crate::observability::metrics;
use crate::stream::file::RangeFileReader;
use crate::stream::outcome::{EndOutcome, HeadOutcome, PipeOutcome, WriteOutcome};
use crate::stream::pipe::pipe;
use crate::stream::source::Encoding;

pub use content::{CacheControl, ContentType};
pub use range::{RangeRequest, Unsatisfiable, DEFAULT_RANGE_SPAN};
pub use site::StaticSite;

/// Longest wait for the request body before resolving with what arrived.
pub const BODY_TIMEOUT: Duration = Duration::from_secs(20);

/// Result of [`HttpConnection::send_file`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFileOutcome {
    Success,
    FailedNoFurtherAction,
    FailedDirectory,
    FailedUnknownStats,
    FailedStatsNotFound,
}

impl SendFileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendFileOutcome::Success => "success",
            SendFileOutcome::FailedNoFurtherAction => "failed-no-further-action",
            SendFileOutcome::FailedDirectory => "failed-directory",
            SendFileOutcome::FailedUnknownStats => "failed-unknown-stats",
            SendFileOutcome::FailedStatsNotFound => "failed-stats-not-found",
        }
    }
}

/// Result of [`HttpConnection::send_data`] and [`HttpConnection::send_href`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    FailedNoFurtherAction,
}

/// Options for [`HttpConnection::send_file`].
#[derive(Debug, Clone)]
pub struct SendFileOptions {
    pub path: PathBuf,
    pub status: Option<StatusCode>,
    pub content_type: Option<ContentType>,
    pub cache_control: Option<CacheControl>,
    pub cookie: Vec<(String, String)>,
}

impl SendFileOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            status: None,
            content_type: None,
            cache_control: None,
            cookie: Vec::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = Some(cache_control);
        self
    }

    pub fn cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookie.push((key.into(), value.into()));
        self
    }
}

/// Options for [`HttpConnection::send_data`].
#[derive(Debug, Clone)]
pub struct SendDataOptions {
    pub data: Bytes,
    pub status: Option<StatusCode>,
    pub content_type: Option<ContentType>,
    pub cache_control: Option<CacheControl>,
    pub cookie: Vec<(String, String)>,
}

impl SendDataOptions {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            status: None,
            content_type: None,
            cache_control: None,
            cookie: Vec::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn cache_control(mut self, cache_control: CacheControl) -> Self {
        self.cache_control = Some(cache_control);
        self
    }

    pub fn cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookie.push((key.into(), value.into()));
        self
    }
}

/// Options for [`HttpConnection::send_href`].
#[derive(Debug, Clone)]
pub struct SendHrefOptions {
    pub href: String,
    pub status: Option<StatusCode>,
    pub cookie: Vec<(String, String)>,
}

impl SendHrefOptions {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            status: None,
            cookie: Vec::new(),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookie.push((key.into(), value.into()));
        self
    }
}

/// Parsed view over one exchange.
pub struct HttpConnection {
    exchange: Arc<HttpExchange>,
    method: String,
    pathname: String,
    search: String,
    search_params: HashMap<String, String>,
    cookie: HashMap<String, String>,
    body: Shared<BoxFuture<'static, String>>,
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("exchange", &self.exchange.id())
            .field("method", &self.method)
            .field("pathname", &self.pathname)
            .field("search", &self.search)
            .finish_non_exhaustive()
    }
}

impl HttpConnection {
    pub fn new(exchange: Arc<HttpExchange>) -> Self {
        let method = exchange.method().unwrap_or("GET").to_owned();
        let (pathname, search) = split_target(exchange.url().unwrap_or("/"));
        let (pathname, search) = (pathname.to_owned(), search.to_owned());
        let search_params = parse_search(&search);
        let cookie = parse_cookie(exchange.headers());
        let body = collect_body(&exchange);

        Self {
            exchange,
            pathname,
            search,
            method,
            search_params,
            cookie,
            body,
        }
    }

    pub fn exchange(&self) -> &Arc<HttpExchange> {
        &self.exchange
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Query string including the leading `?`, or empty.
    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn search_params(&self) -> &HashMap<String, String> {
        &self.search_params
    }

    pub fn cookie(&self) -> &HashMap<String, String> {
        &self.cookie
    }

    pub fn headers(&self) -> &HeaderMap {
        self.exchange.headers()
    }

    /// The request body as text. Every clone resolves to the same value.
    pub fn body(&self) -> Shared<BoxFuture<'static, String>> {
        self.body.clone()
    }

    /// Stream a file from disk, honouring a `Range` request header.
    pub async fn send_file(&self, options: SendFileOptions) -> SendFileOutcome {
        let outcome = self.stream_file(options).await;
        metrics::record_file_served(outcome.as_str());
        outcome
    }

    async fn stream_file(&self, options: SendFileOptions) -> SendFileOutcome {
        let metadata = match tokio::fs::metadata(&options.path).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(path = %options.path.display(), error = %error, "File stat failed");
                return SendFileOutcome::FailedStatsNotFound;
            }
        };
        if metadata.is_dir() {
            return SendFileOutcome::FailedDirectory;
        }
        if !metadata.is_file() {
            return SendFileOutcome::FailedUnknownStats;
        }

        let size = metadata.len();
        let path_text = options.path.to_string_lossy();
        let content_type = options
            .content_type
            .unwrap_or_else(|| ContentType::for_path(&path_text));
        let cache_control = options
            .cache_control
            .unwrap_or_else(|| CacheControl::for_path(&path_text));

        let mut headers = ResponseHeaders::new();
        headers.append("x-content-type-options", HeaderValue::from_static("nosniff"));
        headers.append("cache-control", HeaderValue::from_static(cache_control.as_str()));
        headers.append("content-type", HeaderValue::from_static(content_type.as_str()));
        append_cookies(&mut headers, &options.cookie);

        let requested = self
            .headers()
            .get(RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(RangeRequest::parse);

        let (status, range) = match requested {
            Some(request) => match request.resolve(size) {
                Ok(range) => {
                    headers.append_str("content-range", &range::content_range(&range, size));
                    headers.append("content-length", HeaderValue::from(range.len()));
                    headers.append("accept-ranges", HeaderValue::from_static("bytes"));
                    (options.status.unwrap_or(StatusCode::PARTIAL_CONTENT), Some(range))
                }
                Err(unsatisfiable) => return self.reject_range(headers, unsatisfiable),
            },
            None => (options.status.unwrap_or(StatusCode::OK), None),
        };

        // a head written earlier by someone else still lets the body through
        if self.exchange.write_response_head(status, headers) == HeadOutcome::FailedWritableEnded {
            return SendFileOutcome::FailedNoFurtherAction;
        }

        let reader = RangeFileReader::open(options.path, range);
        match pipe(reader, Arc::clone(&self.exchange)).await {
            PipeOutcome::Success => SendFileOutcome::Success,
            failed => {
                tracing::debug!(exchange_id = %self.exchange.id(), outcome = ?failed, "File relay stopped");
                SendFileOutcome::FailedNoFurtherAction
            }
        }
    }

    fn reject_range(&self, mut headers: ResponseHeaders, unsatisfiable: Unsatisfiable) -> SendFileOutcome {
        headers.append_str("content-range", &unsatisfiable.content_range());
        if self
            .exchange
            .write_response_head(StatusCode::RANGE_NOT_SATISFIABLE, headers)
            == HeadOutcome::FailedWritableEnded
        {
            return SendFileOutcome::FailedNoFurtherAction;
        }
        match self.exchange.end_response() {
            EndOutcome::Success => SendFileOutcome::Success,
            _ => SendFileOutcome::FailedNoFurtherAction,
        }
    }

    /// Answer with an in-memory payload.
    pub fn send_data(&self, options: SendDataOptions) -> SendOutcome {
        let mut headers = ResponseHeaders::new();
        headers.append(
            "Content-Type",
            HeaderValue::from_static(options.content_type.unwrap_or(ContentType::TextPlain).as_str()),
        );
        headers.append(
            "Cache-Control",
            HeaderValue::from_static(options.cache_control.unwrap_or(CacheControl::NoCache).as_str()),
        );
        headers.append("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
        append_cookies(&mut headers, &options.cookie);

        let status = options.status.unwrap_or(StatusCode::OK);
        if self.exchange.write_response_head(status, headers) != HeadOutcome::Success {
            return SendOutcome::FailedNoFurtherAction;
        }
        match self.exchange.write_response(options.data) {
            WriteOutcome::Success | WriteOutcome::SuccessDrain => {}
            _ => return SendOutcome::FailedNoFurtherAction,
        }
        match self.exchange.end_response() {
            EndOutcome::Success => SendOutcome::Success,
            _ => SendOutcome::FailedNoFurtherAction,
        }
    }

    /// Answer with a redirect.
    pub fn send_href(&self, options: SendHrefOptions) -> SendOutcome {
        let mut headers = ResponseHeaders::new();
        if !headers.append_str("Location", &options.href) {
            return SendOutcome::FailedNoFurtherAction;
        }
        append_cookies(&mut headers, &options.cookie);

        let status = options.status.unwrap_or(StatusCode::TEMPORARY_REDIRECT);
        if self.exchange.write_response_head(status, headers) != HeadOutcome::Success {
            return SendOutcome::FailedNoFurtherAction;
        }
        match self.exchange.end_response() {
            EndOutcome::Success => SendOutcome::Success,
            _ => SendOutcome::FailedNoFurtherAction,
        }
    }
}

/// One `Set-Cookie` field per pair, no attributes.
fn append_cookies(headers: &mut ResponseHeaders, cookie: &[(String, String)]) {
    for (key, value) in cookie {
        headers.append_str("set-cookie", &format!("{key}={value}"));
    }
}

/// Split a request target into pathname and search. The search runs from the
/// first `?` up to, not including, a second one.
fn split_target(url: &str) -> (&str, &str) {
    match url.find('?') {
        None => (url, ""),
        Some(index) => {
            let (pathname, rest) = url.split_at(index);
            let search = match rest[1..].find('?') {
                Some(next) => &rest[..next + 1],
                None => rest,
            };
            (pathname, search)
        }
    }
}

fn parse_search(search: &str) -> HashMap<String, String> {
    let query = search.strip_prefix('?').unwrap_or(search);
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

/// Cookie pairs from every `cookie` field; HTTP/2 may split them.
/// Pairs without `=` are dropped; the value stops at a second `=`.
fn parse_cookie(headers: &HeaderMap) -> HashMap<String, String> {
    let joined = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");

    joined
        .split("; ")
        .filter(|pair| pair.contains('='))
        .map(|pair| {
            let mut parts = pair.split('=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            (key.to_owned(), value.to_owned())
        })
        .collect()
}

fn collect_body(exchange: &HttpExchange) -> Shared<BoxFuture<'static, String>> {
    let deadline = Instant::now() + BODY_TIMEOUT;
    let text = Arc::new(Mutex::new(String::new()));
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let _ = exchange.set_request_encoding(Encoding::Utf8);
    let _ = exchange.on_request_end(move || {
        let _ = done_tx.send(());
    });
    let collected = Arc::clone(&text);
    let _ = exchange.on_request_data(move |chunk| {
        collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_str(&String::from_utf8_lossy(&chunk));
    });

    async move {
        if tokio::time::timeout_at(deadline, done_rx).await.is_err() {
            tracing::debug!("Request body incomplete at timeout");
        }
        let text = text.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        text.clone()
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;

    fn connection(request: Request<Body>) -> (HttpConnection, crate::http::exchange::PendingResponse) {
        let (exchange, pending) = HttpExchange::accept(request);
        (HttpConnection::new(exchange), pending)
    }

    #[test]
    fn splits_pathname_and_search() {
        assert_eq!(split_target("/a/b?x=1"), ("/a/b", "?x=1"));
        assert_eq!(split_target("/a?x=1?y=2"), ("/a", "?x=1"));
        assert_eq!(split_target("/plain"), ("/plain", ""));
    }

    #[test]
    fn last_duplicate_search_param_wins() {
        let params = parse_search("?a=1&b=two%20words&a=3");
        assert_eq!(params["a"], "3");
        assert_eq!(params["b"], "two words");
    }

    #[test]
    fn cookie_pairs_without_equals_are_dropped() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("session=abc; flag; theme=dark=blue"));
        headers.append(COOKIE, HeaderValue::from_static("lang=en"));
        let cookie = parse_cookie(&headers);
        assert_eq!(cookie.len(), 3);
        assert_eq!(cookie["session"], "abc");
        assert_eq!(cookie["theme"], "dark");
        assert_eq!(cookie["lang"], "en");
    }

    #[tokio::test]
    async fn parses_the_request_view() {
        let (connection, _pending) = connection(
            Request::builder()
                .method("PUT")
                .uri("/items/7?sort=asc")
                .header("cookie", "id=42")
                .body(Body::from("payload"))
                .unwrap(),
        );
        assert_eq!(connection.method(), "PUT");
        assert_eq!(connection.pathname(), "/items/7");
        assert_eq!(connection.search(), "?sort=asc");
        assert_eq!(connection.search_params()["sort"], "asc");
        assert_eq!(connection.cookie()["id"], "42");
        assert_eq!(connection.body().await, "payload");
        assert_eq!(connection.body().await, "payload");
    }

    #[tokio::test(start_paused = true)]
    async fn body_resolves_with_partial_data_after_timeout() {
        use futures_util::{stream, StreamExt};
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
            .chain(stream::pending());
        let (connection, _pending) = connection(
            Request::builder()
                .method("POST")
                .uri("/")
                .body(Body::from_stream(body))
                .unwrap(),
        );

        assert_eq!(connection.body().await, "partial");
    }

    #[tokio::test]
    async fn send_data_writes_defaults() {
        let (connection, pending) = connection(Request::builder().uri("/").body(Body::empty()).unwrap());
        let outcome = connection.send_data(
            SendDataOptions::new("hello")
                .status(StatusCode::ACCEPTED)
                .cookie("a", "1")
                .cookie("b", "2"),
        );
        assert_eq!(outcome, SendOutcome::Success);
        assert_eq!(connection.send_data(SendDataOptions::new("again")), SendOutcome::FailedNoFurtherAction);

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.headers()["content-type"], "text/plain; charset=utf-8");
        assert_eq!(response.headers()["cache-control"], "no-cache");
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        let cookies: Vec<_> = response.headers().get_all("set-cookie").iter().map(|value| value.to_str().unwrap()).collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn send_href_redirects() {
        let (connection, pending) = connection(Request::builder().uri("/old").body(Body::empty()).unwrap());
        assert_eq!(connection.send_href(SendHrefOptions::new("/new")), SendOutcome::Success);

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()["location"], "/new");
    }

    #[tokio::test]
    async fn unsatisfiable_range_answers_416() {
        let dir = std::env::temp_dir().join(format!("h2-relay-conn-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("small.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let (connection, pending) = connection(
            Request::builder()
                .uri("/small.txt")
                .header("range", "bytes=10-")
                .body(Body::empty())
                .unwrap(),
        );
        assert_eq!(connection.send_file(SendFileOptions::new(&path)).await, SendFileOutcome::Success);

        let response = pending.into_response().await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()["content-range"], "bytes */10");
    }

    #[tokio::test]
    async fn directory_writes_nothing() {
        let (connection, _pending) = connection(Request::builder().uri("/").body(Body::empty()).unwrap());
        let outcome = connection.send_file(SendFileOptions::new(std::env::temp_dir())).await;
        assert_eq!(outcome, SendFileOutcome::FailedDirectory);
        assert!(!connection.exchange().headers_sent());
        assert!(!connection.exchange().is_response_ended());
    }

    #[tokio::test]
    async fn missing_file_writes_nothing() {
        let (connection, _pending) = connection(Request::builder().uri("/").body(Body::empty()).unwrap());
        let path = std::env::temp_dir().join("h2-relay-conn-missing.bin");
        assert_eq!(connection.send_file(SendFileOptions::new(path)).await, SendFileOutcome::FailedStatsNotFound);
        assert!(!connection.exchange().headers_sent());
    }
}
