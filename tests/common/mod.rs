//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use h2_relay::config::ListenerConfig;

/// Serve `router` on an ephemeral port and return its address.
pub async fn start_relay(mut listener: ListenerConfig, router: Router) -> (SocketAddr, Handle) {
    listener.host = "127.0.0.1".into();
    listener.port = 0;
    let handle = Handle::new();
    let server_handle = handle.clone();
    tokio::spawn(async move {
        let _ = h2_relay::net::serve(&listener, router, server_handle).await;
    });
    let address = tokio::time::timeout(Duration::from_secs(5), handle.listening())
        .await
        .expect("relay did not start")
        .expect("relay failed to bind");
    (address, handle)
}

/// Response body produced by a test upstream.
pub type UpstreamBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// A running test upstream.
pub struct Upstream {
    pub address: SocketAddr,
    accepted: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn authority(&self) -> String {
        self.address.to_string()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Start a cleartext HTTP/2 upstream answering every request with `handler`.
pub async fn start_upstream<F, Fut>(handler: F) -> Upstream
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Response<UpstreamBody>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let response = handler(request);
                    async move { Ok::<_, Infallible>(response.await) }
                });
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(socket), service)
                    .await;
            });
        }
    });

    Upstream { address, accepted }
}

/// Start an upstream that echoes method, path and body.
///
/// The response carries `x-upstream-method`, `x-upstream-path` and
/// `x-upstream-authority` headers and the request body as its body.
pub async fn start_echo_upstream() -> Upstream {
    start_upstream(|request: Request<Incoming>| async move {
        let method = request.method().to_string();
        let path = request
            .uri()
            .path_and_query()
            .map(|value| value.to_string())
            .unwrap_or_default();
        let authority = request
            .uri()
            .authority()
            .map(|value| value.to_string())
            .unwrap_or_default();
        let body = request.into_body().collect().await.unwrap().to_bytes();

        Response::builder()
            .status(200)
            .header("x-upstream-method", method)
            .header("x-upstream-path", path)
            .header("x-upstream-authority", authority)
            .body(full(body))
            .unwrap()
    })
    .await
}

pub fn full(bytes: impl Into<Bytes>) -> UpstreamBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// A body that sends each item of `chunks` as one data frame.
pub fn streamed<S>(chunks: S) -> UpstreamBody
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
{
    StreamBody::new(chunks.map_ok(Frame::data)).boxed_unsync()
}

static ENDLESS_CHUNK: [u8; 16 * 1024] = [b'e'; 16 * 1024];

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A body that never ends. `dropped` turns true once the body is released.
pub fn endless_body(dropped: Arc<AtomicBool>) -> UpstreamBody {
    let flag = DropFlag(dropped);
    streamed(futures_util::stream::repeat_with(move || {
        let _held = &flag;
        Ok(Bytes::from_static(&ENDLESS_CHUNK))
    }))
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Start an upstream that accepts and immediately closes every connection.
pub async fn start_closing_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            drop(socket);
        }
    });

    address
}

/// A raw HTTP/1.1 response as seen on the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub status_line: String,
    pub header_lines: Vec<String>,
    pub body: Vec<u8>,
    /// Whether the body was framed to its end before the connection closed.
    pub complete: bool,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.status_line
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap()
    }

    /// Value of the first header whose name matches exactly, case included.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_lines.iter().find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            (key == name).then_some(value)
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Send a raw HTTP/1.1 request with `Connection: close` and read the reply.
pub async fn http1_request(address: SocketAddr, head: &str, body: &[u8]) -> RawResponse {
    http1_request_stalled(address, head, body, Duration::ZERO).await
}

/// Like [`http1_request`], but leave the reply unread for `stall` first.
pub async fn http1_request_stalled(address: SocketAddr, head: &str, body: &[u8], stall: Duration) -> RawResponse {
    let mut stream = send_http1_request(address, head, body).await;
    tokio::time::sleep(stall).await;

    // a reset after a truncated reply still leaves what was read
    let mut raw = Vec::new();
    let mut buffer = vec![0; 64 * 1024];
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Ok(read) = stream.read(&mut buffer).await {
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buffer[..read]);
        }
    })
    .await
    .expect("response timed out");
    parse_response(&raw)
}

/// Write a raw HTTP/1.1 request with `Connection: close` and hand back the socket.
pub async fn send_http1_request(address: SocketAddr, head: &str, body: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(address).await.unwrap();
    let mut request = format!("{head}\r\nConnection: close\r\n");
    if !body.is_empty() {
        request.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    request.push_str("\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream
}

fn parse_response(raw: &[u8]) -> RawResponse {
    let split = raw
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .expect("incomplete response head");
    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let mut lines = head.split("\r\n").map(str::to_owned);
    let status_line = lines.next().unwrap();
    let header_lines: Vec<String> = lines.collect();

    let payload = &raw[split + 4..];
    let chunked = header_lines
        .iter()
        .any(|line| line.eq_ignore_ascii_case("transfer-encoding: chunked"));
    let length = header_lines.iter().find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        if key.eq_ignore_ascii_case("content-length") {
            value.parse::<usize>().ok()
        } else {
            None
        }
    });
    let (body, complete) = match (chunked, length) {
        (true, _) => dechunk(payload),
        (false, Some(length)) => (payload.to_vec(), payload.len() == length),
        (false, None) => (payload.to_vec(), true),
    };

    RawResponse {
        status_line,
        header_lines,
        body,
        complete,
    }
}

/// Decode a chunked payload. The flag is false when the terminal chunk is missing.
fn dechunk(mut payload: &[u8]) -> (Vec<u8>, bool) {
    let mut body = Vec::new();
    loop {
        let Some(line_end) = payload.windows(2).position(|window| window == b"\r\n") else {
            return (body, false);
        };
        let size_text = String::from_utf8_lossy(&payload[..line_end]);
        let Ok(size) = usize::from_str_radix(size_text.trim(), 16) else {
            return (body, false);
        };
        payload = &payload[line_end + 2..];
        if size == 0 {
            return (body, true);
        }
        if payload.len() < size + 2 {
            body.extend_from_slice(&payload[..size.min(payload.len())]);
            return (body, false);
        }
        body.extend_from_slice(&payload[..size]);
        payload = &payload[size + 2..];
    }
}

/// A fresh directory under the system temp dir.
pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("h2-relay-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Send one request over a cleartext HTTP/2 connection.
pub async fn http2_request(address: SocketAddr, request: Request<Full<Bytes>>) -> Response<Bytes> {
    let stream = TcpStream::connect(address).await.unwrap();
    let (mut sender, connection) = hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(connection);

    let response = sender.send_request(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    Response::from_parts(parts, body)
}
