//! Server factories: wire a connection handler or the proxy forwarder into an
//! Axum router.
//!
//! # Responsibilities
//! - Turn every inbound request into an [`HttpExchange`]
//! - Run the handler in its own task inside a per-exchange span
//! - Hand hyper the response once the handler writes a head
//!
//! # Design Decisions
//! - A single fallback route: path dispatch belongs to the handler
//! - Handlers never build `Response` values; they drive the exchange

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::connection::HttpConnection;
use crate::http::exchange::{HttpExchange, PendingResponse};
use crate::observability::{metrics, spans::exchange_span};
use crate::proxy::Forwarder;

/// Application logic run for every inbound connection view.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, connection: HttpConnection) -> impl Future<Output = ()> + Send;
}

/// Router that hands each request to `handler` as an [`HttpConnection`].
pub fn site_router<H: ConnectionHandler>(handler: H) -> Router {
    Router::new()
        .fallback(serve_connection::<H>)
        .with_state(Arc::new(handler))
        .layer(TraceLayer::new_for_http())
}

/// Router that forwards each request upstream through `forwarder`.
pub fn proxy_router(forwarder: Arc<Forwarder>) -> Router {
    Router::new()
        .fallback(serve_proxy)
        .with_state(forwarder)
        .layer(TraceLayer::new_for_http())
}

fn accept(request: Request<Body>) -> (Arc<HttpExchange>, PendingResponse) {
    let (exchange, pending) = HttpExchange::accept(request);
    metrics::record_exchange(exchange.protocol().as_str());
    (exchange, pending)
}

async fn serve_connection<H: ConnectionHandler>(
    State(handler): State<Arc<H>>,
    request: Request<Body>,
) -> Response {
    let (exchange, pending) = accept(request);
    let span = exchange_span(&exchange);
    tokio::spawn(
        async move {
            let connection = HttpConnection::new(exchange);
            handler.handle(connection).await;
        }
        .instrument(span),
    );
    pending.into_response().await
}

async fn serve_proxy(State(forwarder): State<Arc<Forwarder>>, request: Request<Body>) -> Response {
    let (exchange, pending) = accept(request);
    let span = exchange_span(&exchange);
    tokio::spawn(async move { forwarder.forward(exchange).await }.instrument(span));
    pending.into_response().await
}
