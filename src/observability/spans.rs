//! Per-exchange spans.

use tracing::Span;

use crate::http::exchange::HttpExchange;

/// Span wrapping all work done for one exchange.
pub fn exchange_span(exchange: &HttpExchange) -> Span {
    tracing::info_span!(
        "exchange",
        id = %exchange.id(),
        protocol = exchange.protocol().as_str(),
        method = exchange.method().unwrap_or_default(),
        url = exchange.url().unwrap_or_default(),
        authority = exchange.authority().unwrap_or_default(),
    )
}
