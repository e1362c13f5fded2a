//! Header translation between the inbound exchange and the upstream stream.

use axum::http::header::{HeaderName, TE};
use axum::http::{HeaderMap, HeaderValue};

use crate::http::exchange::ResponseHeaders;

/// Connection-specific fields HTTP/2 forbids on a stream.
const HOP_BY_HOP: [&str; 4] = ["keep-alive", "proxy-connection", "transfer-encoding", "upgrade"];

/// `content-type` → `Content-Type`. Empty segments stay empty.
pub fn title_case(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join("-")
}

/// Title-case every field name, dropping pseudo-headers.
pub fn translate_pairs<'a>(
    pairs: impl IntoIterator<Item = (&'a str, &'a HeaderValue)>,
) -> ResponseHeaders {
    let mut headers = ResponseHeaders::new();
    for (name, value) in pairs {
        if name.starts_with(':') {
            continue;
        }
        headers.append(title_case(name), value.clone());
    }
    headers
}

/// Upstream response head → downstream response headers.
pub fn translate_response_headers(headers: &HeaderMap) -> ResponseHeaders {
    translate_pairs(headers.iter().map(|(name, value)| (name.as_str(), value)))
}

/// Inbound headers that may travel on an HTTP/2 stream. `te` survives only as
/// `trailers`.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if name == TE && value.as_bytes() != b"trailers" {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }
    forwarded
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}
