//! HTTP/1.1 and HTTP/2 front end that serves files or relays exchanges to
//! HTTP/2 upstreams.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ net (listener variant, TLS/ALPN)
//!                │
//!                ▼
//!              http (HttpExchange per request)
//!                │
//!        ┌───────┴────────┐
//!        ▼                ▼
//!   connection        proxy
//!   (send_file,       (authority lookup,
//!    send_data,        fresh HTTP/2 upstream,
//!    send_href)        header translation)
//!        │                │
//!        └──────┬─────────┘
//!               ▼
//!            stream (sources, sinks, backpressure pipe)
//! ```

pub mod config;
pub mod connection;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod stream;

pub use config::RelayConfig;
pub use connection::{HttpConnection, StaticSite};
pub use http::{proxy_router, site_router, ConnectionHandler, HttpExchange};
pub use lifecycle::Shutdown;
pub use proxy::Forwarder;
