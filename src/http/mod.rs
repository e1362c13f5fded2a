//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (HTTP/1.1 or HTTP/2)
//!     → server.rs (Axum router, per-exchange task)
//!     → exchange.rs (normalized request, state-checked response)
//!     → connection handler | proxy forwarder
//!     → exchange response head + body channel
//!     → Send to client
//! ```

pub mod exchange;
pub mod server;

pub use exchange::{ExchangeId, HttpExchange, PendingResponse, Protocol, ResponseHeaders};
pub use server::{proxy_router, site_router, ConnectionHandler};
