//! Proxy forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! HttpExchange
//!     → forwarder.rs (state machine)
//!     → authority.rs (authority → upstream address)
//!     → upstream.rs (fresh HTTP/2 connection per request)
//!     → headers.rs (hop-by-hop filtering, Title-Case translation)
//!     → session.rs (single-fire error report, exactly-once teardown)
//!     → error.rs (ProxyError → injected ErrorHandler)
//! ```
//!
//! # Design Decisions
//! - No pooling, retries or caching
//! - Both directions reuse the stream pipe, so backpressure works the same
//!   way as file serving

pub mod authority;
pub mod error;
pub mod forwarder;
pub mod headers;
pub mod session;
pub mod upstream;

pub use authority::{AuthorityMap, SharedAuthorities};
pub use error::{ErrorHandler, PlainTextErrors, ProxyError};
pub use forwarder::Forwarder;
pub use session::{ProxySession, SessionState};
pub use upstream::{UpstreamBody, UpstreamClient};
