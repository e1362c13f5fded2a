//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerConfig
//!     → listener.rs (server variant, bind, builder restrictions)
//!     → tls.rs (PEM loading, ALPN)
//!     → axum-server accept loop
//!     → Hand off to HTTP layer
//! ```

pub mod listener;
pub mod tls;

pub use listener::{serve, ServerError, ServerVariant};
pub use tls::{load_tls_config, Alpn, TlsError};
