//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, EnvFilter)
//!     → metrics.rs (counters, Prometheus exporter)
//!     → spans.rs (one span per exchange)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Exchange ids flow through every event via the exchange span
//! - Metrics are cheap (atomic increments); with no recorder installed
//!   they are no-ops

pub mod logging;
pub mod metrics;
pub mod spans;
