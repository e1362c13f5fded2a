//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → startup swaps the shared authority map
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only the authority map is hot-swapped
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ListenerConfig, ListenerProtocol, Mode, ObservabilityConfig, ProxyConfig, RelayConfig,
    SiteConfig, TlsConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
