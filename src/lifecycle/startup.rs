//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize logging and metrics from the loaded configuration
//! - Build the router for the configured mode
//! - Keep the authority map current while the config file changes
//! - Bind the listener and drain it on shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Only the authority map hot-reloads; listener changes need a restart

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_server::Handle;
use notify::RecommendedWatcher;

use crate::config::{ConfigWatcher, Mode, RelayConfig};
use crate::connection::StaticSite;
use crate::http::{proxy_router, site_router};
use crate::lifecycle::{signals, Shutdown};
use crate::net::{self, ServerError};
use crate::observability::{logging, metrics};
use crate::proxy::{AuthorityMap, Forwarder, SharedAuthorities};

/// Time in-flight exchanges get to finish after shutdown is triggered.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cannot watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

/// Run the relay until SIGINT or SIGTERM.
///
/// With a `config_path`, edits to the file replace the proxy authority map.
pub async fn run(config: RelayConfig, config_path: Option<&Path>) -> Result<(), StartupError> {
    logging::init(&config.observability.log_level);

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(address) => metrics::init_metrics(address),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (router, _watcher) = build_router(&config, config_path)?;

    let shutdown = Shutdown::new();
    let handle = Handle::new();
    let signal = shutdown.subscribe();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            Shutdown::wait(signal).await;
            tracing::info!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "Draining exchanges");
            handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
        }
    });
    tokio::spawn(signals::shutdown_on_signal(shutdown));

    net::serve(&config.listener, router, handle).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_router(
    config: &RelayConfig,
    config_path: Option<&Path>,
) -> Result<(Router, Option<RecommendedWatcher>), StartupError> {
    match config.mode {
        Mode::Static => {
            tracing::info!(root = %config.site.root.display(), index = %config.site.index, "Serving static site");
            let site = StaticSite::new(config.site.root.clone(), config.site.index.clone());
            Ok((site_router(site), None))
        }
        Mode::Proxy => {
            let authorities = AuthorityMap::new(config.proxy.authorities.clone()).into_shared();
            tracing::info!(authorities = authorities.load().len(), "Forwarding to HTTP/2 upstreams");

            let watcher = match config_path {
                Some(path) => Some(watch_authorities(path, authorities.clone())?),
                None => None,
            };
            let forwarder = Arc::new(Forwarder::new(authorities));
            Ok((proxy_router(forwarder), watcher))
        }
    }
}

fn watch_authorities(path: &Path, authorities: SharedAuthorities) -> Result<RecommendedWatcher, StartupError> {
    let (watcher, mut updates) = ConfigWatcher::new(path);
    let guard = watcher.run()?;

    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            let map = AuthorityMap::new(config.proxy.authorities);
            tracing::info!(authorities = map.len(), "Authority map reloaded");
            authorities.store(Arc::new(map));
        }
    });

    Ok(guard)
}
