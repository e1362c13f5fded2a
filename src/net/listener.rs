//! Listener variants.
//!
//! # Responsibilities
//! - Resolve the bind address
//! - Pick one of four server variants from protocol and TLS settings
//! - Restrict the connection builder to the variant's wire protocol
//!
//! # Design Decisions
//! - HTTP/1.1 responses keep Title-Case header names on the wire
//! - A TLS HTTP/2 listener may also accept HTTP/1.1 through ALPN

use std::net::SocketAddr;

use axum::Router;
use axum_server::{Handle, Server};
use hyper_util::rt::TokioExecutor;
use hyper_util::server::conn::auto::Builder;

use crate::config::{ListenerConfig, ListenerProtocol};
use crate::net::tls::{load_tls_config, Alpn, TlsError};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot resolve {0}")]
    Resolve(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("server failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The four server shapes a listener can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVariant {
    PlainHttp1,
    PlainHttp2,
    TlsHttp1,
    TlsHttp2 { allow_http1: bool },
}

impl ServerVariant {
    pub fn from_config(config: &ListenerConfig) -> Self {
        match (config.protocol, config.tls.is_some()) {
            (ListenerProtocol::Http1, false) => ServerVariant::PlainHttp1,
            (ListenerProtocol::Http2, false) => ServerVariant::PlainHttp2,
            (ListenerProtocol::Http1, true) => ServerVariant::TlsHttp1,
            (ListenerProtocol::Http2, true) => ServerVariant::TlsHttp2 {
                allow_http1: config.allow_http1,
            },
        }
    }

    /// ALPN offered during the handshake, `None` for cleartext.
    pub fn alpn(&self) -> Option<Alpn> {
        match self {
            ServerVariant::PlainHttp1 | ServerVariant::PlainHttp2 => None,
            ServerVariant::TlsHttp1 => Some(Alpn::Http1),
            ServerVariant::TlsHttp2 { allow_http1: false } => Some(Alpn::Http2),
            ServerVariant::TlsHttp2 { allow_http1: true } => Some(Alpn::Http2WithHttp1),
        }
    }

    fn configure(&self, builder: Builder<TokioExecutor>) -> Builder<TokioExecutor> {
        let mut builder = match self {
            ServerVariant::PlainHttp1 | ServerVariant::TlsHttp1 => builder.http1_only(),
            ServerVariant::PlainHttp2 | ServerVariant::TlsHttp2 { allow_http1: false } => {
                builder.http2_only()
            }
            ServerVariant::TlsHttp2 { allow_http1: true } => builder,
        };
        builder.http1().title_case_headers(true);
        builder
    }
}

fn restrict<A>(server: &mut Server<A>, variant: ServerVariant) {
    let builder = server.http_builder();
    let current = std::mem::replace(builder, Builder::new(TokioExecutor::new()));
    *builder = variant.configure(current);
}

async fn resolve(config: &ListenerConfig) -> Result<SocketAddr, ServerError> {
    let target = format!("{}:{}", config.host, config.port);
    let mut addresses = match tokio::net::lookup_host(target.clone()).await {
        Ok(addresses) => addresses,
        Err(_) => return Err(ServerError::Resolve(target)),
    };
    addresses.next().ok_or(ServerError::Resolve(target))
}

/// Serve `router` until `handle` shuts the server down.
pub async fn serve(config: &ListenerConfig, router: Router, handle: Handle) -> Result<(), ServerError> {
    let address = resolve(config).await?;
    let variant = ServerVariant::from_config(config);
    let service = router.into_make_service();

    tracing::info!(address = %address, variant = ?variant, "Listener starting");

    match (&config.tls, variant.alpn()) {
        (Some(tls), Some(alpn)) => {
            let tls_config = load_tls_config(&tls.cert_path, &tls.key_path, alpn)?;
            let mut server = axum_server::bind_rustls(address, tls_config).handle(handle);
            restrict(&mut server, variant);
            server.serve(service).await?;
        }
        _ => {
            let mut server = axum_server::bind(address).handle(handle);
            restrict(&mut server, variant);
            server.serve(service).await?;
        }
    }

    tracing::info!(address = %address, "Listener stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;

    fn listener(protocol: ListenerProtocol, tls: bool, allow_http1: bool) -> ListenerConfig {
        ListenerConfig {
            protocol,
            allow_http1,
            tls: tls.then(|| TlsConfig {
                cert_path: "cert.pem".into(),
                key_path: "key.pem".into(),
            }),
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn resolves_the_bind_address() {
        let config = ListenerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            ..ListenerConfig::default()
        };
        assert_eq!(resolve(&config).await.unwrap(), SocketAddr::from(([127, 0, 0, 1], 8080)));

        let config = ListenerConfig {
            host: "no such host".into(),
            ..ListenerConfig::default()
        };
        assert!(matches!(resolve(&config).await, Err(ServerError::Resolve(target)) if target.starts_with("no such host:")));
    }

    #[test]
    fn picks_the_variant() {
        assert_eq!(
            ServerVariant::from_config(&listener(ListenerProtocol::Http1, false, false)),
            ServerVariant::PlainHttp1
        );
        assert_eq!(
            ServerVariant::from_config(&listener(ListenerProtocol::Http2, false, false)),
            ServerVariant::PlainHttp2
        );
        assert_eq!(
            ServerVariant::from_config(&listener(ListenerProtocol::Http1, true, false)),
            ServerVariant::TlsHttp1
        );
        assert_eq!(
            ServerVariant::from_config(&listener(ListenerProtocol::Http2, true, true)),
            ServerVariant::TlsHttp2 { allow_http1: true }
        );
    }

    #[test]
    fn cleartext_has_no_alpn() {
        assert_eq!(ServerVariant::PlainHttp2.alpn(), None);
        assert_eq!(ServerVariant::TlsHttp2 { allow_http1: false }.alpn(), Some(Alpn::Http2));
    }

    #[tokio::test]
    async fn missing_certificates_fail_startup() {
        let config = ListenerConfig {
            port: 18443,
            ..listener(ListenerProtocol::Http2, true, false)
        };
        let result = serve(&config, Router::new(), Handle::new()).await;
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }
}
