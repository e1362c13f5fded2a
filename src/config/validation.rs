//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, addresses)
//! - Check that the listener variant is coherent
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::schema::{ListenerProtocol, Mode, RelayConfig};

/// One semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.port must not be 0")]
    ZeroPort,

    #[error("listener.allow_http1 requires protocol = \"http2\" with tls")]
    AllowHttp1WithoutTlsHttp2,

    #[error("proxy authority {0:?} must be a host without port")]
    InvalidAuthority(String),

    #[error("upstream address {address:?} for {authority:?} must be host:port")]
    InvalidUpstream { authority: String, address: String },

    #[error("site.root must not be empty in static mode")]
    EmptySiteRoot,

    #[error("site.index {0:?} must be a plain file name")]
    InvalidIndex(String),

    #[error("observability.log_level {0:?} is not a valid filter")]
    InvalidLogLevel(String),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.port == 0 {
        errors.push(ValidationError::ZeroPort);
    }
    if listener.allow_http1 && (listener.protocol != ListenerProtocol::Http2 || listener.tls.is_none()) {
        errors.push(ValidationError::AllowHttp1WithoutTlsHttp2);
    }

    for (authority, address) in &config.proxy.authorities {
        if authority.is_empty() || authority.contains(':') || authority.contains('/') {
            errors.push(ValidationError::InvalidAuthority(authority.clone()));
        }
        if !is_host_port(address) {
            errors.push(ValidationError::InvalidUpstream {
                authority: authority.clone(),
                address: address.clone(),
            });
        }
    }

    if config.mode == Mode::Static {
        if config.site.root.as_os_str().is_empty() {
            errors.push(ValidationError::EmptySiteRoot);
        }
        let index = &config.site.index;
        if index.is_empty() || index.contains('/') || index == ".." {
            errors.push(ValidationError::InvalidIndex(index.clone()));
        }
    }

    let observability = &config.observability;
    if EnvFilter::try_new(&observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled && observability.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidMetricsAddress(observability.metrics_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok_and(|port| port != 0),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsConfig;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&RelayConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_error() {
        let mut config = RelayConfig::default();
        config.listener.port = 0;
        config.listener.allow_http1 = true;
        config.proxy.authorities.insert("api.example.com:443".into(), "127.0.0.1:5000".into());
        config.proxy.authorities.insert("ok.example.com".into(), "localhost".into());

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ZeroPort));
        assert!(errors.contains(&ValidationError::AllowHttp1WithoutTlsHttp2));
        assert!(errors.contains(&ValidationError::InvalidAuthority("api.example.com:443".into())));
    }

    #[test]
    fn allow_http1_on_tls_http2_is_fine() {
        let mut config = RelayConfig::default();
        config.listener.protocol = ListenerProtocol::Http2;
        config.listener.allow_http1 = true;
        config.listener.tls = Some(TlsConfig {
            cert_path: "cert.pem".into(),
            key_path: "key.pem".into(),
        });
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn static_mode_checks_the_site() {
        let mut config = RelayConfig::default();
        config.mode = Mode::Static;
        config.site.index = "../index.html".into();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            [
                ValidationError::InvalidIndex("../index.html".into()),
                ValidationError::InvalidMetricsAddress("nowhere".into()),
            ]
        );
    }
}
