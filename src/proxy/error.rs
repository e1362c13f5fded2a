//! Proxy failures and the injected handler that answers them.

use axum::http::StatusCode;

use crate::connection::{HttpConnection, SendDataOptions, SendOutcome};
use crate::stream::source::error_chain;

/// A user-visible proxy failure. The display text is the message handed to
/// the [`ErrorHandler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("authority is undefined")]
    AuthorityUndefined,

    #[error("cannot find authority in config")]
    AuthorityNotFound,

    #[error("client got immediately closed")]
    ClientClosed,

    #[error("request got immediately closed")]
    RequestClosed,

    #[error("cannot end response because headers were not sent")]
    HeadersNotSent,

    /// Transport or protocol error reported by the upstream connection.
    #[error("{0}")]
    Upstream(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::AuthorityUndefined | ProxyError::AuthorityNotFound => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn upstream(error: impl std::error::Error) -> Self {
        ProxyError::Upstream(error_chain(&error))
    }
}

/// Produces the response for a failed proxy session. Invoked at most once per
/// exchange.
pub trait ErrorHandler: Send + Sync + 'static {
    fn handle(&self, connection: HttpConnection, message: &str, status: StatusCode);
}

impl<F> ErrorHandler for F
where
    F: Fn(HttpConnection, &str, StatusCode) + Send + Sync + 'static,
{
    fn handle(&self, connection: HttpConnection, message: &str, status: StatusCode) {
        self(connection, message, status)
    }
}

/// Answers with the message as a plain-text body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextErrors;

impl ErrorHandler for PlainTextErrors {
    fn handle(&self, connection: HttpConnection, message: &str, status: StatusCode) {
        let outcome = connection.send_data(SendDataOptions::new(message.to_owned()).status(status));
        if outcome != SendOutcome::Success {
            tracing::debug!(
                exchange_id = %connection.exchange().id(),
                %status,
                "Error response not delivered"
            );
        }
    }
}
