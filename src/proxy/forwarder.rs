//! Forward one exchange to the upstream that owns its authority.
//!
//! # Data Flow
//! ```text
//! Resolving          authority → upstream address
//! Connecting         fresh HTTP/2 connection
//! StreamingRequest   inbound body ──pipe──▶ upstream stream   (own task)
//! AwaitingHeaders    upstream head → title-cased response head
//! StreamingResponse  upstream body ──pipe──▶ response
//! Done               response ended, connection destroyed
//! ```
//!
//! Any step may end in `Errored`; see [`ProxySession`] for how failures are
//! reported and the connection torn down.

use std::sync::Arc;

use axum::http::{Request, Uri, Version};
use tracing::Instrument;

use crate::http::exchange::HttpExchange;
use crate::proxy::authority::SharedAuthorities;
use crate::proxy::error::{ErrorHandler, PlainTextErrors, ProxyError};
use crate::proxy::headers::{forwardable_headers, translate_response_headers};
use crate::proxy::session::{ProxySession, SessionState};
use crate::proxy::upstream::{UpstreamBody, UpstreamClient};
use crate::stream::outcome::{HeadOutcome, PipeOutcome};
use crate::stream::pipe::pipe;
use crate::stream::sink::{body_channel, BodyWriter, ChannelBody, DEFAULT_HIGH_WATER_MARK};

/// Relays exchanges to upstream HTTP/2 servers chosen by authority.
pub struct Forwarder {
    authorities: SharedAuthorities,
    errors: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("authorities", &self.authorities.load().len())
            .finish_non_exhaustive()
    }
}

impl Forwarder {
    /// Forwarder answering failures with [`PlainTextErrors`].
    pub fn new(authorities: SharedAuthorities) -> Self {
        Self {
            authorities,
            errors: Arc::new(PlainTextErrors),
        }
    }

    pub fn with_error_handler(mut self, handler: impl ErrorHandler) -> Self {
        self.errors = Arc::new(handler);
        self
    }

    pub fn authorities(&self) -> &SharedAuthorities {
        &self.authorities
    }

    /// Run one proxy session to completion.
    pub async fn forward(&self, exchange: Arc<HttpExchange>) {
        let session = ProxySession::new(Arc::clone(&exchange), Arc::clone(&self.errors));
        if let Err(error) = self.relay(&session, &exchange).await {
            session.fail(error);
        }
        tracing::debug!(state = %session.state(), "Proxy session finished");
    }

    async fn relay(&self, session: &Arc<ProxySession>, exchange: &Arc<HttpExchange>) -> Result<(), ProxyError> {
        let authority = exchange.authority().ok_or(ProxyError::AuthorityUndefined)?;
        let address = self
            .authorities
            .load()
            .resolve(authority)
            .map(str::to_owned)
            .ok_or(ProxyError::AuthorityNotFound)?;

        session.transition(SessionState::Connecting);
        let client = Arc::new(UpstreamClient::connect(&address).await?);
        session.attach(Arc::clone(&client));

        session.transition(SessionState::StreamingRequest);
        let (writer, body) = body_channel(DEFAULT_HIGH_WATER_MARK);
        let request = upstream_request(exchange, &address, body)?;
        let response = client.open_stream(request).await?;
        tokio::spawn(
            relay_request(Arc::clone(session), Arc::clone(exchange), writer).in_current_span(),
        );

        session.transition(SessionState::AwaitingHeaders);
        let (head, body) = response.await?.into_parts();
        let headers = translate_response_headers(&head.headers);
        if exchange.write_response_head(head.status, headers) == HeadOutcome::FailedWritableEnded {
            session.abort();
            return Ok(());
        }

        session.transition(SessionState::StreamingResponse);
        match pipe(UpstreamBody::new(body), Arc::clone(exchange)).await {
            PipeOutcome::Success => session.complete(),
            PipeOutcome::FailedHeadersNotSent => return Err(ProxyError::HeadersNotSent),
            PipeOutcome::FailedSource(message) => return Err(ProxyError::Upstream(message)),
            PipeOutcome::FailedReadableEnded | PipeOutcome::FailedWritableEnded => session.abort(),
        }
        Ok(())
    }
}

/// Inbound body → upstream request body.
///
/// An upstream that drops the request body has either answered already or
/// will fail the response future, so the response leg owns teardown and
/// reporting in that case.
async fn relay_request(session: Arc<ProxySession>, exchange: Arc<HttpExchange>, writer: BodyWriter) {
    match pipe(Arc::clone(&exchange), Arc::new(writer)).await {
        PipeOutcome::Success => tracing::trace!("Request body relayed"),
        PipeOutcome::FailedWritableEnded => tracing::debug!(
            headers_sent = exchange.headers_sent(),
            "Upstream stopped reading the request body"
        ),
        PipeOutcome::FailedSource(message) => {
            tracing::debug!(error = %message, "Inbound body failed");
            session.abort();
        }
        PipeOutcome::FailedReadableEnded | PipeOutcome::FailedHeadersNotSent => session.abort(),
    }
}

fn upstream_request(
    exchange: &HttpExchange,
    address: &str,
    body: ChannelBody,
) -> Result<Request<ChannelBody>, ProxyError> {
    let uri = Uri::builder()
        .scheme("http")
        .authority(address)
        .path_and_query(exchange.url().unwrap_or("/"))
        .build()
        .map_err(ProxyError::upstream)?;

    let mut request = Request::builder()
        .method(exchange.method().unwrap_or("GET"))
        .uri(uri)
        .version(Version::HTTP_2)
        .body(body)
        .map_err(ProxyError::upstream)?;
    *request.headers_mut() = forwardable_headers(exchange.headers());
    Ok(request)
}
