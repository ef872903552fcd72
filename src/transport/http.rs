//! Default HTTP(S) transport backed by `reqwest`.

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, ClientBuilder};
use tracing::{debug, instrument};

use super::{Transport, TransportError, TransportRequest};
use crate::response::Response;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum redirects followed when redirects are enabled.
const MAX_REDIRECTS: usize = 10;

/// HTTP transport with connection pooling, gzip decoding and a session
/// cookie store.
///
/// Create once and share; the inner `reqwest::Client` is reference counted.
///
/// # Example
///
/// ```no_run
/// use scrapelib::transport::{HttpTransport, Transport, TransportRequest};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new()?;
/// let request = TransportRequest::new(reqwest::Method::GET, "https://example.com/");
/// let response = transport.send(&request).await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport that follows redirects and has no default
    /// request timeout.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_options(true, None)
    }

    /// Creates a transport with explicit redirect and timeout settings.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialised.
    #[instrument(level = "debug")]
    pub fn with_options(
        follow_redirects: bool,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let client = build_client(follow_redirects, timeout)?;
        Ok(Self { client })
    }

    /// Wraps an already configured `reqwest::Client`.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: &TransportRequest) -> Result<Response, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_reqwest_error(&request.url, e))?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&request.url, e))?;

        debug!(status, bytes = body.len(), "response received");

        Ok(Response::new(status, url)
            .with_headers(headers)
            .with_body(body.to_vec()))
    }
}

fn build_client(
    follow_redirects: bool,
    timeout: Option<Duration>,
) -> Result<Client, reqwest::Error> {
    let policy = if follow_redirects {
        Policy::limited(MAX_REDIRECTS)
    } else {
        Policy::none()
    };
    let mut builder = ClientBuilder::new()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .redirect(policy)
        .cookie_store(true)
        .gzip(true);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::timeout(url)
    } else if is_tls_error(&error) {
        TransportError::tls(url, error_chain_message(&error))
    } else {
        TransportError::network(url, error)
    }
}

/// Checks whether a reqwest error is a TLS/certificate error.
///
/// reqwest does not expose a TLS predicate, so the whole source chain is
/// inspected for TLS vocabulary.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let message = error_chain_message(error).to_lowercase();
    message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
}

fn error_chain_message(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        message.push_str(": ");
        message.push_str(&err.to_string());
        source = err.source();
    }
    message
}
