//! Transport boundary between the session client and the network.
//!
//! [`SessionClient`](crate::SessionClient) decides which credential goes on a
//! request; a [`Transport`] only moves the prepared request over the wire and
//! reports status and body. [`HttpTransport`] is the `reqwest` implementation.

use std::future::Future;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::TransportError;

/// A request ready to be sent, with its bearer token already resolved.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    /// Path relative to the transport's base URL.
    pub path: String,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<SecretString>,
    /// JSON request body.
    pub body: Option<serde_json::Value>,
    /// Correlation ID sent as `X-Request-Id`.
    pub request_id: Uuid,
}

/// Status and raw body of a response.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Build a response from a JSON value.
    #[must_use]
    pub fn json(status: StatusCode, body: &serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
        }
    }
}

/// Something that can execute prepared requests.
pub trait Transport: Send + Sync + 'static {
    /// Send the request and return the response, whatever its status.
    ///
    /// Only network-level failures are errors; a 4xx/5xx response is `Ok`.
    fn execute(
        &self,
        request: PreparedRequest,
    ) -> impl Future<Output = Result<RawResponse, TransportError>> + Send;
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Create a transport for the configured base URL and timeout.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Http` if the HTTP client cannot be built.
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("storefront-session/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        let url = self.base_url.join(request.path.trim_start_matches('/'))?;

        let mut builder = self
            .client
            .request(request.method, url)
            .header("X-Request-Id", request.request_id.to_string())
            .header("Accept", "application/json");
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();

        Ok(RawResponse { status, body })
    }
}
