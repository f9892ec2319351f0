//! Authenticated storefront API client.
//!
//! Every request goes out with the stored access token. A 401 triggers one
//! renewal through the [`RenewalCoordinator`] and one replay of the request
//! with the new token; a request is never retried more than once.
//!
//! # Authentication
//!
//! Credentials come from `login`/`register` and are persisted through the
//! injected [`KeyValueStore`], so a restarted process resumes the session.
//! The renewal call bypasses the retry path, as do requests built with
//! [`ApiRequest::without_renewal`] (login and registration, where a 401
//! means bad credentials rather than an expired token).

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use storefront_core::{Email, Role, UserId};
use tracing::instrument;
use uuid::Uuid;

use crate::config::{ApiPaths, ClientConfig};
use crate::credential::{Credential, CredentialStore};
use crate::envelope;
use crate::error::{ClientError, RenewalError, TransportError};
use crate::persistence::KeyValueStore;
use crate::renewal::RenewalCoordinator;
use crate::transport::{HttpTransport, PreparedRequest, RawResponse, Transport};

/// A request to the resource server, before credentials are attached.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    renew_on_unauthorized: bool,
}

impl ApiRequest {
    /// A request with the given method and path (relative to the base URL).
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            renew_on_unauthorized: true,
        }
    }

    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if `body` cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self, serde_json::Error> {
        Ok(self.with_body(serde_json::to_value(body)?))
    }

    /// Surface a 401 as-is instead of renewing the session.
    #[must_use]
    pub const fn without_renewal(mut self) -> Self {
        self.renew_on_unauthorized = false;
        self
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Identity returned by login and registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: UserId,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Login/registration payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthPayload {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    user: SessionUser,
}

/// Renewal endpoint payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPair {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Storefront API client bound to one session.
///
/// Cheap to clone; clones share the credential store and the renewal
/// coordinator, so single-flight renewal holds across all of them.
pub struct SessionClient<T> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T> {
    transport: T,
    credentials: Arc<CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
    paths: ApiPaths,
}

impl<T> Clone for SessionClient<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SessionClient<HttpTransport> {
    /// Create a client that talks HTTP to the configured resource server.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the HTTP client cannot be built.
    pub fn connect(
        config: &ClientConfig,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(HttpTransport::new(config)?, backend, config))
    }
}

impl<T: Transport> SessionClient<T> {
    /// Create a client over `transport`, restoring any persisted session
    /// from `backend`.
    #[must_use]
    pub fn new(transport: T, backend: Arc<dyn KeyValueStore>, config: &ClientConfig) -> Self {
        let credentials = Arc::new(CredentialStore::load(backend));
        let renewal = Arc::new(RenewalCoordinator::new(
            Arc::clone(&credentials),
            config.renewal_timeout,
        ));

        Self {
            inner: Arc::new(ClientInner {
                transport,
                credentials,
                renewal,
                paths: config.paths.clone(),
            }),
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// The credential store backing this client.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.inner.credentials
    }

    /// The renewal coordinator backing this client.
    #[must_use]
    pub fn renewal(&self) -> &RenewalCoordinator {
        &self.inner.renewal
    }

    /// Whether a user is currently signed in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.credentials.is_authenticated()
    }

    /// Account of the signed-in user, if any.
    #[must_use]
    pub fn current_owner(&self) -> Option<UserId> {
        self.inner.credentials.get().map(|c| c.owner_id)
    }

    /// Sign in with email and password, replacing any existing session.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Resource` if the server rejects the credentials.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn login(
        &self,
        email: &Email,
        password: &SecretString,
    ) -> Result<SessionUser, ClientError> {
        let request = ApiRequest::post(self.inner.paths.login.clone())
            .with_body(json!({
                "email": email.as_str(),
                "password": password.expose_secret(),
            }))
            .without_renewal();
        self.establish(&request).await
    }

    /// Create an account and sign in as it.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Resource` if the server rejects the registration.
    #[instrument(skip_all, fields(email = %email))]
    pub async fn register(
        &self,
        name: &str,
        email: &Email,
        password: &SecretString,
    ) -> Result<SessionUser, ClientError> {
        let request = ApiRequest::post(self.inner.paths.register.clone())
            .with_body(json!({
                "name": name,
                "email": email.as_str(),
                "password": password.expose_secret(),
            }))
            .without_renewal();
        self.establish(&request).await
    }

    /// End the session.
    ///
    /// The server is told on a best-effort basis; the local credential is
    /// cleared regardless.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if !self.is_authenticated() {
            return;
        }
        let request = ApiRequest::post(self.inner.paths.logout.clone()).without_renewal();
        if let Err(e) = self.request_value(&request).await {
            tracing::warn!(error = %e, "Server-side logout failed");
        }
        self.inner.credentials.clear();
        tracing::info!("Signed out");
    }

    async fn establish(&self, request: &ApiRequest) -> Result<SessionUser, ClientError> {
        let payload: AuthPayload = self.request(request).await?;
        self.inner.credentials.replace(Credential::new(
            payload.access_token,
            payload.refresh_token,
            payload.user.id.clone(),
            payload.user.role,
        ));
        tracing::info!(owner_id = %payload.user.id, role = payload.user.role.as_str(), "Signed in");
        Ok(payload.user)
    }

    // =========================================================================
    // Request Dispatch
    // =========================================================================

    /// Send a request with the current credential, renewing once on 401.
    ///
    /// Returns the raw response for any status other than a 401 that could
    /// be handled by renewal.
    ///
    /// # Errors
    ///
    /// - `ClientError::Transport` on network failure
    /// - `ClientError::RenewalFailed` if the 401 could not be cured by renewal
    /// - `ClientError::UnauthorizedTerminal` if the replay is also refused
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ClientError> {
        let access = self.inner.credentials.get().map(|c| c.access_token);
        let response = self.issue(request, access.clone()).await?;

        if response.status != StatusCode::UNAUTHORIZED || !request.renew_on_unauthorized {
            return Ok(response);
        }

        tracing::debug!("Access token rejected, renewing session");
        let fresh = self.obtain_fresh_credential(access.as_ref()).await?;

        let retried = self.issue(request, Some(fresh.access_token)).await?;
        if retried.status == StatusCode::UNAUTHORIZED {
            tracing::warn!("Request still unauthorized after session renewal");
            return Err(ClientError::UnauthorizedTerminal);
        }
        Ok(retried)
    }

    /// Send a request and unwrap the response envelope.
    ///
    /// # Errors
    ///
    /// The errors of [`send`](Self::send), plus `ClientError::Resource` for
    /// failure envelopes and non-2xx responses.
    pub async fn request_value(&self, request: &ApiRequest) -> Result<Value, ClientError> {
        envelope::normalize(self.send(request).await?)
    }

    /// Send a request and decode the unwrapped payload into `R`.
    ///
    /// # Errors
    ///
    /// The errors of [`request_value`](Self::request_value), plus
    /// `ClientError::Json` if the payload does not match `R`.
    pub async fn request<R: DeserializeOwned>(
        &self,
        request: &ApiRequest,
    ) -> Result<R, ClientError> {
        envelope::decode(self.send(request).await?)
    }

    /// `GET` a resource.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        self.request(&ApiRequest::get(path)).await
    }

    /// `POST` a JSON body.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(&ApiRequest::post(path).json(body)?).await
    }

    /// `DELETE` a resource.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        self.request(&ApiRequest::delete(path)).await
    }

    /// Obtain a credential to replace `rejected`, sharing any renewal already
    /// in flight.
    ///
    /// # Errors
    ///
    /// Returns `RenewalError` if renewal fails. The session is cleared unless
    /// it was replaced while the renewal ran.
    pub async fn obtain_fresh_credential(
        &self,
        rejected: Option<&SecretString>,
    ) -> Result<Credential, RenewalError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .renewal
            .obtain_fresh_credential(rejected, move |current| async move {
                inner.renew(current).await
            })
            .await
    }

    async fn issue(
        &self,
        request: &ApiRequest,
        bearer: Option<SecretString>,
    ) -> Result<RawResponse, TransportError> {
        let prepared = PreparedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            bearer,
            body: request.body.clone(),
            request_id: Uuid::new_v4(),
        };
        tracing::debug!(request_id = %prepared.request_id, "Dispatching request");
        let response = self.inner.transport.execute(prepared).await?;
        tracing::debug!(status = %response.status, "Received response");
        Ok(response)
    }
}

impl<T: Transport> ClientInner<T> {
    /// Exchange the refresh token for a new pair.
    ///
    /// Goes straight to the transport; the renewal call is never itself
    /// subject to renewal.
    async fn renew(&self, current: Credential) -> Result<Credential, RenewalError> {
        let refresh = current
            .refresh_token
            .as_ref()
            .ok_or(RenewalError::MissingRefreshToken)?;

        let request = PreparedRequest {
            method: Method::POST,
            path: self.paths.refresh.clone(),
            bearer: None,
            body: Some(json!({ "refreshToken": refresh.expose_secret() })),
            request_id: Uuid::new_v4(),
        };

        let response = self
            .transport
            .execute(request)
            .await
            .map_err(|e| RenewalError::Transport(e.to_string()))?;

        let tokens: TokenPair = envelope::decode(response).map_err(|e| match e {
            ClientError::Resource { status, message } => RenewalError::Rejected { status, message },
            other => RenewalError::InvalidPayload(other.to_string()),
        })?;

        Ok(current.renewed(tokens.access_token, tokens.refresh_token))
    }
}
