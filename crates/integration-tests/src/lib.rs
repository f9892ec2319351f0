//! Integration test harness for the storefront session client.
//!
//! [`MockServer`] runs an `axum` resource server on an ephemeral local port
//! under `/api`, speaking the same envelope and bearer-token protocol as the
//! real backend. Tests point a [`SessionClient`] with the real
//! `HttpTransport` at it and inspect what the server saw.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p storefront-integration-tests
//! ```
//!
//! # Server behavior
//!
//! - Tokens are generation-numbered: `access-N` / `refresh-N`
//! - Only the latest access token is accepted, and only until
//!   [`MockServer::expire_access_token`]
//! - `POST /api/auth/refresh` answers with a bare `{ accessToken, refreshToken }`
//! - Cart endpoints record every mutation in [`MockServer::cart_ops`]

#![cfg_attr(not(test), forbid(unsafe_code))]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use storefront_session::{ClientConfig, HttpTransport, KeyValueStore, SessionClient};
use url::Url;

/// Password the mock accepts for every account.
pub const PASSWORD: &str = "correct horse battery staple";

/// Account ID the mock assigns on login.
pub const USER_ID: &str = "u-42";

/// A cart mutation received by the mock.
#[derive(Debug, Clone)]
pub struct CartOp {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    generation: u32,
    access_valid: bool,
    reject_refresh: bool,
    refresh_delay: Duration,
    refresh_calls: u32,
    request_ids: Vec<String>,
    cart_ops: Vec<CartOp>,
}

type Shared = Arc<Mutex<MockState>>;

/// Running mock resource server. Stops when the test's runtime shuts down.
#[derive(Clone)]
pub struct MockServer {
    base_url: Url,
    state: Shared,
}

impl MockServer {
    /// Bind an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state = Shared::default();

        let app = Router::new()
            .route("/api/auth/login", post(login))
            .route("/api/auth/register", post(register))
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/logout", post(logout))
            .route("/api/health", get(health))
            .route("/api/orders", get(orders))
            .route("/api/products/{id}", get(product))
            .route(
                "/api/cart/items",
                post(cart_op).patch(cart_op).delete(cart_op),
            )
            .route("/api/cart", axum::routing::put(cart_op).delete(cart_op))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: Url::parse(&format!("http://{addr}/api")).unwrap(),
            state,
        }
    }

    /// Client configuration pointing at this server.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.base_url.clone())
    }

    /// A real HTTP session client for this server over `backend`.
    pub fn client(&self, backend: Arc<dyn KeyValueStore>) -> SessionClient<HttpTransport> {
        SessionClient::connect(&self.config(), backend).unwrap()
    }

    /// Reject the current access token from now on.
    pub fn expire_access_token(&self) {
        self.lock().access_valid = false;
    }

    /// Make the renewal endpoint refuse every refresh token.
    pub fn reject_refresh(&self) {
        self.lock().reject_refresh = true;
    }

    /// Delay renewal responses, widening the window for concurrent expiry.
    pub fn delay_refresh(&self, delay: Duration) {
        self.lock().refresh_delay = delay;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.lock().refresh_calls
    }

    /// `X-Request-Id` values received, in arrival order.
    pub fn request_ids(&self) -> Vec<String> {
        self.lock().request_ids.clone()
    }

    pub fn cart_ops(&self) -> Vec<CartOp> {
        self.lock().cart_ops.clone()
    }

    /// Wait until at least `count` cart mutations have arrived.
    pub async fn wait_for_cart_ops(&self, count: usize) -> Vec<CartOp> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let ops = self.cart_ops();
                if ops.len() >= count {
                    return ops;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn lock(state: &Shared) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn success(status: StatusCode, data: Value) -> Response {
    (status, Json(json!({ "success": true, "data": data }))).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}

fn parse(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

/// Record the request ID and check the bearer token.
fn authorize(state: &Shared, headers: &HeaderMap) -> Result<(), Response> {
    let mut state = lock(state);
    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        state.request_ids.push(id.to_string());
    }

    let expected = format!("Bearer access-{}", state.generation);
    let presented = headers.get("authorization").and_then(|v| v.to_str().ok());
    if state.access_valid && presented == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(failure(StatusCode::UNAUTHORIZED, "Token expired"))
    }
}

fn sign_in(state: &Shared, body: &Value) -> Option<Value> {
    if body.get("password").and_then(Value::as_str) != Some(PASSWORD) {
        return None;
    }
    let mut state = lock(state);
    state.generation += 1;
    state.access_valid = true;
    Some(json!({
        "accessToken": format!("access-{}", state.generation),
        "refreshToken": format!("refresh-{}", state.generation),
        "user": {
            "id": USER_ID,
            "role": "customer",
            "name": body.get("name").cloned().unwrap_or(Value::Null),
            "email": body.get("email").cloned().unwrap_or(Value::Null),
        },
    }))
}

async fn login(State(state): State<Shared>, body: Bytes) -> Response {
    match sign_in(&state, &parse(&body)) {
        Some(payload) => success(StatusCode::OK, payload),
        None => failure(StatusCode::UNAUTHORIZED, "Invalid email or password"),
    }
}

async fn register(State(state): State<Shared>, body: Bytes) -> Response {
    match sign_in(&state, &parse(&body)) {
        Some(payload) => success(StatusCode::CREATED, payload),
        None => failure(StatusCode::BAD_REQUEST, "Password too weak"),
    }
}

async fn refresh(State(state): State<Shared>, body: Bytes) -> Response {
    let delay = {
        let mut state = lock(&state);
        state.refresh_calls += 1;
        state.refresh_delay
    };
    tokio::time::sleep(delay).await;

    let presented = parse(&body)
        .get("refreshToken")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut state = lock(&state);
    let expected = format!("refresh-{}", state.generation);
    if state.reject_refresh || presented.as_deref() != Some(expected.as_str()) {
        return failure(StatusCode::UNAUTHORIZED, "Refresh token invalid");
    }

    state.generation += 1;
    state.access_valid = true;
    Json(json!({
        "accessToken": format!("access-{}", state.generation),
        "refreshToken": format!("refresh-{}", state.generation),
    }))
    .into_response()
}

async fn logout(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    lock(&state).access_valid = false;
    success(StatusCode::OK, Value::Null)
}

async fn health() -> &'static str {
    "ok"
}

async fn orders(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    success(
        StatusCode::OK,
        json!([{ "id": "o-1", "total": { "amount": "59.97", "currencyCode": "USD" } }]),
    )
}

async fn product(Path(id): Path<String>) -> Response {
    if id == "missing" {
        return failure(StatusCode::NOT_FOUND, "Product not found");
    }
    if id == "broken" {
        return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
    }
    success(StatusCode::OK, json!({ "id": id, "name": "Logo Hoodie" }))
}

async fn cart_op(
    State(state): State<Shared>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = authorize(&state, &headers) {
        return response;
    }
    let body = parse(&body);
    lock(&state).cart_ops.push(CartOp {
        method,
        path: uri.path().trim_start_matches("/api/").to_string(),
        body: body.clone(),
    });
    success(StatusCode::OK, body)
}
