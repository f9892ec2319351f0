//! In-process resource server double for unit tests.

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use storefront_core::{Role, UserId};
use url::Url;

use crate::client::SessionClient;
use crate::config::ClientConfig;
use crate::credential::Credential;
use crate::error::TransportError;
use crate::persistence::MemoryStore;
use crate::transport::{PreparedRequest, RawResponse, Transport};

pub const VALID_PASSWORD: &str = "hunter2";

/// One request as the fake server saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct State {
    valid_access: Option<String>,
    valid_refresh: Option<String>,
    issued: u32,
    refresh_calls: u32,
    reject_refresh: bool,
    denied: HashSet<String>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    calls: Vec<Call>,
}

/// Fake resource server implementing [`Transport`].
///
/// Accepts the most recently issued access token, renews on
/// `auth/refresh`, and answers every other path with an envelope echoing
/// the request. Paths under `public/` need no token.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<State>>,
    refresh_delay: Option<Duration>,
}

impl FakeServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.issue_tokens(0);
        server
    }

    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = Some(delay);
        self
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(Url::parse("http://fake.test/").unwrap())
    }

    /// Stop accepting the current access token.
    pub fn expire_access_token(&self) {
        self.state.lock().unwrap().valid_access = None;
    }

    /// Make the renewal endpoint refuse every refresh token.
    pub fn reject_refresh(&self) {
        self.state.lock().unwrap().reject_refresh = true;
    }

    /// Answer `path` with 401 regardless of the token.
    pub fn deny_path(&self, path: &str) {
        self.state.lock().unwrap().denied.insert(path.to_string());
    }

    /// Fail `path` at the connection level.
    pub fn fail_path(&self, path: &str) {
        self.state.lock().unwrap().failing.insert(path.to_string());
    }

    /// Never answer `path`.
    pub fn hang_path(&self, path: &str) {
        self.state.lock().unwrap().hanging.insert(path.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.lock().unwrap().refresh_calls
    }

    /// Wait until at least `count` requests have arrived.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<Call> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let calls = self.calls();
                if calls.len() >= count {
                    return calls;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    fn issue_tokens(&self, generation: u32) -> (String, String) {
        let access = format!("access-{generation}");
        let refresh = format!("refresh-{generation}");
        let mut state = self.state.lock().unwrap();
        state.issued = generation;
        state.valid_access = Some(access.clone());
        state.valid_refresh = Some(refresh.clone());
        (access, refresh)
    }

    fn refresh(&self, body: Option<&Value>) -> RawResponse {
        let presented = body
            .and_then(|b| b.get("refreshToken"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let next = {
            let state = self.state.lock().unwrap();
            if state.reject_refresh || presented != state.valid_refresh {
                None
            } else {
                Some(state.issued + 1)
            }
        };

        match next {
            Some(generation) => {
                let (access, refresh) = self.issue_tokens(generation);
                envelope(json!({ "accessToken": access, "refreshToken": refresh }))
            }
            None => RawResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({ "success": false, "message": "refresh token expired" }),
            ),
        }
    }

    fn authenticate(&self, password: Option<&str>) -> RawResponse {
        if password != Some(VALID_PASSWORD) {
            return RawResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({ "success": false, "message": "Invalid email or password" }),
            );
        }
        let generation = self.state.lock().unwrap().issued + 1;
        let (access, refresh) = self.issue_tokens(generation);
        envelope(json!({
            "accessToken": access,
            "refreshToken": refresh,
            "user": { "id": "u-1", "role": "influencer", "name": "Shopper" },
        }))
    }

    fn resource(&self, call: &Call) -> RawResponse {
        let authorized = {
            let state = self.state.lock().unwrap();
            !state.denied.contains(&call.path)
                && (call.path.starts_with("public/")
                    || (call.bearer.is_some() && call.bearer == state.valid_access))
        };
        if !authorized {
            return RawResponse::json(
                StatusCode::UNAUTHORIZED,
                &json!({ "success": false, "message": "Token expired" }),
            );
        }
        envelope(json!({
            "method": call.method.as_str(),
            "path": call.path,
            "token": call.bearer,
            "body": call.body,
        }))
    }
}

impl Transport for FakeServer {
    async fn execute(&self, request: PreparedRequest) -> Result<RawResponse, TransportError> {
        let call = Call {
            method: request.method,
            path: request.path,
            bearer: request.bearer.map(|t| t.expose_secret().to_string()),
            body: request.body,
        };

        let (failing, hanging) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(call.clone());
            if call.path == "auth/refresh" {
                state.refresh_calls += 1;
            }
            (
                state.failing.contains(&call.path),
                state.hanging.contains(&call.path),
            )
        };

        if hanging {
            std::future::pending::<()>().await;
        }
        if failing {
            return Err(TransportError::Connection("connection reset".to_string()));
        }

        let response = match call.path.as_str() {
            "auth/refresh" => {
                if let Some(delay) = self.refresh_delay {
                    tokio::time::sleep(delay).await;
                }
                self.refresh(call.body.as_ref())
            }
            "auth/login" | "auth/register" => self.authenticate(
                call.body
                    .as_ref()
                    .and_then(|b| b.get("password"))
                    .and_then(Value::as_str),
            ),
            "auth/logout" => envelope(Value::Null),
            _ => self.resource(&call),
        };
        Ok(response)
    }
}

fn envelope(data: Value) -> RawResponse {
    RawResponse::json(StatusCode::OK, &json!({ "success": true, "data": data }))
}

/// Client over `server` with no session.
pub fn client_for(server: &FakeServer) -> SessionClient<FakeServer> {
    SessionClient::new(server.clone(), Arc::new(MemoryStore::new()), &server.config())
}

/// Client over `server`, signed in with the server's first token pair.
pub fn signed_in_client(server: &FakeServer) -> SessionClient<FakeServer> {
    let client = client_for(server);
    client.credentials().replace(Credential::new(
        "access-0",
        Some("refresh-0".to_string()),
        UserId::new("u-1"),
        Role::Customer,
    ));
    client
}
