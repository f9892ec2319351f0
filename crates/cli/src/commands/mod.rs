//! Command implementations.
//!
//! Every command works against the same [`Context`]: a session client and
//! cart store sharing one file-backed state directory, so a session created
//! by `login` is picked up by later invocations.

use std::sync::Arc;

use storefront_core::{CartError, EmailError};
use storefront_session::{
    CartStore, ClientError, ClientConfig, FileStore, HttpTransport, KeyValueStore, SessionClient,
    TransportError,
};
use thiserror::Error;

pub mod auth;
pub mod cart;
pub mod request;

/// Errors that end a command with a non-zero exit code.
#[derive(Debug, Error)]
pub enum CliError {
    /// The HTTP client could not be created.
    #[error("Failed to build HTTP client: {0}")]
    Transport(#[from] TransportError),

    /// A request failed.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A cart mutation was rejected.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// The email address is not valid.
    #[error("Invalid email: {0}")]
    Email(#[from] EmailError),

    /// Output could not be rendered.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Session client and cart store for one invocation.
pub struct Context {
    pub client: SessionClient<HttpTransport>,
    pub cart: CartStore<HttpTransport>,
}

impl Context {
    /// Open the state directory and restore the persisted session and cart.
    ///
    /// # Errors
    ///
    /// Returns `CliError::Transport` if the HTTP client cannot be built.
    pub fn open(config: &ClientConfig) -> Result<Self, CliError> {
        let backend: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&config.state_dir));
        let client = SessionClient::connect(config, Arc::clone(&backend))?;
        let cart = CartStore::load(client.clone(), backend);

        tracing::debug!(
            base_url = %config.base_url,
            state_dir = %config.state_dir.display(),
            authenticated = client.is_authenticated(),
            "Opened storefront session"
        );
        Ok(Self { client, cart })
    }
}
