//! Storefront Session - authenticated API client for the storefront.
//!
//! # Architecture
//!
//! - [`SessionClient`] attaches the stored bearer token to every request and,
//!   on a 401, obtains a fresh credential and replays the request once
//! - [`RenewalCoordinator`] guarantees a single renewal call per expiry no
//!   matter how many requests fail concurrently; waiters are released in
//!   arrival order with one shared outcome
//! - [`CredentialStore`] owns the session credential and persists it through
//!   an injected [`KeyValueStore`]
//! - [`envelope`] unwraps the `{ success, data | message }` response envelope
//! - [`CartStore`] applies cart mutations locally first and mirrors them to
//!   the remote cart in the background when a session exists
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use storefront_session::{ClientConfig, FileStore, SessionClient, CartStore};
//!
//! let config = ClientConfig::from_env()?;
//! let backend = Arc::new(FileStore::new(&config.state_dir));
//! let client = SessionClient::connect(&config, backend.clone())?;
//!
//! let user = client.login(&email, &password).await?;
//! let cart = CartStore::load(client.clone(), backend);
//! cart.sync_to_remote().await?;
//!
//! let orders: serde_json::Value = client.get("orders").await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod client;
pub mod config;
pub mod credential;
pub mod envelope;
pub mod error;
pub mod persistence;
pub mod renewal;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use cart::CartStore;
pub use client::{ApiRequest, SessionClient, SessionUser};
pub use config::{ApiPaths, ClientConfig, ConfigError};
pub use credential::{Credential, CredentialStore};
pub use error::{ClientError, RenewalError, TransportError};
pub use persistence::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use renewal::RenewalCoordinator;
pub use transport::{HttpTransport, PreparedRequest, RawResponse, Transport};
