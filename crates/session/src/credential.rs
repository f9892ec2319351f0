//! Session credential and the store that owns it.

use std::sync::{Arc, PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use storefront_core::{Role, UserId};

use crate::persistence::{KeyValueStore, forget, keys, load_json, save_json};

/// Access/refresh token pair plus the identity it belongs to.
///
/// Implements `Debug` manually to redact the tokens.
#[derive(Clone)]
pub struct Credential {
    /// Bearer token attached to every request.
    pub access_token: SecretString,
    /// Token exchanged for a new pair when the access token expires.
    pub refresh_token: Option<SecretString>,
    /// Account the tokens were issued to.
    pub owner_id: UserId,
    /// Role of that account.
    pub role: Role,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("owner_id", &self.owner_id)
            .field("role", &self.role)
            .finish()
    }
}

/// On-disk shape of a credential.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredential {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    owner_id: UserId,
    #[serde(default)]
    role: Role,
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

impl Credential {
    #[must_use]
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        owner_id: UserId,
        role: Role,
    ) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: refresh_token.map(SecretString::from),
            owner_id,
            role,
        }
    }

    /// Whether `token` is this credential's access token.
    #[must_use]
    pub fn has_access_token(&self, token: &SecretString) -> bool {
        self.access_token.expose_secret() == token.expose_secret()
    }

    /// Replace the token pair, keeping the identity.
    ///
    /// A renewal response without a refresh token keeps the current one.
    #[must_use]
    pub fn renewed(&self, access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token),
            refresh_token: refresh_token
                .map(SecretString::from)
                .or_else(|| self.refresh_token.clone()),
            owner_id: self.owner_id.clone(),
            role: self.role,
        }
    }

    /// Expiry of a JWT access token, read from its `exp` claim.
    ///
    /// The signature is not verified; this is for display only. Opaque
    /// tokens return `None`.
    #[must_use]
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        let payload = self.access_token.expose_secret().split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: JwtClaims = serde_json::from_slice(&bytes).ok()?;
        DateTime::from_timestamp(claims.exp, 0)
    }

    fn to_stored(&self) -> StoredCredential {
        StoredCredential {
            access_token: self.access_token.expose_secret().to_string(),
            refresh_token: self
                .refresh_token
                .as_ref()
                .map(|token| token.expose_secret().to_string()),
            owner_id: self.owner_id.clone(),
            role: self.role,
        }
    }

    fn from_stored(stored: StoredCredential) -> Self {
        Self::new(
            stored.access_token,
            stored.refresh_token,
            stored.owner_id,
            stored.role,
        )
    }
}

/// Owner of the current session credential.
///
/// Reads and writes are synchronous. `replace` swaps the whole credential
/// under a write lock, so a concurrent `get` sees either the old or the new
/// credential, never a mix. Every change is written through to the backend
/// while the lock is held, keeping the persisted copy in the same order as
/// the in-memory one.
pub struct CredentialStore {
    slot: RwLock<Option<Credential>>,
    backend: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create a store, restoring any credential persisted in `backend`.
    ///
    /// Missing or unreadable persisted data starts the store empty.
    #[must_use]
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let restored = load_json::<StoredCredential>(backend.as_ref(), keys::CREDENTIAL)
            .map(Credential::from_stored);
        if let Some(credential) = &restored {
            tracing::debug!(owner_id = %credential.owner_id, "Restored persisted session");
        }
        Self {
            slot: RwLock::new(restored),
            backend,
        }
    }

    /// Current credential, if any.
    #[must_use]
    pub fn get(&self) -> Option<Credential> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the credential wholesale and persist it.
    pub fn replace(&self, credential: Credential) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        save_json(self.backend.as_ref(), keys::CREDENTIAL, &credential.to_stored());
        *slot = Some(credential);
    }

    /// Drop the credential and its persisted copy.
    pub fn clear(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        forget(self.backend.as_ref(), keys::CREDENTIAL);
        *slot = None;
    }

    /// Swap in `next` (or clear, for `None`) only while the store still holds
    /// the credential whose access token is `expected`.
    ///
    /// Returns `false` and leaves the store untouched if the session was
    /// signed out or replaced in the meantime.
    pub fn replace_if_current(&self, expected: &SecretString, next: Option<Credential>) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if !slot
            .as_ref()
            .is_some_and(|current| current.has_access_token(expected))
        {
            return false;
        }
        match &next {
            Some(credential) => {
                save_json(self.backend.as_ref(), keys::CREDENTIAL, &credential.to_stored());
            }
            None => forget(self.backend.as_ref(), keys::CREDENTIAL),
        }
        *slot = next;
        true
    }

    /// Whether a session currently exists.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}
