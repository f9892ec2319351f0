//! Error taxonomy for the session client.
//!
//! Transport failures, server rejections, renewal failures and terminal
//! authorization failures are kept distinct so the caller layer can decide
//! what each means for the UI (e.g. `RenewalFailed` means "signed out").

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Network-level failure talking to the resource server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request path could not be joined onto the base URL.
    #[error("Invalid request URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connection-level failure reported by a non-HTTP transport.
    #[error("Connection failed: {0}")]
    Connection(String),
}

/// Why a session renewal did not produce a credential.
///
/// Every caller queued behind one renewal receives the same value, so this
/// type is `Clone` and carries causes as strings rather than source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenewalError {
    /// No stored credential, or the stored credential has no refresh token.
    #[error("no refresh token available")]
    MissingRefreshToken,

    /// The renewal endpoint rejected the refresh token.
    #[error("refresh token rejected ({status}): {message}")]
    Rejected {
        /// HTTP status of the renewal response.
        status: StatusCode,
        /// Server-supplied message.
        message: String,
    },

    /// The renewal request never reached the server.
    #[error("renewal request failed: {0}")]
    Transport(String),

    /// The renewal response did not contain a token pair.
    #[error("renewal response invalid: {0}")]
    InvalidPayload(String),

    /// The configured renewal timeout elapsed.
    #[error("renewal timed out after {0:?}")]
    TimedOut(Duration),

    /// The renewal task ended without settling (runtime shutdown or panic).
    #[error("renewal ended without a result")]
    Abandoned,
}

/// Errors returned by [`SessionClient`](crate::SessionClient) operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or connection failure. Not retried.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The server rejected the request.
    #[error("Request rejected ({status}): {message}")]
    Resource {
        /// HTTP status of the response.
        status: StatusCode,
        /// Server-supplied message.
        message: String,
    },

    /// The access token expired and could not be renewed. The stored
    /// credential has been cleared.
    #[error("Session renewal failed: {0}")]
    RenewalFailed(#[from] RenewalError),

    /// The request was still unauthorized after one renewal and retry.
    #[error("Request unauthorized after session renewal")]
    UnauthorizedTerminal,

    /// Request or response body did not match the expected JSON shape.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The operation requires a signed-in session.
    #[error("No active session")]
    NotAuthenticated,
}

impl ClientError {
    /// Whether this error means the session is gone and the user must sign
    /// in again.
    #[must_use]
    pub const fn is_session_lost(&self) -> bool {
        matches!(self, Self::RenewalFailed(_) | Self::UnauthorizedTerminal)
    }
}
