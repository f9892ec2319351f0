//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_API_BASE_URL` - Base URL of the resource server
//!   (e.g., <https://api.example.com/v1/>)
//!
//! ## Optional
//! - `STOREFRONT_API_TIMEOUT_SECS` - Per-request transport timeout (default: 30)
//! - `STOREFRONT_RENEWAL_TIMEOUT_SECS` - Give up on a session renewal after this
//!   many seconds (default: unset, wait for the transport)
//! - `STOREFRONT_REFRESH_PATH` - Renewal endpoint path (default: auth/refresh)
//! - `STOREFRONT_STATE_DIR` - Directory for persisted session and cart state (default: .storefront)

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATE_DIR: &str = ".storefront";

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Session client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the resource server, always ending in `/`
    pub base_url: Url,
    /// Transport timeout applied to every request
    pub request_timeout: Duration,
    /// Upper bound on a single renewal attempt; `None` waits indefinitely
    pub renewal_timeout: Option<Duration>,
    /// Resource server endpoint paths used by the session lifecycle
    pub paths: ApiPaths,
    /// Directory used by the file-backed state store
    pub state_dir: PathBuf,
}

/// Endpoint paths, relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPaths {
    pub login: String,
    pub register: String,
    pub logout: String,
    pub refresh: String,
}

impl Default for ApiPaths {
    fn default() -> Self {
        Self {
            login: "auth/login".to_string(),
            register: "auth/register".to_string(),
            logout: "auth/logout".to_string(),
            refresh: "auth/refresh".to_string(),
        }
    }
}

impl ClientConfig {
    /// Configuration with defaults for everything but the base URL.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            renewal_timeout: None,
            paths: ApiPaths::default(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
        }
    }

    /// Bound every renewal attempt by `timeout`.
    #[must_use]
    pub const fn with_renewal_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("STOREFRONT_API_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("STOREFRONT_API_BASE_URL".to_string()))?;
        let base_url = Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_API_BASE_URL".to_string(), e.to_string())
        })?;

        let mut config = Self::new(base_url);

        if let Some(secs) = parse_secs(&lookup, "STOREFRONT_API_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        config.renewal_timeout = parse_secs(&lookup, "STOREFRONT_RENEWAL_TIMEOUT_SECS")?;

        if let Some(path) = lookup("STOREFRONT_REFRESH_PATH") {
            config.paths.refresh = path.trim_start_matches('/').to_string();
        }
        if let Some(dir) = lookup("STOREFRONT_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }

        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Parse an optional whole-seconds duration. Zero is rejected.
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        )),
        Ok(secs) => Ok(Some(Duration::from_secs(secs))),
        Err(e) => Err(ConfigError::InvalidEnvVar(key.to_string(), e.to_string())),
    }
}
