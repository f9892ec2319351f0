//! Account roles.
//!
//! The resource server scopes dashboards by role; the client only carries the
//! value along with the session identity.

use serde::{Deserialize, Serialize};

/// Role of the signed-in account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Influencer,
    Admin,
}

impl Role {
    /// Whether the role has access to a dashboard beyond the storefront.
    #[must_use]
    pub const fn has_dashboard(self) -> bool {
        matches!(self, Self::Influencer | Self::Admin)
    }

    /// Lowercase name as used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Influencer => "influencer",
            Self::Admin => "admin",
        }
    }
}
