//! Identity types for replica tenants and rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// A single row, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Reserved store name used for the pre-provisioned template store.
pub const TEMPLATE_TENANT: &str = "template";

/// Name used when logging the unscoped tenant.
pub const DEFAULT_TENANT: &str = "default";

/// Identifies the isolation unit that owns one replica store.
///
/// Requests without a tenant map to [`TenantKey::Default`]. Named tenants are
/// never allowed to use the reserved template name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TenantKey {
    /// The unscoped tenant.
    Default,
    /// A named tenant.
    Named(String),
}

impl TenantKey {
    /// Build a key from an optional tenant identifier.
    pub fn from_option(tenant: Option<&str>) -> Self {
        match tenant {
            Some(name) if !name.is_empty() => Self::Named(name.to_string()),
            _ => Self::Default,
        }
    }

    /// Get the tenant name, or `None` for the default tenant.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Default => None,
            Self::Named(name) => Some(name),
        }
    }

    /// Returns true for the unscoped tenant.
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }

    /// Returns true if the key collides with the reserved template name.
    pub fn is_reserved(&self) -> bool {
        self.name() == Some(TEMPLATE_TENANT)
    }
}

impl Default for TenantKey {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name().unwrap_or(DEFAULT_TENANT))
    }
}

impl From<&str> for TenantKey {
    fn from(value: &str) -> Self {
        Self::from_option(Some(value))
    }
}

/// Request-scoped context forwarded to the primary store and the replica.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub tenant: TenantKey,
    pub locale: Option<String>,
    pub user: Option<String>,
}

impl RequestContext {
    /// Context for the given tenant with no locale or user.
    pub fn for_tenant(tenant: TenantKey) -> Self {
        Self {
            tenant,
            ..Default::default()
        }
    }

    /// Set the request locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set the request user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}
