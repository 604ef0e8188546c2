//! Tenant tags (multi-tenant isolation boundary).

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Tag reserved for the default tenant.
pub const DEFAULT_TENANT: &str = "*";

/// Identifier of a tenant.
///
/// Every stream address carries one. Two streams with the same id or name but
/// different tenants are unrelated streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant tag. Empty tags and the default sentinel are rejected.
    pub fn new(tag: impl Into<String>) -> CoreResult<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(CoreError::validation("tenant tag must not be empty"));
        }
        if tag == DEFAULT_TENANT {
            return Err(CoreError::validation(format!(
                "tenant tag '{DEFAULT_TENANT}' is reserved for the default tenant"
            )));
        }
        Ok(Self(tag))
    }

    /// The default tenant.
    pub fn default_tenant() -> Self {
        Self(DEFAULT_TENANT.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_TENANT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::default_tenant()
    }
}

impl core::fmt::Display for TenantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
