use sourcebook_core::TenantId;

use crate::raw::{RawEvent, Recorded};

/// Marks records that belong to a tenant.
///
/// Subscription consumers use it to keep per-tenant state apart when reading
/// the store-wide feed.
pub trait TenantScoped {
    fn tenant_id(&self) -> &TenantId;

    fn belongs_to(&self, tenant: &TenantId) -> bool {
        self.tenant_id() == tenant
    }
}

impl TenantScoped for RawEvent {
    fn tenant_id(&self) -> &TenantId {
        self.tenant()
    }
}

impl TenantScoped for Recorded {
    fn tenant_id(&self) -> &TenantId {
        &self.tenant
    }
}
