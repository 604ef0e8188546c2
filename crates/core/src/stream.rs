//! Stream addressing and canonical stream keys.
//!
//! Callers address a stream by id *or* by name ([`StreamAddress`]); the store
//! resolves that address against its tenant into a [`StreamKey`], the
//! canonical handle every storage call receives.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::id::StreamId;
use crate::tenant::TenantId;

/// Stream category (e.g. `"order"`), used by category subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Categories must be non-empty and must not contain `-` (used as the
    /// category/id separator in stream names).
    pub fn new(name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CoreError::validation("category must not be empty"));
        }
        if name.contains('-') {
            return Err(CoreError::validation(format!(
                "category '{name}' must not contain '-'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Category {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied stream address (not yet resolved against a tenant).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAddress {
    id: Option<StreamId>,
    name: Option<String>,
    category: Option<Category>,
}

impl StreamAddress {
    /// Raw constructor; exactly one of `id` / `name` must be set for
    /// [`resolve`](Self::resolve) to succeed.
    pub fn new(id: Option<StreamId>, name: Option<String>) -> Self {
        Self {
            id,
            name,
            category: None,
        }
    }

    pub fn id(id: StreamId) -> Self {
        Self::new(Some(id), None)
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(None, Some(name.into()))
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Resolve to the canonical key for `tenant`.
    pub fn resolve(&self, tenant: &TenantId) -> CoreResult<StreamKey> {
        let (id, name) = match (&self.id, &self.name) {
            (Some(id), None) => (*id, None),
            (None, Some(name)) if !name.is_empty() => (StreamId::for_name(name), Some(name.clone())),
            _ => return Err(CoreError::EitherStreamIdOrStreamNameIsRequired),
        };

        Ok(StreamKey {
            id,
            name,
            category: self.category.clone(),
            tenant: tenant.clone(),
        })
    }
}

impl From<StreamId> for StreamAddress {
    fn from(value: StreamId) -> Self {
        Self::id(value)
    }
}

/// Canonical stream handle: `(tenant, id)` identifies the stream.
///
/// Name and category are descriptive; equality and hashing only consider the
/// tenant and the id, so a named stream and the same stream addressed by its
/// derived id are the same key. Storage fixes a stream's category when the
/// stream is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamKey {
    id: StreamId,
    name: Option<String>,
    category: Option<Category>,
    tenant: TenantId,
}

impl StreamKey {
    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn category(&self) -> Option<&Category> {
        self.category.as_ref()
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Same stream, described with `category`.
    pub fn with_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }
}

impl PartialEq for StreamKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.tenant == other.tenant
    }
}

impl Eq for StreamKey {}

impl core::hash::Hash for StreamKey {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.tenant.hash(state);
    }
}

impl core::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.category {
            Some(category) => write!(f, "{}/{}-{}", self.tenant, category, self.id),
            None => write!(f, "{}/{}", self.tenant, self.id),
        }
    }
}
