use crate::storage::{SharedStore, StorageError};
use serde::Serialize;
use std::fmt;

/// Storage key of the active tenant id
pub const TENANT_ID_KEY: &str = "tenantId";

/// Storage key of the active tenant slug
pub const TENANT_SLUG_KEY: &str = "tenantSlug";

/// Active tenant identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TenantContext {
    pub id: Option<String>,
    pub slug: Option<String>,
}

impl TenantContext {
    #[must_use]
    pub fn new(id: Option<String>, slug: Option<String>) -> Self {
        Self { id, slug }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.slug.is_none()
    }
}

/// Resolves the tenant for each request
///
/// Each field is looked up in storage first and falls back to the configured
/// default, so a stored slug can be combined with a configured id.
#[derive(Clone, Default)]
pub struct TenantResolver {
    store: Option<SharedStore>,
    defaults: TenantContext,
}

impl fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantResolver")
            .field("attached", &self.store.is_some())
            .field("defaults", &self.defaults)
            .finish()
    }
}

impl TenantResolver {
    #[must_use]
    pub fn new(store: Option<SharedStore>, defaults: TenantContext) -> Self {
        Self { store, defaults }
    }

    /// Resolver that only ever returns the configured defaults
    #[must_use]
    pub fn detached(defaults: TenantContext) -> Self {
        Self::new(None, defaults)
    }

    fn stored(&self, key: &str) -> Option<String> {
        self.store
            .as_ref()?
            .get(key)
            .filter(|value| !value.is_empty())
    }

    #[must_use]
    pub fn resolve(&self) -> TenantContext {
        TenantContext {
            id: self
                .stored(TENANT_ID_KEY)
                .or_else(|| self.defaults.id.clone()),
            slug: self
                .stored(TENANT_SLUG_KEY)
                .or_else(|| self.defaults.slug.clone()),
        }
    }

    /// Switch the stored tenant.
    ///
    /// A `None` field removes the stored value, exposing the configured default
    /// again.
    ///
    /// # Errors
    /// Returns `StorageError` if the underlying store rejects the write.
    pub fn set(&self, tenant: &TenantContext) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            tracing::debug!("no storage attached; tenant not persisted");
            return Ok(());
        };

        store.update(&[
            (TENANT_ID_KEY, tenant.id.as_deref()),
            (TENANT_SLUG_KEY, tenant.slug.as_deref()),
        ])
    }

    /// Forget the stored tenant.
    ///
    /// # Errors
    /// Returns `StorageError` if the underlying store rejects a removal.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.set(&TenantContext::default())
    }
}
