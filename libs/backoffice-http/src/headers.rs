use crate::error::HttpError;
use crate::tenant::TenantResolver;
use crate::token::TokenStore;
use http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;

/// Header carrying the tenant slug
pub const TENANT_SLUG_HEADER: &str = "x-tenant-slug";

/// Header carrying the tenant id
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// Composes the per-request auth and tenant headers.
///
/// Nothing is cached: every [`build`](Self::build) reads storage again.
#[derive(Debug, Clone, Default)]
pub struct HeaderBuilder {
    tokens: TokenStore,
    tenants: TenantResolver,
}

impl HeaderBuilder {
    #[must_use]
    pub fn new(tokens: TokenStore, tenants: TenantResolver) -> Self {
        Self { tokens, tenants }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    #[must_use]
    pub fn tenants(&self) -> &TenantResolver {
        &self.tenants
    }

    /// Build the header set for one request.
    ///
    /// Missing token or tenant fields simply omit their header.
    ///
    /// # Errors
    /// Returns `HttpError::InvalidHeaderValue` if a stored token or tenant
    /// value contains bytes not allowed in a header.
    pub fn build(&self, include_content_type: bool) -> Result<HeaderMap, HttpError> {
        let mut headers = HeaderMap::new();

        if include_content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Some(token) = self.tokens.get() {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let tenant = self.tenants.resolve();
        if let Some(slug) = tenant.slug {
            headers.insert(TENANT_SLUG_HEADER, HeaderValue::from_str(&slug)?);
        }
        if let Some(id) = tenant.id {
            headers.insert(TENANT_ID_HEADER, HeaderValue::from_str(&id)?);
        }

        Ok(headers)
    }
}
