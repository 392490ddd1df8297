#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! Tenant-aware HTTP access layer for the back-office backend
//!
//! Every feature service of the back office talks to the same multi-tenant
//! REST backend through [`ApiClient`]. The client:
//! - injects `Authorization: Bearer …` and the `X-Tenant-Slug` /
//!   `X-Tenant-Id` headers, read fresh from storage on every call
//! - routes calls through a same-origin proxy path (`/api/...`) or straight
//!   to the backend base URL
//! - retries transient failures (429, 5xx, transport errors, per-attempt
//!   timeouts) with capped exponential backoff
//! - parses JSON or text bodies and turns non-2xx responses into
//!   [`ApiError`]
//!
//! Backends disagree on how they wrap payloads; [`normalize`] folds the
//! `{success, data}`, `{result}` and `{status}` shapes into one
//! [`ApiResponse`].
//!
//! # Transport
//!
//! Requests go through a tower stack over a hyper client with rustls
//! (HTTPS only by default), transparent gzip/br/deflate decompression and a
//! fail-fast request buffer. Body size limits apply to decompressed bytes.
//!
//! # Example
//!
//! ```ignore
//! use backoffice_http::{ApiClient, ApiConfig, FileStore, normalize};
//!
//! let config = ApiConfig::load(Some("backoffice.yaml".as_ref()))?;
//! let store = FileStore::open("storage.json")?.shared();
//! let client = ApiClient::from_config(&config, Some(store))?;
//!
//! let branches: Vec<Branch> = client.get("/branches").await?;
//! let raw: serde_json::Value = client.get("/reports/summary").await?;
//! let summary = normalize(raw).decode::<Summary>()?.into_result()?;
//! ```

mod builder;
mod client;
mod config;
mod envelope;
mod error;
mod headers;
mod layers;
mod request;
mod response;
mod settings;
mod storage;
mod tenant;
mod token;
mod url;

pub use builder::ApiClientBuilder;
pub use client::ApiClient;
pub use config::{
    DEFAULT_RETRY_STATUS_CODES, DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig,
    RetryConfig, RetryOverride, RetryTrigger, TransportSecurity,
};
pub use envelope::{ApiResponse, DEFAULT_FAILURE_MESSAGE, Envelope, EnvelopeMeta, normalize};
pub use error::{ApiError, HttpError, InvalidUriKind};
pub use headers::{HeaderBuilder, TENANT_ID_HEADER, TENANT_SLUG_HEADER};
pub use layers::{RetryLayer, RetryService, calculate_backoff};
pub use request::RequestOptions;
pub use response::{ERROR_BODY_LIMIT, Payload, ResponseBody};
pub use settings::{ApiConfig, ConfigError, ENV_PREFIX};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore, StorageError};
pub use tenant::{TENANT_ID_KEY, TENANT_SLUG_KEY, TenantContext, TenantResolver};
pub use token::{ACCESS_TOKEN_KEY, LEGACY_TOKEN_KEYS, REFRESH_TOKEN_KEY, TokenPair, TokenStore};
pub use url::{UrlBuilder, UrlMode};

pub use http::Method;
pub use secrecy::{ExposeSecret, SecretString};
pub use tokio_util::sync::CancellationToken;
