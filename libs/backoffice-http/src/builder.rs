use crate::client::{ApiClient, BufferedService};
use crate::config::{HttpClientConfig, RetryConfig, TransportSecurity};
use crate::error::HttpError;
use crate::headers::HeaderBuilder;
use crate::layers::RetryLayer;
use crate::response::ResponseBody;
use crate::settings::ApiConfig;
use crate::storage::SharedStore;
use crate::tenant::{TenantContext, TenantResolver};
use crate::token::TokenStore;
use crate::url::UrlBuilder;
use bytes::Bytes;
use http::{HeaderValue, Response};
use http_body_util::{BodyExt, Full};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::crypto::CryptoProvider;
use std::sync::Arc;
use std::time::Duration;
use tower::buffer::Buffer;
use tower::timeout::TimeoutLayer;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::decompression::DecompressionLayer;

/// Builder for [`ApiClient`]
///
/// Storage is optional: without it the client sends no `Authorization`
/// header and takes the tenant from the configured defaults only.
pub struct ApiClientBuilder {
    http: HttpClientConfig,
    urls: UrlBuilder,
    origin: Option<String>,
    store: Option<SharedStore>,
    tenant_defaults: TenantContext,
}

impl ApiClientBuilder {
    /// Proxy mode under `/api`, default transport, no storage
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: HttpClientConfig::default(),
            urls: UrlBuilder::default(),
            origin: None,
            store: None,
            tenant_defaults: TenantContext::default(),
        }
    }

    /// Builder preloaded from a loaded configuration
    #[must_use]
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            http: config.http_client_config(),
            urls: config.url_builder(),
            origin: config.api_origin.clone(),
            store: None,
            tenant_defaults: config.tenant_defaults(),
        }
    }

    /// Replace the transport configuration wholesale
    #[must_use]
    pub fn http_config(mut self, config: HttpClientConfig) -> Self {
        self.http = config;
        self
    }

    /// Attach token and tenant storage
    #[must_use]
    pub fn storage(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn urls(mut self, urls: UrlBuilder) -> Self {
        self.urls = urls;
        self
    }

    /// Origin that proxy-mode paths are resolved against
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn tenant_defaults(mut self, tenant: TenantContext) -> Self {
        self.tenant_defaults = tenant;
        self
    }

    /// Per-attempt timeout; each retry gets a fresh one
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.http.request_timeout = timeout;
        self
    }

    /// Default retry policy; calls may override it with
    /// [`RequestOptions::retry`](crate::RequestOptions::retry)
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.http.retry = retry;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.http.max_body_size = size;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.http.user_agent = user_agent.into();
        self
    }

    /// Capacity of the request buffer; 0 is clamped to 1
    #[must_use]
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.http.buffer_capacity = capacity;
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: TransportSecurity) -> Self {
        self.http.transport = transport;
        self
    }

    /// Allow plain `http://` URLs (for testing only)
    ///
    /// Only available in debug builds or with the `allow-insecure-http`
    /// feature, so release binaries cannot enable it by accident.
    #[must_use]
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!(
            target: "backoffice_http::security",
            "allow_insecure_http() called - HTTP traffic will NOT be encrypted"
        );
        self.http.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Build the client and its transport stack
    ///
    /// # Errors
    /// Returns `HttpError::Tls` if the TLS connector cannot be created, or
    /// `HttpError::InvalidHeaderValue` for an unusable user agent.
    pub fn build(self) -> Result<ApiClient, HttpError> {
        if self.http.transport == TransportSecurity::AllowInsecureHttp {
            tracing::warn!(
                "insecure HTTP enabled (TransportSecurity::AllowInsecureHttp); \
                 use only for testing with mock servers"
            );
        }

        let user_agent = HeaderValue::from_str(&self.http.user_agent)?;
        let service = build_service(&self.http)?;

        let tokens = self
            .store
            .clone()
            .map_or_else(TokenStore::detached, TokenStore::new);
        let tenants = TenantResolver::new(self.store, self.tenant_defaults);

        Ok(ApiClient {
            service,
            urls: self.urls,
            origin: self.origin,
            headers: HeaderBuilder::new(tokens, tenants),
            user_agent,
            max_body_size: self.http.max_body_size,
            transport_security: self.http.transport,
        })
    }
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble the tower stack.
///
/// Request flow (outer → inner):
///   Buffer → Retry → ErrorMapping → Timeout → Decompression → hyper client
///
/// The retry layer sees every response; non-2xx statuses are only turned
/// into errors after it, when the final response is parsed.
fn build_service(config: &HttpClientConfig) -> Result<BufferedService, HttpError> {
    let timeout = config.request_timeout;
    let https = build_https_connector(config.transport)?;

    let mut client_builder = Client::builder(TokioExecutor::new());
    // pool_idle_timeout has no effect without a pool timer
    client_builder
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .http2_only(false);
    if let Some(idle_timeout) = config.pool_idle_timeout {
        client_builder.pool_idle_timeout(idle_timeout);
    }
    let hyper_client = client_builder.build::<_, Full<Bytes>>(https);

    let service = ServiceBuilder::new()
        .layer(TimeoutLayer::new(timeout))
        .layer(DecompressionLayer::new())
        .service(hyper_client)
        .map_response(map_decompression_response)
        .map_err(move |e: tower::BoxError| map_tower_error(e, timeout));

    let retrying = ServiceBuilder::new()
        .layer(RetryLayer::new(config.retry.clone()))
        .service(service.boxed_clone())
        .boxed_clone();

    Ok(Buffer::new(retrying, config.buffer_capacity.max(1)))
}

/// Map tower errors to `HttpError`, keeping typed errors raised below.
pub(crate) fn map_tower_error(err: tower::BoxError, timeout: Duration) -> HttpError {
    if err.is::<tower::timeout::error::Elapsed>() {
        return HttpError::Timeout(timeout);
    }

    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(other) => HttpError::Transport(other),
    }
}

fn map_decompression_response<B>(response: Response<B>) -> Response<ResponseBody>
where
    B: http_body::Body<Data = Bytes> + Send + Sync + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = response.into_parts();
    let boxed_body: ResponseBody = body.map_err(Into::into).boxed();
    Response::from_parts(parts, boxed_body)
}

/// Installed process-wide provider, else aws-lc-rs.
fn crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// HTTPS connector over the Mozilla (webpki) root set.
///
/// ALPN advertises both h2 and http/1.1.
fn build_https_connector(
    transport: TransportSecurity,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new()
        .with_provider_and_webpki_roots(crypto_provider())
        .map_err(|e| HttpError::Tls(Box::new(e)))?;

    let connector = match transport {
        TransportSecurity::AllowInsecureHttp => builder.https_or_http().enable_all_versions().build(),
        TransportSecurity::TlsOnly => builder.https_only().enable_all_versions().build(),
    };
    Ok(connector)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::DEFAULT_USER_AGENT;
    use crate::storage::MemoryStore;

    #[test]
    fn test_builder_defaults() {
        let builder = ApiClientBuilder::new();
        assert_eq!(builder.http.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(builder.http.transport, TransportSecurity::TlsOnly);
        assert!(builder.urls.is_proxy());
        assert!(builder.origin.is_none());
        assert!(builder.store.is_none());
    }

    #[test]
    fn test_builder_from_config() {
        let config = ApiConfig {
            use_api_proxy: false,
            api_base_url: Some("https://api.example.com".to_owned()),
            tenant_slug: Some("acme".to_owned()),
            default_max_retries: 1,
            request_timeout_ms: 2500,
            ..ApiConfig::default()
        };

        let builder = ApiClientBuilder::from_config(&config);
        assert_eq!(builder.urls.build("/menu"), "https://api.example.com/menu");
        assert_eq!(builder.tenant_defaults.slug.as_deref(), Some("acme"));
        assert_eq!(builder.http.retry.max_retries, 1);
        assert_eq!(builder.http.request_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_builder_setters() {
        let builder = ApiClientBuilder::new()
            .timeout(Duration::from_secs(3))
            .retry(RetryConfig::disabled())
            .max_body_size(42)
            .user_agent("reports/2.0")
            .buffer_capacity(0)
            .origin("https://backoffice.example.com")
            .storage(MemoryStore::new().shared());

        assert_eq!(builder.http.request_timeout, Duration::from_secs(3));
        assert_eq!(builder.http.retry.max_retries, 0);
        assert_eq!(builder.http.max_body_size, 42);
        assert_eq!(builder.http.user_agent, "reports/2.0");
        assert_eq!(builder.http.buffer_capacity, 0);
        assert!(builder.store.is_some());
    }

    #[tokio::test]
    async fn test_build_variants() {
        assert!(ApiClientBuilder::new().build().is_ok());
        assert!(ApiClientBuilder::new().allow_insecure_http().build().is_ok());
        assert!(ApiClientBuilder::new().buffer_capacity(0).build().is_ok());
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_user_agent() {
        let result = ApiClientBuilder::new().user_agent("bad\nagent").build();
        assert!(matches!(result, Err(HttpError::InvalidHeaderValue(_))));
    }

    #[test]
    fn test_map_tower_error() {
        let attempt: tower::BoxError = Box::new(HttpError::Timeout(Duration::from_secs(2)));
        assert!(matches!(
            map_tower_error(attempt, Duration::from_secs(5)),
            HttpError::Timeout(d) if d == Duration::from_secs(2)
        ));

        let typed: tower::BoxError = Box::new(HttpError::Overloaded);
        assert!(matches!(
            map_tower_error(typed, Duration::from_secs(5)),
            HttpError::Overloaded
        ));

        let other: tower::BoxError = "connection reset".into();
        assert!(matches!(
            map_tower_error(other, Duration::from_secs(5)),
            HttpError::Transport(_)
        ));
    }
}
