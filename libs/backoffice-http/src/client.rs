use crate::builder::ApiClientBuilder;
use crate::config::{RetryOverride, TransportSecurity};
use crate::error::HttpError;
use crate::headers::HeaderBuilder;
use crate::request::{RequestOptions, resolve_url};
use crate::response::{Payload, ResponseBody, parse_response};
use crate::settings::ApiConfig;
use crate::storage::SharedStore;
use crate::tenant::TenantResolver;
use crate::token::TokenStore;
use crate::url::UrlBuilder;
use bytes::Bytes;
use http::header::USER_AGENT;
use http::{HeaderMap, HeaderValue, Method, Request, Response};
use http_body_util::Full;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use tower::Service;
use tower::buffer::Buffer;

/// Future type of the type-erased transport stack
pub type ServiceFuture =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, HttpError>> + Send>>;

/// Buffered transport stack shared by all clones of a client
pub type BufferedService = Buffer<Request<Full<Bytes>>, ServiceFuture>;

/// Tenant-aware client for the back-office REST backend
///
/// Every call rebuilds its URL and headers from the current storage state,
/// goes through the retry-wrapped transport, and returns either the decoded
/// payload or an [`HttpError`] (`HttpError::Api` for non-2xx responses).
///
/// `ApiClient` is `Clone + Send + Sync`; clones share one transport buffer,
/// so store it directly in services without a mutex.
///
/// ```ignore
/// let client = ApiClient::from_config(&config, Some(store))?;
/// let menu: Vec<MenuItem> = client.get("/menu").await?;
/// let order: Order = client.post("/orders", &new_order).await?;
/// ```
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) service: BufferedService,
    pub(crate) urls: UrlBuilder,
    pub(crate) origin: Option<String>,
    pub(crate) headers: HeaderBuilder,
    pub(crate) user_agent: HeaderValue,
    pub(crate) max_body_size: usize,
    pub(crate) transport_security: TransportSecurity,
}

impl ApiClient {
    #[must_use]
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    /// Client configured from `config`, reading credentials from `store`
    ///
    /// # Errors
    /// Returns an error if the transport stack cannot be built.
    pub fn from_config(config: &ApiConfig, store: Option<SharedStore>) -> Result<Self, HttpError> {
        let builder = ApiClientBuilder::from_config(config);
        match store {
            Some(store) => builder.storage(store).build(),
            None => builder.build(),
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenStore {
        self.headers.tokens()
    }

    #[must_use]
    pub fn tenants(&self) -> &TenantResolver {
        self.headers.tenants()
    }

    #[must_use]
    pub fn urls(&self) -> &UrlBuilder {
        &self.urls
    }

    /// Perform a call and decode the payload into `T`
    ///
    /// # Errors
    /// See [`raw`](Self::raw); additionally `HttpError::Json` if the payload
    /// does not decode into `T`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.raw(method, path, body, options).await?.decode()
    }

    /// Perform a call and return the parsed, undecoded payload
    ///
    /// # Errors
    /// - `HttpError::Api` for a non-2xx final response
    /// - `HttpError::Transport` / `HttpError::Timeout` once retries are exhausted
    /// - `HttpError::Cancelled` if the options' token fires first
    /// - `HttpError::InvalidUri` / `HttpError::InvalidScheme` for an unusable URL
    /// - `HttpError::Overloaded` if the request buffer is full
    pub async fn raw<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<Payload, HttpError>
    where
        B: Serialize + ?Sized,
    {
        let RequestOptions {
            headers,
            retry,
            include_content_type,
            cancellation,
            error,
        } = options;
        if let Some(e) = error {
            return Err(e);
        }

        if let Some(token) = &cancellation
            && token.is_cancelled()
        {
            return Err(HttpError::Cancelled);
        }

        let request = self.build_request(method, path, body, headers, retry, include_content_type)?;
        let call = self.send(request);

        match cancellation {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => {
                    tracing::debug!(path, "request cancelled");
                    Err(HttpError::Cancelled)
                }
                result = call => result,
            },
            None => call.await,
        }
    }

    fn build_request<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        caller_headers: HeaderMap,
        retry: Option<RetryOverride>,
        include_content_type: bool,
    ) -> Result<Request<Full<Bytes>>, HttpError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.urls.build(path);
        let uri = resolve_url(&url, self.origin.as_deref(), self.transport_security)?;

        let mut headers = self.headers.build(include_content_type)?;
        headers.extend(caller_headers);
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, self.user_agent.clone());
        }

        let body = match body {
            Some(body) => Bytes::from(serde_json::to_vec(body)?),
            None => Bytes::new(),
        };

        tracing::debug!(method = %method, url = %uri, "sending API request");

        let mut request = Request::builder().method(method).uri(uri).body(Full::new(body))?;
        *request.headers_mut() = headers;
        if let Some(retry) = retry {
            request.extensions_mut().insert(retry);
        }
        Ok(request)
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> Result<Payload, HttpError> {
        let mut service = self.service.clone();
        try_acquire_buffer_slot(&mut service).await?;

        let response = service.call(request).await.map_err(map_buffer_error)?;
        parse_response(response, self.max_body_size).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.get_with(path, RequestOptions::default()).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request::<T, ()>(Method::GET, path, None, options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.post_with(path, body, RequestOptions::default()).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn post_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::POST, path, Some(body), options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.put_with(path, body, RequestOptions::default()).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn put_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PUT, path, Some(body), options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.patch_with(path, body, RequestOptions::default()).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn patch_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(Method::PATCH, path, Some(body), options).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.delete_with(path, RequestOptions::default()).await
    }

    /// # Errors
    /// See [`request`](Self::request).
    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, HttpError> {
        self.request::<T, ()>(Method::DELETE, path, None, options).await
    }
}

/// Map buffer errors to `HttpError`
///
/// Errors from the inner stack are passed through; anything else means the
/// buffer worker is gone.
#[must_use]
pub fn map_buffer_error(err: tower::BoxError) -> HttpError {
    match err.downcast::<HttpError>() {
        Ok(http_err) => *http_err,
        Err(err) => {
            tracing::error!(
                error = %err,
                "buffer worker closed unexpectedly; service unavailable"
            );
            HttpError::ServiceClosed
        }
    }
}

/// Reserve a buffer slot without waiting.
///
/// # Errors
/// `HttpError::Overloaded` immediately when the buffer is full,
/// `HttpError::ServiceClosed` if the buffer worker has stopped.
pub async fn try_acquire_buffer_slot(service: &mut BufferedService) -> Result<(), HttpError> {
    use std::task::Poll;

    let poll_result = std::future::poll_fn(|cx| match service.poll_ready(cx) {
        Poll::Ready(result) => Poll::Ready(Some(result)),
        Poll::Pending => Poll::Ready(None),
    })
    .await;

    match poll_result {
        Some(Ok(())) => Ok(()),
        Some(Err(e)) => Err(map_buffer_error(e)),
        None => Err(HttpError::Overloaded),
    }
}
