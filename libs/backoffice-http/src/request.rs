use crate::config::{RetryOverride, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;

/// Per-call options
///
/// ```ignore
/// let opts = RequestOptions::new()
///     .header("x-request-source", "reports")
///     .max_retries(1)
///     .cancellation(shutdown.child_token());
/// let report: String = client.get_with("/reports/daily.csv", opts).await?;
/// ```
#[derive(Debug)]
pub struct RequestOptions {
    pub(crate) headers: HeaderMap,
    pub(crate) retry: Option<RetryOverride>,
    pub(crate) include_content_type: bool,
    pub(crate) cancellation: Option<CancellationToken>,
    /// Deferred error from header parsing, surfaced when the call is made
    pub(crate) error: Option<HttpError>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            retry: None,
            include_content_type: true,
            cancellation: None,
            error: None,
        }
    }
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a caller header; it replaces a generated header of the same name.
    ///
    /// An invalid name or value is reported when the call is made.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        let parsed = HeaderName::try_from(name)
            .map_err(HttpError::from)
            .and_then(|name| Ok((name, HeaderValue::try_from(value)?)));
        match parsed {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Add several caller headers at once
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Change the client's retry policy for this call
    ///
    /// Fields left unset in the override keep the client's configured
    /// values; passing a full [`RetryConfig`](crate::RetryConfig) replaces
    /// the policy outright.
    #[must_use]
    pub fn retry(mut self, retry: impl Into<RetryOverride>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Retry budget for this call; everything else stays as configured
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.retry = Some(self.retry.take().unwrap_or_default().max_retries(max_retries));
        self
    }

    /// Single attempt, no retries
    #[must_use]
    pub fn no_retry(self) -> Self {
        self.max_retries(0)
    }

    /// Omit the `Content-Type: application/json` header
    #[must_use]
    pub fn without_content_type(mut self) -> Self {
        self.include_content_type = false;
        self
    }

    /// Abort the call (including any pending backoff) once `token` is cancelled
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Turn a built URL into a request URI.
///
/// Origin-relative URLs (proxy mode) are prefixed with `origin`. The result
/// must be absolute and use a scheme the transport accepts.
pub(crate) fn resolve_url(
    url: &str,
    origin: Option<&str>,
    transport: TransportSecurity,
) -> Result<http::Uri, HttpError> {
    let absolute = if url.starts_with('/') {
        let Some(origin) = origin else {
            return Err(HttpError::InvalidUri {
                url: url.to_owned(),
                kind: InvalidUriKind::MissingAuthority,
                reason: "relative proxy URL requires a configured API origin".to_owned(),
            });
        };
        format!("{}{url}", origin.trim_end_matches('/'))
    } else {
        url.to_owned()
    };

    let uri: http::Uri = absolute
        .parse()
        .map_err(|e: http::uri::InvalidUri| HttpError::InvalidUri {
            url: absolute.clone(),
            kind: InvalidUriKind::ParseError,
            reason: e.to_string(),
        })?;

    if uri.authority().is_none() {
        return Err(HttpError::InvalidUri {
            url: absolute,
            kind: InvalidUriKind::MissingAuthority,
            reason: "missing host/authority".to_owned(),
        });
    }

    match uri.scheme_str() {
        Some("https") => Ok(uri),
        Some("http") => match transport {
            TransportSecurity::AllowInsecureHttp => Ok(uri),
            TransportSecurity::TlsOnly => Err(HttpError::InvalidScheme {
                scheme: "http".to_owned(),
                reason: "HTTPS required (transport security is TlsOnly)".to_owned(),
            }),
        },
        Some(scheme) => Err(HttpError::InvalidScheme {
            scheme: scheme.to_owned(),
            reason: "only http:// and https:// schemes are supported".to_owned(),
        }),
        None => Err(HttpError::InvalidUri {
            url: absolute,
            kind: InvalidUriKind::MissingScheme,
            reason: "missing scheme".to_owned(),
        }),
    }
}
