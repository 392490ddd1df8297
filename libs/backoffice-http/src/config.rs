use std::collections::HashSet;
use std::time::Duration;

/// Default User-Agent string for outbound requests
pub const DEFAULT_USER_AGENT: &str = concat!("backoffice-http/", env!("CARGO_PKG_VERSION"));

/// Statuses retried when no explicit set is configured: rate limiting and
/// transient server/gateway failures.
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Conditions that trigger a retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum RetryTrigger {
    /// Transport-level errors (connection refused, DNS failure, reset, etc.)
    TransportError,
    /// Per-attempt timeout
    Timeout,
    /// Specific HTTP status code
    Status(u16),
    /// Error that is never retryable (e.g. `Cancelled`, `ServiceClosed`)
    NonRetryable,
}

/// Exponential backoff configuration
///
/// Computes delay as: `min(initial * multiplier^attempt, max)` with optional jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry (default: 1s)
    pub initial: Duration,

    /// Upper bound for any single delay (default: 10s)
    pub max: Duration,

    /// Growth factor per attempt (default: 2.0)
    pub multiplier: f64,

    /// Add a random 0-25% on top of each delay (default: false)
    ///
    /// Off by default so the documented `initial * 2^attempt` schedule is exact.
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    /// Create backoff with custom initial and max durations
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Create fast backoff for testing (1ms initial, 100ms max, no jitter)
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

/// Retry policy
///
/// A request is attempted at most `1 + max_retries` times. Responses whose
/// status is in `retry_on` are retried while attempts remain, as are transport
/// failures and per-attempt timeouts when `retry_transport_errors` is set.
/// Everything else (2xx, other 4xx, cancellation) ends the loop immediately.
///
/// Retries apply to every HTTP method; callers that must not replay a
/// non-idempotent call pass [`RetryConfig::disabled`] for that call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 = no retries, default: 3)
    pub max_retries: usize,

    /// Backoff strategy configuration
    pub backoff: ExponentialBackoff,

    /// HTTP statuses that trigger a retry (default: 429, 500, 502, 503, 504)
    pub retry_on: HashSet<u16>,

    /// Retry transport errors and timeouts (default: true)
    pub retry_transport_errors: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::default(),
            retry_on: HashSet::from(DEFAULT_RETRY_STATUS_CODES),
            retry_transport_errors: true,
        }
    }
}

impl RetryConfig {
    /// Create config with no retries
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Same policy with a different retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Same policy with a different status set
    #[must_use]
    pub fn with_retry_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on = statuses.into_iter().collect();
        self
    }

    /// Check if the given trigger should cause a retry
    #[must_use]
    pub fn should_retry(&self, trigger: RetryTrigger) -> bool {
        match trigger {
            RetryTrigger::Status(status) => self.retry_on.contains(&status),
            RetryTrigger::TransportError | RetryTrigger::Timeout => self.retry_transport_errors,
            RetryTrigger::NonRetryable => false,
        }
    }
}

/// Per-call changes to the client's retry policy
///
/// Unset fields keep the client's configured value. A full [`RetryConfig`]
/// converts into an override that replaces every field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryOverride {
    pub max_retries: Option<usize>,
    /// Replaces the whole backoff strategy; applied before the delay fields
    pub backoff: Option<ExponentialBackoff>,
    pub retry_delay: Option<Duration>,
    pub max_retry_delay: Option<Duration>,
    pub retry_on: Option<HashSet<u16>>,
    pub retry_transport_errors: Option<bool>,
}

impl RetryOverride {
    #[must_use]
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// First backoff delay
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Backoff cap
    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn retry_on(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on = Some(statuses.into_iter().collect());
        self
    }

    #[must_use]
    pub fn retry_transport_errors(mut self, enabled: bool) -> Self {
        self.retry_transport_errors = Some(enabled);
        self
    }

    /// Merge over `base`
    #[must_use]
    pub fn apply(&self, base: &RetryConfig) -> RetryConfig {
        let mut backoff = self.backoff.clone().unwrap_or_else(|| base.backoff.clone());
        if let Some(delay) = self.retry_delay {
            backoff.initial = delay;
        }
        if let Some(delay) = self.max_retry_delay {
            backoff.max = delay;
        }

        RetryConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            backoff,
            retry_on: self
                .retry_on
                .clone()
                .unwrap_or_else(|| base.retry_on.clone()),
            retry_transport_errors: self
                .retry_transport_errors
                .unwrap_or(base.retry_transport_errors),
        }
    }
}

impl From<RetryConfig> for RetryOverride {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_retries: Some(config.max_retries),
            backoff: Some(config.backoff),
            retry_delay: None,
            max_retry_delay: None,
            retry_on: Some(config.retry_on),
            retry_transport_errors: Some(config.retry_transport_errors),
        }
    }
}

/// Transport security mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportSecurity {
    /// Only `https://` URLs are accepted (default)
    #[default]
    TlsOnly,
    /// Plain `http://` is accepted as well
    ///
    /// **WARNING**: use only for local testing with mock servers.
    AllowInsecureHttp,
}

/// Transport stack configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Timeout for each individual attempt (default: 30s)
    pub request_timeout: Duration,

    /// Maximum response body size in bytes, after decompression (default: 10 MiB)
    pub max_body_size: usize,

    /// User-Agent header value
    pub user_agent: String,

    /// Default retry policy; individual calls may override it
    pub retry: RetryConfig,

    /// Transport security mode
    pub transport: TransportSecurity,

    /// Capacity of the request buffer in front of the stack (default: 1024)
    pub buffer_capacity: usize,

    /// Idle timeout for pooled connections (default: 90s)
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum idle pooled connections per host (default: 32)
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: RetryConfig::default(),
            transport: TransportSecurity::TlsOnly,
            buffer_capacity: 1024,
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

impl HttpClientConfig {
    /// Create configuration for testing with mock servers (allows insecure HTTP)
    ///
    /// **WARNING**: use only for local testing, never in production.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_body_size: 1024 * 1024,
            retry: RetryConfig {
                backoff: ExponentialBackoff::fast(),
                ..RetryConfig::default()
            },
            transport: TransportSecurity::AllowInsecureHttp,
            pool_idle_timeout: Some(Duration::from_secs(10)),
            pool_max_idle_per_host: 4,
            ..Self::default()
        }
    }
}
