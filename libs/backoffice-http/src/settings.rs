//! Layered client configuration.
//!
//! Sources are merged in order, later ones winning:
//!
//! 1. built-in defaults ([`ApiConfig::default`])
//! 2. an optional YAML file
//! 3. environment variables prefixed with `BACKOFFICE_`
//!    (`BACKOFFICE_API_BASE_URL`, `BACKOFFICE_TENANT_SLUG`, ...)

use crate::config::{DEFAULT_RETRY_STATUS_CODES, ExponentialBackoff, HttpClientConfig, RetryConfig};
use crate::tenant::TenantContext;
use crate::url::UrlBuilder;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix of recognized environment variables
pub const ENV_PREFIX: &str = "BACKOFFICE_";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Recognized options of the API access layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Backend base URL used in direct mode
    pub api_base_url: Option<String>,
    /// Route calls through the same-origin proxy path
    pub use_api_proxy: bool,
    pub api_proxy_root: String,
    /// Origin serving the proxy path, e.g. `https://backoffice.example.com`
    pub api_origin: Option<String>,
    pub default_max_retries: usize,
    pub default_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_jitter: bool,
    #[serde(deserialize_with = "status_codes")]
    pub default_retry_status_codes: Vec<u16>,
    #[serde(deserialize_with = "lenient_string")]
    pub tenant_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub tenant_slug: Option<String>,
    pub request_timeout_ms: u64,
    pub max_body_size: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        let transport = HttpClientConfig::default();
        let retry = RetryConfig::default();
        Self {
            api_base_url: None,
            use_api_proxy: true,
            api_proxy_root: "/api".to_owned(),
            api_origin: None,
            default_max_retries: retry.max_retries,
            default_retry_delay_ms: duration_ms(retry.backoff.initial),
            max_retry_delay_ms: duration_ms(retry.backoff.max),
            retry_jitter: retry.backoff.jitter,
            default_retry_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            tenant_id: None,
            tenant_slug: None,
            request_timeout_ms: duration_ms(transport.request_timeout),
            max_body_size: transport.max_body_size,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ApiConfig {
    /// Load defaults, then `file` (if given), then the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file is missing, a source fails to parse,
    /// or the merged configuration is invalid.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(file)?)
    }

    /// The provider chain used by [`load`](Self::load).
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` if `file` does not exist.
    pub fn figment(file: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = file {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate a configuration from any figment.
    ///
    /// # Errors
    /// Returns `ConfigError` if extraction or validation fails.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(Box::new)?;
        config.validate()?;
        tracing::debug!(
            proxy = config.use_api_proxy,
            max_retries = config.default_max_retries,
            "API configuration loaded"
        );
        Ok(config)
    }

    /// # Errors
    /// Returns `ConfigError::Invalid` for a zero retry delay, a zero request
    /// timeout, or a direct mode without a base URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_retry_delay_ms == 0 {
            return Err(ConfigError::Invalid(
                "default_retry_delay_ms must be greater than zero".to_owned(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if !self.use_api_proxy && self.api_base_url.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Invalid(
                "api_base_url is required when use_api_proxy is false".to_owned(),
            ));
        }
        Ok(())
    }

    /// Default retry policy for every call
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.default_max_retries,
            backoff: ExponentialBackoff {
                initial: Duration::from_millis(self.default_retry_delay_ms),
                max: Duration::from_millis(self.max_retry_delay_ms),
                jitter: self.retry_jitter,
                ..ExponentialBackoff::default()
            },
            ..RetryConfig::default()
        }
        .with_retry_on(self.default_retry_status_codes.iter().copied())
    }

    /// Tenant used when storage holds none
    #[must_use]
    pub fn tenant_defaults(&self) -> TenantContext {
        TenantContext::new(self.tenant_id.clone(), self.tenant_slug.clone())
    }

    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        if self.use_api_proxy {
            UrlBuilder::proxy(self.api_proxy_root.clone())
        } else {
            UrlBuilder::direct(self.api_base_url.clone().unwrap_or_default())
        }
    }

    /// Transport settings derived from this configuration
    #[must_use]
    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            max_body_size: self.max_body_size,
            retry: self.retry_config(),
            ..HttpClientConfig::default()
        }
    }
}

/// Accept tenant identifiers written as numbers (`TENANT_ID=42`).
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        UInt(u64),
        Float(f64),
        Bool(bool),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(raw
        .map(|raw| match raw {
            Raw::Str(s) => s,
            Raw::Int(n) => n.to_string(),
            Raw::UInt(n) => n.to_string(),
            Raw::Float(n) => n.to_string(),
            Raw::Bool(b) => b.to_string(),
        })
        .filter(|s| !s.is_empty()))
}

/// Accept `[429, 503]`, `"429,503"` or a single `503`.
fn status_codes<'de, D>(deserializer: D) -> Result<Vec<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<u16>),
        One(u16),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(codes) => Ok(codes),
        Raw::One(code) => Ok(vec![code]),
        Raw::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|e| serde::de::Error::custom(format!("invalid status code '{s}': {e}")))
            })
            .collect(),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert!(config.use_api_proxy);
        assert_eq!(config.api_proxy_root, "/api");
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_retry_delay_ms, 1000);
        assert_eq!(config.max_retry_delay_ms, 10_000);
        assert_eq!(config.default_retry_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.request_timeout_ms, 30_000);
        config.validate().unwrap();

        assert_eq!(config.retry_config(), RetryConfig::default());
        assert_eq!(config.url_builder().build("/menu"), "/api/menu");
    }

    #[test]
    fn test_layering_defaults_yaml_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "backoffice.yaml",
                r"
api_base_url: https://yaml.example.com
use_api_proxy: false
tenant_slug: from-yaml
default_max_retries: 5
",
            )?;
            jail.set_env("BACKOFFICE_TENANT_SLUG", "from-env");
            jail.set_env("BACKOFFICE_TENANT_ID", "42");

            let config = ApiConfig::load(Some(Path::new("backoffice.yaml"))).map_err(|e| e.to_string())?;
            assert!(!config.use_api_proxy);
            assert_eq!(config.api_base_url.as_deref(), Some("https://yaml.example.com"));
            assert_eq!(config.tenant_slug.as_deref(), Some("from-env"));
            assert_eq!(config.tenant_id.as_deref(), Some("42"));
            assert_eq!(config.default_max_retries, 5);
            assert_eq!(config.default_retry_delay_ms, 1000);
            assert_eq!(
                config.url_builder().build("menu"),
                "https://yaml.example.com/menu"
            );
            Ok(())
        });
    }

    #[test]
    fn test_env_status_codes() {
        Jail::expect_with(|jail| {
            jail.set_env("BACKOFFICE_DEFAULT_RETRY_STATUS_CODES", "429,503");
            let config = ApiConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.default_retry_status_codes, vec![429, 503]);
            assert_eq!(config.retry_config().retry_on.len(), 2);

            jail.set_env("BACKOFFICE_DEFAULT_RETRY_STATUS_CODES", "[502]");
            let config = ApiConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.default_retry_status_codes, vec![502]);
            Ok(())
        });
    }

    #[test]
    fn test_direct_mode_requires_base_url() {
        Jail::expect_with(|jail| {
            jail.set_env("BACKOFFICE_USE_API_PROXY", "false");
            let err = ApiConfig::load(None).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)));
            Ok(())
        });
    }

    #[test]
    fn test_zero_delay_rejected() {
        let config = ApiConfig {
            default_retry_delay_ms: 0,
            ..ApiConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("BACKOFFICE_REQUEST_TIMEOUT_MS", "0");
            let err = ApiConfig::load(None).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid(ref msg) if msg.contains("request_timeout_ms"))
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let err = ApiConfig::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_derived_values() {
        let config = ApiConfig {
            default_max_retries: 1,
            default_retry_delay_ms: 50,
            max_retry_delay_ms: 400,
            retry_jitter: true,
            default_retry_status_codes: vec![503],
            tenant_id: Some("9".to_owned()),
            request_timeout_ms: 1500,
            ..ApiConfig::default()
        };

        let retry = config.retry_config();
        assert_eq!(retry.max_retries, 1);
        assert_eq!(retry.backoff.initial, Duration::from_millis(50));
        assert_eq!(retry.backoff.max, Duration::from_millis(400));
        assert!(retry.backoff.jitter);
        assert!(retry.retry_on.contains(&503));
        assert!(!retry.retry_on.contains(&429));

        assert_eq!(config.tenant_defaults().id.as_deref(), Some("9"));
        assert_eq!(
            config.http_client_config().request_timeout,
            Duration::from_millis(1500)
        );
    }
}
