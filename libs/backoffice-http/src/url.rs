/// How logical API paths map to request URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlMode {
    /// Same-origin proxy path, e.g. `/api/menu`
    Proxy { root: String },
    /// Fully-qualified backend URL, e.g. `https://api.example.com/menu`
    Direct { base_url: String },
}

/// Maps `/menu`-style paths to request URLs. The mode is fixed at
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    mode: UrlMode,
}

impl UrlBuilder {
    #[must_use]
    pub fn proxy(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            mode: UrlMode::Proxy {
                root: root.trim_end_matches('/').to_owned(),
            },
        }
    }

    #[must_use]
    pub fn direct(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            mode: UrlMode::Direct {
                base_url: base_url.trim_end_matches('/').to_owned(),
            },
        }
    }

    #[must_use]
    pub fn mode(&self) -> &UrlMode {
        &self.mode
    }

    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self.mode, UrlMode::Proxy { .. })
    }

    /// `"menu"` and `"/menu"` produce the same URL.
    #[must_use]
    pub fn build(&self, path: &str) -> String {
        let prefix = match &self.mode {
            UrlMode::Proxy { root } => root,
            UrlMode::Direct { base_url } => base_url,
        };
        if path.starts_with('/') {
            format!("{prefix}{path}")
        } else {
            format!("{prefix}/{path}")
        }
    }
}

impl Default for UrlBuilder {
    fn default() -> Self {
        Self::proxy("/api")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_mode() {
        let urls = UrlBuilder::default();
        assert!(urls.is_proxy());
        assert_eq!(urls.build("/menu"), "/api/menu");
        assert_eq!(urls.build("menu"), "/api/menu");
        assert_eq!(UrlBuilder::proxy("/backend/").build("/orders/1"), "/backend/orders/1");
    }

    #[test]
    fn test_direct_mode() {
        let urls = UrlBuilder::direct("https://api.example.com");
        assert_eq!(urls.build("/menu"), "https://api.example.com/menu");
        assert_eq!(urls.build("menu"), "https://api.example.com/menu");

        let trailing = UrlBuilder::direct("https://api.example.com/v2/");
        assert_eq!(trailing.build("/menu?page=2"), "https://api.example.com/v2/menu?page=2");
        assert_eq!(
            trailing.mode(),
            &UrlMode::Direct {
                base_url: "https://api.example.com/v2".to_owned()
            }
        );
    }

    #[test]
    fn test_empty_proxy_root() {
        assert_eq!(UrlBuilder::proxy("").build("menu"), "/menu");
    }
}
