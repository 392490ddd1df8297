use anyhow::{Context as _, Result};
use backoffice_http::{ApiClient, ApiConfig, FileStore, SharedStore, TenantResolver, TokenStore};
use std::path::{Path, PathBuf};

/// Loaded configuration plus the location of the token/tenant storage
pub struct Context {
    pub config: ApiConfig,
    store_path: PathBuf,
}

impl Context {
    pub fn new(config: ApiConfig, store_path: PathBuf) -> Self {
        Self { config, store_path }
    }

    /// Load configuration and pick the storage file (`--store`, else the
    /// per-user default).
    pub fn load(config: Option<&Path>, store: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = config
            && !path.exists()
        {
            anyhow::bail!("config file does not exist: {}", path.display());
        }

        let config = ApiConfig::load(config).context("failed to load configuration")?;
        let store_path = match store {
            Some(path) => path,
            None => default_store_path()?,
        };
        tracing::debug!(store = %store_path.display(), "using storage file");
        Ok(Self::new(config, store_path))
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn open_store(&self) -> Result<SharedStore> {
        let store = FileStore::open(self.store_path.clone())
            .with_context(|| format!("failed to open storage {}", self.store_path.display()))?;
        Ok(store.shared())
    }

    pub fn tokens(&self) -> Result<TokenStore> {
        Ok(TokenStore::new(self.open_store()?))
    }

    pub fn tenants(&self) -> Result<TenantResolver> {
        Ok(TenantResolver::new(
            Some(self.open_store()?),
            self.config.tenant_defaults(),
        ))
    }

    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::from_config(&self.config, Some(self.open_store()?))
            .context("failed to build API client")
    }
}

/// `<config dir>/backoffice/storage.json`
fn default_store_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join("backoffice").join("storage.json"))
        .context("cannot determine the user config directory; pass --store")
}
