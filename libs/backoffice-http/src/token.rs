use crate::storage::{SharedStore, StorageError};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Storage key of the access token
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Storage key of the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Keys written by older front-end builds; removed on logout so a stale
/// credential cannot be picked up again.
pub const LEGACY_TOKEN_KEYS: [&str; 3] = ["auth_token", "access_token", "token"];

/// Current credentials
#[derive(Debug, Default)]
pub struct TokenPair {
    pub access: Option<SecretString>,
    pub refresh: Option<SecretString>,
}

/// Access/refresh token persistence
///
/// Reads always go to storage. Empty stored strings count as absent. A store
/// without storage attached (server-side rendering, background jobs) reports
/// no token and ignores writes.
#[derive(Clone, Default)]
pub struct TokenStore {
    store: Option<SharedStore>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("attached", &self.store.is_some())
            .finish()
    }
}

impl TokenStore {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store: Some(store) }
    }

    /// Token store with no storage behind it
    #[must_use]
    pub fn detached() -> Self {
        Self { store: None }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.store.is_some()
    }

    fn read(&self, key: &str) -> Option<SecretString> {
        self.store
            .as_ref()?
            .get(key)
            .filter(|value| !value.is_empty())
            .map(SecretString::from)
    }

    /// Current access token
    #[must_use]
    pub fn get(&self) -> Option<SecretString> {
        self.read(ACCESS_TOKEN_KEY)
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<SecretString> {
        self.read(REFRESH_TOKEN_KEY)
    }

    #[must_use]
    pub fn pair(&self) -> TokenPair {
        TokenPair {
            access: self.get(),
            refresh: self.refresh_token(),
        }
    }

    #[must_use]
    pub fn has_token(&self) -> bool {
        self.get().is_some()
    }

    /// Store a new access token, and the refresh token when one is given.
    ///
    /// Passing `None` for `refresh` keeps the stored refresh token.
    ///
    /// # Errors
    /// Returns `StorageError` if the underlying store rejects the write.
    pub fn set(
        &self,
        access: &SecretString,
        refresh: Option<&SecretString>,
    ) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            tracing::debug!("no storage attached; token not persisted");
            return Ok(());
        };

        match refresh {
            Some(refresh) => store.update(&[
                (ACCESS_TOKEN_KEY, Some(access.expose_secret())),
                (REFRESH_TOKEN_KEY, Some(refresh.expose_secret())),
            ]),
            None => store.set(ACCESS_TOKEN_KEY, access.expose_secret()),
        }
    }

    /// Remove both tokens and every legacy token key.
    ///
    /// # Errors
    /// Returns `StorageError` if the underlying store rejects a removal.
    pub fn clear(&self) -> Result<(), StorageError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let changes: Vec<(&str, Option<&str>)> = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY]
            .into_iter()
            .chain(LEGACY_TOKEN_KEYS)
            .map(|key| (key, None))
            .collect();
        store.update(&changes)
    }
}
