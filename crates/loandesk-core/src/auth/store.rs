use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use super::persistence::{MemoryPersistence, StoreError, StoredToken, TokenPersistence};
use super::session::Session;

/// Storage key names for the two token kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenKeys {
    pub access: String,
    pub refresh: String,
}

impl TokenKeys {
    pub fn new(access: &str, refresh: &str) -> Self {
        Self {
            access: access.to_string(),
            refresh: refresh.to_string(),
        }
    }
}

/// Default lifetimes applied by `store_pair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub access: Duration,
    pub refresh: Duration,
}

/// Client-side token storage over a primary and an optional fallback backend.
///
/// Reads try the primary first; writes and clears go to both. The primary
/// is authoritative: a failed fallback write is logged, not returned.
pub struct TokenStore {
    primary: Arc<dyn TokenPersistence>,
    fallback: Option<Arc<dyn TokenPersistence>>,
    keys: TokenKeys,
    ttls: TokenTtls,
}

impl TokenStore {
    pub fn new(primary: Arc<dyn TokenPersistence>, keys: TokenKeys, ttls: TokenTtls) -> Self {
        Self {
            primary,
            fallback: None,
            keys,
            ttls,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn TokenPersistence>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Store backed only by process memory.
    pub fn in_memory(keys: TokenKeys, ttls: TokenTtls) -> Self {
        Self::new(Arc::new(MemoryPersistence::new()), keys, ttls)
    }

    pub fn keys(&self) -> &TokenKeys {
        &self.keys
    }

    pub fn ttls(&self) -> TokenTtls {
        self.ttls
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(&self.keys.access).map(|t| t.value)
    }

    pub fn set_access_token(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        self.write(&self.keys.access, &StoredToken::new(token, ttl))
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(&self.keys.refresh).map(|t| t.value)
    }

    pub fn set_refresh_token(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        self.write(&self.keys.refresh, &StoredToken::new(token, ttl))
    }

    /// Replace both tokens using the configured lifetimes.
    pub fn store_pair(&self, access_token: &str, refresh_token: &str) -> Result<(), StoreError> {
        self.set_refresh_token(refresh_token, self.ttls.refresh)?;
        self.set_access_token(access_token, self.ttls.access)
    }

    /// Both tokens with their expiries, if both are currently held.
    pub fn session(&self) -> Option<Session> {
        let access = self.read(&self.keys.access)?;
        let refresh = self.read(&self.keys.refresh)?;
        Some(Session {
            access_token: access.value,
            access_token_expiry: access.expires_at,
            refresh_token: refresh.value,
            refresh_token_expiry: refresh.expires_at,
        })
    }

    /// Remove both tokens from every backend.
    ///
    /// Every removal is attempted even if one fails; the first error is returned.
    pub fn clear_tokens(&self) -> Result<(), StoreError> {
        let mut first_error = None;
        for backend in self.backends() {
            for key in [&self.keys.access, &self.keys.refresh] {
                if let Err(e) = backend.remove(key) {
                    warn!(backend = backend.name(), key = %key, error = %e, "Failed to remove token");
                    first_error.get_or_insert(e);
                }
            }
        }
        debug!("Cleared stored tokens");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn backends(&self) -> impl Iterator<Item = &Arc<dyn TokenPersistence>> {
        std::iter::once(&self.primary).chain(self.fallback.iter())
    }

    fn read(&self, key: &str) -> Option<StoredToken> {
        for backend in self.backends() {
            match backend.get(key) {
                Ok(Some(token)) if !token.is_expired() => return Some(token),
                Ok(Some(_)) => {
                    debug!(backend = backend.name(), key = %key, "Stored token expired");
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(backend = backend.name(), key = %key, error = %e, "Failed to read token");
                }
            }
        }
        None
    }

    fn write(&self, key: &str, token: &StoredToken) -> Result<(), StoreError> {
        self.primary.set(key, token)?;
        if let Some(fallback) = &self.fallback {
            if let Err(e) = fallback.set(key, token) {
                warn!(backend = fallback.name(), key = %key, error = %e, "Failed to write token to fallback");
            }
        }
        Ok(())
    }
}
