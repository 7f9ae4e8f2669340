//! Pluggable persistence backends for tokens.
//!
//! Each backend stores `StoredToken` records under string keys. Records carry
//! their own expiry so backends without native expiry (files, keychains)
//! behave like cookies.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token record is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Keychain access failed: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Token store lock poisoned")]
    Poisoned,
}

/// A single persisted token with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    /// Record expiring `ttl` from now. Lifetimes past the end of the
    /// calendar saturate instead of overflowing.
    pub fn new(value: &str, ttl: Duration) -> Self {
        Self {
            value: value.to_string(),
            expires_at: Utc::now()
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Storage backend for token records.
///
/// `remove` must succeed when the key is absent.
pub trait TokenPersistence: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError>;

    fn set(&self, key: &str, token: &StoredToken) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, StoredToken>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TokenPersistence for MemoryPersistence {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(key).cloned())
    }

    fn set(&self, key: &str, token: &StoredToken) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(key.to_string(), token.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(key);
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// Token file name in the cache directory
const TOKEN_FILE: &str = "tokens.json";

/// All records in one JSON object keyed by storage key.
pub struct FilePersistence {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePersistence {
    pub fn new(cache_dir: &Path) -> Self {
        Self::at_path(cache_dir.join(TOKEN_FILE))
    }

    pub fn at_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, StoredToken>, StoreError> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Like `read_all`, but a corrupt token file reads as empty so it gets
    /// replaced instead of blocking every later write. The flag is set when
    /// the file was discarded.
    fn read_all_for_update(&self) -> Result<(HashMap<String, StoredToken>, bool), StoreError> {
        match self.read_all() {
            Ok(records) => Ok((records, false)),
            Err(StoreError::Serialization(e)) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt token file");
                Ok((HashMap::new(), true))
            }
            Err(e) => Err(e),
        }
    }

    fn write_all(&self, records: &HashMap<String, StoredToken>) -> Result<(), StoreError> {
        if records.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path)?;
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(records)?;
        std::fs::write(&self.path, contents)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }
}

impl TokenPersistence for FilePersistence {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, token: &StoredToken) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let (mut records, _) = self.read_all_for_update()?;
        records.insert(key.to_string(), token.clone());
        self.write_all(&records)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let (mut records, discarded) = self.read_all_for_update()?;
        if records.remove(key).is_some() || discarded {
            self.write_all(&records)?;
        }
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// One keychain entry per storage key, holding the JSON-encoded record.
///
/// Entries are created once per key and reused, so credential stores that
/// keep state on the entry itself see every write.
pub struct KeyringPersistence {
    service: String,
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl KeyringPersistence {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self, key: &str) -> Result<Arc<Entry>, StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(entry) = entries.get(key) {
            return Ok(entry.clone());
        }
        let entry = Arc::new(Entry::new(&self.service, key)?);
        entries.insert(key.to_string(), entry.clone());
        Ok(entry)
    }
}

impl TokenPersistence for KeyringPersistence {
    fn name(&self) -> &'static str {
        "keyring"
    }

    fn get(&self, key: &str) -> Result<Option<StoredToken>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, token: &StoredToken) -> Result<(), StoreError> {
        let secret = serde_json::to_string(token)?;
        self.entry(key)?.set_password(&secret)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Route keychain access to keyring's in-process mock store.
#[cfg(test)]
pub(crate) fn use_mock_keyring() {
    static MOCK: std::sync::Once = std::sync::Once::new();
    MOCK.call_once(|| {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder())
    });
}
