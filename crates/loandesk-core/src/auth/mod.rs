//! Authentication module for managing sessions and tokens.
//!
//! This module provides:
//! - `TokenStore`: access/refresh tokens over pluggable `TokenPersistence`
//!   backends (memory, JSON file, OS keychain)
//! - `RefreshClient`: exchanges the refresh token for a new pair, failing closed
//! - `AuthGuard`: answers whether the current session may view a page
//! - `Session`, `AuthenticatedUser`, `Role`: the client-side session model
//!
//! Access tokens live for minutes, refresh tokens for weeks.

pub mod guard;
pub mod persistence;
pub mod refresh;
pub mod session;
pub mod store;

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Config, StorageKind};

pub use guard::{AuthGuard, GuardState};
pub use persistence::{
    FilePersistence, KeyringPersistence, MemoryPersistence, StoreError, StoredToken,
    TokenPersistence,
};
pub use refresh::RefreshClient;
pub use session::{AuthenticatedUser, Role, Session, TokenPair};
pub use store::{TokenKeys, TokenStore, TokenTtls};

/// Build the token store described by the configuration.
///
/// With file storage the JSON file is authoritative and the OS keychain is
/// the fallback.
pub fn token_store_from_config(config: &Config) -> Result<TokenStore> {
    let keys = config.portal.token_keys();
    let ttls = config.token_ttls()?;

    let store = match config.storage {
        StorageKind::File => {
            let primary = Arc::new(FilePersistence::new(&config.cache_dir()?));
            let fallback = Arc::new(KeyringPersistence::new(config.keyring_service()));
            TokenStore::new(primary, keys, ttls).with_fallback(fallback)
        }
        StorageKind::Keyring => {
            let primary = Arc::new(KeyringPersistence::new(config.keyring_service()));
            TokenStore::new(primary, keys, ttls)
        }
        StorageKind::Memory => TokenStore::in_memory(keys, ttls),
    };
    Ok(store)
}
