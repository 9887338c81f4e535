//! In-memory key-value map with size validation.
//!
//! [`KvStore`] holds the live state served over HTTP. It knows nothing
//! about the transaction log: the service layer records mutations after
//! they are applied here, and the replay driver feeds logged events back
//! in through [`ReplayTarget`] at startup.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::persistence::ReplayTarget;

/// Default maximum key length in bytes.
pub const DEFAULT_MAX_KEY_SIZE: usize = 256;

/// Default maximum value length in bytes.
pub const DEFAULT_MAX_VALUE_SIZE: usize = 4096;

/// Size limits enforced on every mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum key length in bytes.
    pub max_key_size: usize,
    /// Maximum value length in bytes.
    pub max_value_size: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_key_size: DEFAULT_MAX_KEY_SIZE,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
        }
    }
}

/// Concurrent in-memory map from key bytes to value bytes.
///
/// Readers share the lock; writers are serialized.
#[derive(Debug, Default)]
pub struct KvStore {
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    limits: StoreLimits,
}

impl KvStore {
    /// Creates an empty store with the given limits.
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            limits,
        }
    }

    /// Returns the configured size limits.
    #[must_use]
    pub const fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyTooLarge`] or [`StoreError::ValueTooLarge`]
    /// when a limit is exceeded; the map is left untouched.
    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.check_key(&key)?;
        if value.len() > self.limits.max_value_size {
            return Err(StoreError::ValueTooLarge {
                max: self.limits.max_value_size,
            });
        }
        self.entries.write().await.insert(key, value);
        Ok(())
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchKey`] if the key is absent.
    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or(StoreError::NoSuchKey)
    }

    /// Removes `key`. Deleting an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::KeyTooLarge`] when the key exceeds the limit.
    pub async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.check_key(key)?;
        self.entries.write().await.remove(key);
        Ok(())
    }

    /// Returns the number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_key(&self, key: &[u8]) -> Result<(), StoreError> {
        if key.len() > self.limits.max_key_size {
            return Err(StoreError::KeyTooLarge {
                max: self.limits.max_key_size,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReplayTarget for KvStore {
    async fn apply_put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        self.put(key, value).await
    }

    async fn apply_delete(&self, key: Vec<u8>) -> Result<(), StoreError> {
        self.delete(&key).await
    }
}
