//! Key-value service: applies mutations, then records them.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::KvStore;
use crate::error::StoreError;
use crate::persistence::TransactionLogger;

/// Orchestration layer for all key-value operations.
///
/// Every mutation follows the pattern: validate and apply to the store →
/// enqueue on the transaction log → return. Durability is asynchronous;
/// a write that later fails to persist is reported on the logger's error
/// channel, not to the caller.
///
/// Mutations hold `write_order` across both steps, so the store and the
/// log see racing writers in the same order.
#[derive(Debug, Clone)]
pub struct KvService {
    store: Arc<KvStore>,
    logger: Arc<dyn TransactionLogger>,
    write_order: Arc<Mutex<()>>,
}

impl KvService {
    /// Creates a new `KvService`.
    #[must_use]
    pub fn new(store: Arc<KvStore>, logger: Arc<dyn TransactionLogger>) -> Self {
        Self {
            store,
            logger,
            write_order: Arc::new(Mutex::new(())),
        }
    }

    /// Returns a reference to the inner [`KvStore`].
    #[must_use]
    pub fn store(&self) -> &Arc<KvStore> {
        &self.store
    }

    /// Returns a reference to the transaction logger.
    #[must_use]
    pub fn logger(&self) -> &Arc<dyn TransactionLogger> {
        &self.logger
    }

    /// Stores `value` under `key` and records the put.
    ///
    /// # Errors
    ///
    /// Returns a validation [`StoreError`] if a size limit is exceeded (the
    /// mutation is then neither applied nor logged), or [`StoreError::Log`]
    /// if the logger no longer accepts events.
    pub async fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StoreError> {
        let _ordered = self.write_order.lock().await;
        self.store.put(key.clone(), value.clone()).await?;
        self.logger.record_put(key, value).await?;
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NoSuchKey`] if the key is absent.
    pub async fn get(&self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        self.store.get(key).await
    }

    /// Removes `key` and records the delete.
    ///
    /// # Errors
    ///
    /// Same conditions as [`KvService::put`].
    pub async fn delete(&self, key: Vec<u8>) -> Result<(), StoreError> {
        let _ordered = self.write_order.lock().await;
        self.store.delete(&key).await?;
        self.logger.record_delete(key).await?;
        Ok(())
    }
}
