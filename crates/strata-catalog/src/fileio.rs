//! Transient storage clients configured with scoped credentials.
//!
//! Each refresh, commit or cleanup call opens its own client through a
//! [`StorageClientFactory`] and holds it in a [`StorageLease`]. The lease
//! closes the client when dropped, so every exit path releases it.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use strata_core::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};

use crate::error::{CatalogResult, poisoned};

/// Property selecting the storage client implementation.
pub const IO_IMPL: &str = "io-impl";

/// A storage client that owns resources until closed.
pub trait StorageClient: StorageBackend {
    /// Releases the client's resources.
    fn close(&self);
}

/// Builds storage clients from string properties.
pub trait StorageClientFactory: Send + Sync + 'static {
    /// Opens a client configured with `properties`.
    ///
    /// # Errors
    ///
    /// Returns an error when the properties cannot configure a client.
    fn open(&self, properties: &BTreeMap<String, String>) -> CatalogResult<Box<dyn StorageClient>>;
}

/// Exclusive handle to an open client. Closes the client on drop.
pub struct StorageLease {
    client: Box<dyn StorageClient>,
}

impl StorageLease {
    /// Opens a client with `credentials` layered over `defaults`.
    ///
    /// # Errors
    ///
    /// Propagates factory errors.
    pub fn open(
        factory: &dyn StorageClientFactory,
        defaults: &BTreeMap<String, String>,
        credentials: &BTreeMap<String, String>,
    ) -> CatalogResult<Self> {
        let properties = merge_properties(defaults, credentials);
        Ok(Self {
            client: factory.open(&properties)?,
        })
    }
}

impl Deref for StorageLease {
    type Target = dyn StorageClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref()
    }
}

impl Drop for StorageLease {
    fn drop(&mut self) {
        self.client.close();
    }
}

/// Returns `base` with `overrides` applied on top.
#[must_use]
pub fn merge_properties(
    base: &BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Factory handing out clients over one shared backend.
///
/// Counts opened and closed clients and records the properties each client
/// was opened with.
pub struct MemoryStorageFactory {
    backend: Arc<dyn StorageBackend>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    opened_with: Mutex<Vec<BTreeMap<String, String>>>,
}

impl std::fmt::Debug for MemoryStorageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorageFactory")
            .field("opened", &self.opened.load(Ordering::SeqCst))
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MemoryStorageFactory {
    /// Creates a factory over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            opened: AtomicUsize::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            opened_with: Mutex::new(Vec::new()),
        }
    }

    /// Creates a factory over a fresh [`MemoryBackend`].
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// The shared backend.
    #[must_use]
    pub fn backend(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.backend)
    }

    /// Number of clients opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of clients closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Properties of every client opened so far.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn opened_with(&self) -> CatalogResult<Vec<BTreeMap<String, String>>> {
        Ok(self.opened_with.lock().map_err(|_| poisoned())?.clone())
    }
}

impl StorageClientFactory for MemoryStorageFactory {
    fn open(&self, properties: &BTreeMap<String, String>) -> CatalogResult<Box<dyn StorageClient>> {
        self.opened_with
            .lock()
            .map_err(|_| poisoned())?
            .push(properties.clone());
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SharedBackendClient {
            backend: Arc::clone(&self.backend),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct SharedBackendClient {
    backend: Arc<dyn StorageBackend>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl StorageBackend for SharedBackendClient {
    async fn get(&self, location: &str) -> strata_core::Result<Bytes> {
        self.backend.get(location).await
    }

    async fn put(
        &self,
        location: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> strata_core::Result<WriteResult> {
        self.backend.put(location, data, precondition).await
    }

    async fn delete(&self, location: &str) -> strata_core::Result<()> {
        self.backend.delete(location).await
    }

    async fn list(&self, prefix: &str) -> strata_core::Result<Vec<ObjectMeta>> {
        self.backend.list(prefix).await
    }

    async fn head(&self, location: &str) -> strata_core::Result<Option<ObjectMeta>> {
        self.backend.head(location).await
    }
}

impl StorageClient for SharedBackendClient {
    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_closes_on_drop() {
        let factory = MemoryStorageFactory::in_memory();
        let defaults = BTreeMap::from([("region".to_string(), "eu".to_string())]);
        let creds = BTreeMap::from([
            ("region".to_string(), "us".to_string()),
            ("token".to_string(), "t".to_string()),
        ]);
        {
            let lease = StorageLease::open(&factory, &defaults, &creds).expect("open");
            lease
                .put("s3://b/x", Bytes::from("1"), WritePrecondition::None)
                .await
                .expect("put");
            assert_eq!(factory.closed(), 0);
        }
        assert_eq!(factory.opened(), 1);
        assert_eq!(factory.closed(), 1);

        let props = factory.opened_with().expect("props");
        assert_eq!(props[0].get("region").map(String::as_str), Some("us"));
        assert!(factory.backend().head("s3://b/x").await.expect("head").is_some());
    }
}
