//! Test storage with operation recording and failure injection.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use strata_core::error::{Error, Result};
use strata_core::storage::{
    MemoryBackend, ObjectMeta, ProviderError, StorageBackend, WritePrecondition, WriteResult,
};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Get operation.
    Get {
        /// Location that was read.
        location: String,
    },
    /// Put operation.
    Put {
        /// Location that was written.
        location: String,
        /// Precondition used.
        precondition: WritePrecondition,
    },
    /// Delete operation.
    Delete {
        /// Location that was deleted.
        location: String,
    },
    /// List operation.
    List {
        /// Prefix that was listed.
        prefix: String,
    },
    /// Head operation.
    Head {
        /// Location that was checked.
        location: String,
    },
}

impl StorageOp {
    /// True for writes.
    pub fn is_put(&self) -> bool {
        matches!(self, Self::Put { .. })
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    prefix: String,
    remaining: usize,
    error: ProviderError,
}

/// In-memory storage backend with operation tracing.
///
/// Failures are injected per location prefix and consumed one per matching
/// operation; a failed operation is still recorded.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryBackend {
    inner: MemoryBackend,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    failures: Arc<Mutex<Vec<InjectedFailure>>>,
}

impl TracingMemoryBackend {
    /// Creates a new empty tracing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Number of recorded writes.
    #[must_use]
    pub fn put_count(&self) -> usize {
        self.operations().iter().filter(|op| op.is_put()).count()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails the next `times` operations on locations starting with `prefix`.
    pub fn inject_failures(&self, prefix: impl Into<String>, times: usize, error: ProviderError) {
        self.failures.lock().expect("lock").push(InjectedFailure {
            prefix: prefix.into(),
            remaining: times,
            error,
        });
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().expect("lock").clear();
    }

    /// Returns all stored locations, sorted.
    pub async fn locations(&self) -> Vec<String> {
        let mut locations: Vec<String> = self
            .inner
            .list("")
            .await
            .expect("list")
            .into_iter()
            .map(|o| o.location)
            .collect();
        locations.sort();
        locations
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, location: &str) -> Result<()> {
        let mut failures = self.failures.lock().expect("lock");
        let Some(failure) = failures
            .iter_mut()
            .find(|f| f.remaining > 0 && location.starts_with(&f.prefix))
        else {
            return Ok(());
        };
        failure.remaining -= 1;
        Err(Error::storage_with_source(
            format!("injected failure for {location}"),
            failure.error.clone(),
        ))
    }
}

#[async_trait]
impl StorageBackend for TracingMemoryBackend {
    async fn get(&self, location: &str) -> Result<Bytes> {
        self.record(StorageOp::Get {
            location: location.to_string(),
        });
        self.check_failure(location)?;
        self.inner.get(location).await
    }

    async fn put(
        &self,
        location: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        self.record(StorageOp::Put {
            location: location.to_string(),
            precondition: precondition.clone(),
        });
        self.check_failure(location)?;
        self.inner.put(location, data, precondition).await
    }

    async fn delete(&self, location: &str) -> Result<()> {
        self.record(StorageOp::Delete {
            location: location.to_string(),
        });
        self.check_failure(location)?;
        self.inner.delete(location).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        self.record(StorageOp::List {
            prefix: prefix.to_string(),
        });
        self.check_failure(prefix)?;
        self.inner.list(prefix).await
    }

    async fn head(&self, location: &str) -> Result<Option<ObjectMeta>> {
        self.record(StorageOp::Head {
            location: location.to_string(),
        });
        self.check_failure(location)?;
        self.inner.head(location).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let storage = TracingMemoryBackend::new();
        storage
            .put("s3://b/x", Bytes::from("1"), WritePrecondition::None)
            .await
            .expect("put");
        storage.inject_failures("s3://b/", 2, ProviderError::retryable("SlowDown"));

        assert!(storage.get("s3://b/x").await.is_err());
        assert!(storage.get("s3://b/x").await.is_err());
        assert_eq!(storage.get("s3://b/x").await.expect("get"), Bytes::from("1"));
        assert_eq!(storage.operations().len(), 4);
        assert_eq!(storage.put_count(), 1);
    }
}
