//! Object storage abstraction used for metadata snapshots and table data.
//!
//! Objects are addressed by their full location URI (`s3://bucket/a/b/...`).
//! The catalog only needs five primitives: read, conditional write, delete,
//! prefix listing and existence checks.
//!
//! ## Provider failures
//!
//! Backends report provider-side failures as [`Error::Storage`] whose source
//! is a [`ProviderError`]. Callers that decide whether to retry walk the
//! source chain and inspect the deepest `ProviderError`.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Precondition for conditional writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePrecondition {
    /// Write only if the object does not exist.
    DoesNotExist,
    /// Write only if the object's version matches the given token.
    MatchesVersion(String),
    /// Write unconditionally.
    None,
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    /// Write succeeded.
    Success {
        /// The new version token after the write.
        version: String,
    },
    /// Precondition failed.
    PreconditionFailed {
        /// The version that caused the precondition to fail.
        current_version: String,
    },
}

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object location.
    pub location: String,
    /// Object size in bytes.
    pub size: u64,
    /// Opaque version token.
    pub version: String,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend trait for object storage.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, location: &str) -> Result<Bytes>;

    /// Writes with an optional precondition.
    ///
    /// Precondition failure is a normal result, never an error.
    async fn put(
        &self,
        location: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult>;

    /// Deletes an object. Succeeds even if the object doesn't exist.
    async fn delete(&self, location: &str) -> Result<()>;

    /// Lists objects whose location starts with `prefix`, in arbitrary order.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    async fn head(&self, location: &str) -> Result<Option<ObjectMeta>>;
}

/// Failure reported by an object storage provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Whether the provider marked the failure as safe to retry.
    pub retryable: bool,
    /// HTTP status code returned by the provider, if any.
    pub status: Option<u16>,
    /// Provider message.
    pub message: String,
}

impl ProviderError {
    /// A throttling or availability failure the provider marks retryable.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            status: Some(503),
            message: message.into(),
        }
    }

    /// An access-denied failure.
    #[must_use]
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status: Some(403),
            message: message.into(),
        }
    }

    /// A failure with no classification signal.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status: None,
            message: message.into(),
        }
    }
}

/// In-memory storage backend for tests and local runs.
///
/// Thread-safe via `RwLock`. Clones share the same object map.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    version: i64,
    last_modified: DateTime<Utc>,
}

impl StoredObject {
    fn meta(&self, location: &str) -> ObjectMeta {
        ObjectMeta {
            location: location.to_string(),
            size: self.data.len() as u64,
            version: self.version.to_string(),
            last_modified: Some(self.last_modified),
        }
    }
}

fn poisoned() -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryBackend {
    /// Creates a new empty memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored objects.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.objects.read().map_err(|_| poisoned())?.len())
    }

    /// Returns true when no objects are stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, location: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        objects
            .get(location)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {location}")))
    }

    async fn put(
        &self,
        location: &str,
        data: Bytes,
        precondition: WritePrecondition,
    ) -> Result<WriteResult> {
        let mut objects = self.objects.write().map_err(|_| poisoned())?;
        let current = objects.get(location);

        match precondition {
            WritePrecondition::DoesNotExist => {
                if let Some(obj) = current {
                    return Ok(WriteResult::PreconditionFailed {
                        current_version: obj.version.to_string(),
                    });
                }
            }
            WritePrecondition::MatchesVersion(expected) => {
                let expected_num: i64 = expected.parse().unwrap_or(-1);
                match current {
                    Some(obj) if obj.version != expected_num => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: obj.version.to_string(),
                        });
                    }
                    None => {
                        return Ok(WriteResult::PreconditionFailed {
                            current_version: "0".to_string(),
                        });
                    }
                    _ => {}
                }
            }
            WritePrecondition::None => {}
        }

        let new_version = current.map_or(1, |o| o.version + 1);
        objects.insert(
            location.to_string(),
            StoredObject {
                data,
                version: new_version,
                last_modified: Utc::now(),
            },
        );
        drop(objects);

        Ok(WriteResult::Success {
            version: new_version.to_string(),
        })
    }

    async fn delete(&self, location: &str) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .remove(location);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;

        Ok(objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(location, obj)| obj.meta(location))
            .collect())
    }

    async fn head(&self, location: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| poisoned())?;
        Ok(objects.get(location).map(|obj| obj.meta(location)))
    }
}
