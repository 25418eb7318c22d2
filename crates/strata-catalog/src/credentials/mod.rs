//! Scoped storage credentials.
//!
//! Credentials are issued per request by an external [`CredentialIssuer`],
//! limited to a set of read and write locations, and cached by
//! [`CredentialCache`] until half their remaining lifetime has passed.

mod cache;

pub use cache::{CredentialCache, CredentialCacheKey, ttl_for};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use strata_core::{Entity, Redacted};

use crate::error::CatalogError;

/// Opaque credential key/value map handed to storage clients.
pub type CredentialMap = BTreeMap<String, String>;

/// Storage actions a caller may request credentials for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageAction {
    /// Read objects.
    Read,
    /// Write objects.
    Write,
    /// List prefixes.
    List,
    /// Delete objects.
    Delete,
    /// Every action.
    All,
}

impl FromStr for StorageAction {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "READ" => Ok(Self::Read),
            "WRITE" => Ok(Self::Write),
            "LIST" => Ok(Self::List),
            "DELETE" => Ok(Self::Delete),
            "ALL" => Ok(Self::All),
            other => Err(CatalogError::BadRequest {
                message: format!("unknown storage action: {other}"),
            }),
        }
    }
}

/// Credential scope derived from an action set and one location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    /// Whether listing is allowed.
    pub allow_list: bool,
    /// Locations readable with the credentials.
    pub read_locations: BTreeSet<String>,
    /// Locations writable with the credentials.
    pub write_locations: BTreeSet<String>,
}

impl CredentialScope {
    /// Builds the scope for `actions` on `location`.
    ///
    /// Reads are always allowed; listing needs `List` or `All`; writes need
    /// `Write`, `Delete` or `All`.
    #[must_use]
    pub fn for_actions(actions: &BTreeSet<StorageAction>, location: &str) -> Self {
        let has = |a: StorageAction| actions.contains(&a) || actions.contains(&StorageAction::All);
        let location_set = BTreeSet::from([location.to_string()]);
        Self {
            allow_list: has(StorageAction::List),
            read_locations: location_set.clone(),
            write_locations: if has(StorageAction::Write) || has(StorageAction::Delete) {
                location_set
            } else {
                BTreeSet::new()
            },
        }
    }

    /// Read-only scope for `location`.
    #[must_use]
    pub fn read_only(location: &str) -> Self {
        Self::for_actions(&BTreeSet::from([StorageAction::Read]), location)
    }

    /// Read, write and delete scope for `location`.
    #[must_use]
    pub fn read_write(location: &str) -> Self {
        Self::for_actions(
            &BTreeSet::from([StorageAction::Read, StorageAction::Write, StorageAction::Delete]),
            location,
        )
    }
}

/// Credentials returned by the issuer.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredentials {
    /// Credential map.
    pub credentials: CredentialMap,
    /// Absolute expiration of the credentials.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for ScopedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredentials")
            .field("credentials", &Redacted(&self.credentials))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Failure reported by a credential issuer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct IssueError {
    /// Issuer message.
    pub message: String,
}

impl IssueError {
    /// Creates an issue error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// External collaborator that mints scoped credentials.
#[async_trait]
pub trait CredentialIssuer: Send + Sync + 'static {
    /// Issues credentials for `entity` limited to `scope`.
    async fn issue(
        &self,
        entity: &Entity,
        scope: &CredentialScope,
    ) -> Result<ScopedCredentials, IssueError>;
}
