//! Strongly-typed identifiers for Strata entities.
//!
//! Two families of identifiers live here:
//! - **Entity ids**: catalog-scoped numeric ids allocated by the persistence
//!   layer from a monotonically increasing generator. Immutable once assigned.
//! - **Request ids**: ULIDs minted per call for log correlation.
//!
//! # Example
//!
//! ```rust
//! use strata_core::id::{EntityId, EntityIdGenerator, RequestId};
//!
//! let ids = EntityIdGenerator::new();
//! let a = ids.next_id();
//! let b = ids.next_id();
//! assert!(b > a);
//!
//! let request = RequestId::generate();
//! assert_eq!(request.to_string().len(), 26);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use ulid::Ulid;

use crate::error::{Error, Result};

/// Numeric identifier of an entity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(i64);

impl EntityId {
    /// Id used as the parent of top-level entities (catalogs).
    pub const ROOT: Self = Self(0);

    /// Wraps a raw id.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Returns true for ids that were actually allocated.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<i64>().map(Self).map_err(|e| Error::InvalidId {
            message: format!("invalid entity ID '{s}': {e}"),
        })
    }
}

/// Process-wide allocator of entity ids.
///
/// Ids start at 1 and never repeat for the lifetime of the generator.
#[derive(Debug)]
pub struct EntityIdGenerator {
    next: AtomicI64,
}

impl Default for EntityIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIdGenerator {
    /// Creates a generator whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates a generator whose first id is `first`.
    #[must_use]
    pub const fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A unique identifier for a single inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Generates a new unique request ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// Returns the underlying ULID.
    #[must_use]
    pub const fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| Error::InvalidId {
                message: format!("invalid request ID '{s}': {e}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_monotonic() {
        let ids = EntityIdGenerator::new();
        let first = ids.next_id();
        let second = ids.next_id();
        assert_eq!(first, EntityId::new(1));
        assert!(second > first);
        assert!(first.is_assigned());
        assert!(!EntityId::ROOT.is_assigned());
    }

    #[test]
    fn request_id_roundtrip() {
        let id = RequestId::generate();
        let parsed: RequestId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn invalid_entity_id_returns_error() {
        let result: Result<EntityId> = "twelve".parse();
        assert!(result.is_err());
    }
}
