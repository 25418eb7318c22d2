//! Multi-tenant isolation primitives.
//!
//! A realm is the tenant boundary of the catalog service: every entity,
//! credential and deferred task belongs to exactly one realm, and every call
//! runs inside the realm of its caller.
//!
//! # Example
//!
//! ```rust
//! use strata_core::realm::RealmId;
//!
//! let realm = RealmId::new("acme-corp").unwrap();
//! assert_eq!(realm.as_str(), "acme-corp");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A unique identifier for a realm.
///
/// Realm IDs must be:
/// - Non-empty
/// - Lowercase alphanumeric with hyphens
/// - Between 3 and 63 characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RealmId(String);

impl RealmId {
    /// Creates a new realm ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the realm ID is invalid.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates a realm ID without validation.
    ///
    /// Intended for IDs that have already been validated (e.g., loaded
    /// back from storage).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the realm ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidId {
                message: "realm ID cannot be empty".to_string(),
            });
        }

        if id.len() < 3 {
            return Err(Error::InvalidId {
                message: format!("realm ID '{id}' is too short (minimum 3 characters)"),
            });
        }

        if id.len() > 63 {
            return Err(Error::InvalidId {
                message: format!("realm ID '{id}' is too long (maximum 63 characters)"),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::InvalidId {
                message: format!(
                    "realm ID '{id}' contains invalid characters (only lowercase letters, digits, and hyphens allowed)"
                ),
            });
        }

        if id.starts_with('-') || id.ends_with('-') {
            return Err(Error::InvalidId {
                message: format!("realm ID '{id}' cannot start or end with a hyphen"),
            });
        }

        Ok(())
    }
}

impl fmt::Display for RealmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RealmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_realm_ids() {
        assert!(RealmId::new("acme-corp").is_ok());
        assert!(RealmId::new("realm123").is_ok());
        assert!(RealmId::new("abc").is_ok());
    }

    #[test]
    fn invalid_realm_ids() {
        assert!(RealmId::new("").is_err());
        assert!(RealmId::new("ab").is_err());
        assert!(RealmId::new("UPPERCASE").is_err());
        assert!(RealmId::new("-starts-with-hyphen").is_err());
        assert!(RealmId::new("ends-with-hyphen-").is_err());
        assert!(RealmId::new("has spaces").is_err());
    }
}
