//! Catalog error taxonomy and REST status mapping.
//!
//! Every variant maps to an Iceberg REST exception name and an HTTP status so
//! the (external) REST layer can render errors without inspecting messages.

use strata_core::{Namespace, TableIdent};
use thiserror::Error;

/// Result type alias for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors surfaced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A namespace, table, view or entity does not exist.
    #[error("{message}")]
    NotFound {
        /// Human-readable error message.
        message: String,
        /// Iceberg exception type (e.g. `NoSuchTableException`).
        error_type: &'static str,
    },

    /// A name collision, including a table/view collision on one identifier.
    #[error("{message}")]
    AlreadyExists {
        /// Human-readable error message.
        message: String,
    },

    /// A namespace still has children.
    #[error("Namespace {namespace} is not empty")]
    NamespaceNotEmpty {
        /// The namespace that could not be dropped.
        namespace: String,
    },

    /// A location is outside the configured boundary, or access was denied.
    #[error("{message}")]
    Forbidden {
        /// Human-readable error message.
        message: String,
    },

    /// The metadata pointer moved between refresh and commit.
    #[error("{message}")]
    Conflict {
        /// Human-readable error message.
        message: String,
        /// Pointer the commit was based on.
        base: Option<String>,
        /// Pointer the commit tried to install.
        attempted: String,
        /// Pointer found at commit time.
        actual: Option<String>,
    },

    /// Credential issuance failed or the entity kind cannot be credentialed.
    #[error("{message}")]
    Unprocessable {
        /// Human-readable error message.
        message: String,
    },

    /// A disallowed configuration override.
    #[error("{message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// Malformed input.
    #[error("{message}")]
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// A collaborator broke a guarantee the caller relied on.
    #[error("{message}")]
    IllegalState {
        /// Human-readable error message.
        message: String,
    },

    /// Object storage or persistence failure.
    #[error("{message}")]
    Storage {
        /// Human-readable error message.
        message: String,
        /// Underlying core error.
        #[source]
        source: strata_core::Error,
    },

    /// Unexpected failure.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable error message.
        message: String,
    },
}

impl CatalogError {
    /// Namespace does not exist.
    #[must_use]
    pub fn namespace_not_found(namespace: &Namespace) -> Self {
        Self::NotFound {
            message: format!("Namespace does not exist: {namespace}"),
            error_type: "NoSuchNamespaceException",
        }
    }

    /// Table does not exist.
    #[must_use]
    pub fn table_not_found(ident: &TableIdent) -> Self {
        Self::NotFound {
            message: format!("Table does not exist: {ident}"),
            error_type: "NoSuchTableException",
        }
    }

    /// View does not exist.
    #[must_use]
    pub fn view_not_found(ident: &TableIdent) -> Self {
        Self::NotFound {
            message: format!("View does not exist: {ident}"),
            error_type: "NoSuchViewException",
        }
    }

    /// Generic entity lookup miss.
    #[must_use]
    pub fn entity_not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound {
            message: format!("Entity does not exist: {what}"),
            error_type: "NotFoundException",
        }
    }

    /// Table already exists.
    #[must_use]
    pub fn table_already_exists(ident: &TableIdent) -> Self {
        Self::AlreadyExists {
            message: format!("Table already exists: {ident}"),
        }
    }

    /// View already exists.
    #[must_use]
    pub fn view_already_exists(ident: &TableIdent) -> Self {
        Self::AlreadyExists {
            message: format!("View already exists: {ident}"),
        }
    }

    /// Namespace already exists.
    #[must_use]
    pub fn namespace_already_exists(namespace: &Namespace) -> Self {
        Self::AlreadyExists {
            message: format!("Namespace already exists: {namespace}"),
        }
    }

    /// Concurrent modification of a metadata pointer.
    #[must_use]
    pub fn commit_conflict(
        kind: &str,
        ident: &TableIdent,
        base: Option<&str>,
        attempted: &str,
        actual: Option<&str>,
    ) -> Self {
        Self::Conflict {
            message: format!(
                "Cannot commit to {kind} {ident} metadata location from {} to {attempted} \
                 because it has been concurrently modified to {}",
                base.unwrap_or("null"),
                actual.unwrap_or("null"),
            ),
            base: base.map(str::to_string),
            attempted: attempted.to_string(),
            actual: actual.map(str::to_string),
        }
    }

    /// Invalid location for an identifier.
    #[must_use]
    pub fn invalid_location(location: &str, ident: impl std::fmt::Display, reason: &str) -> Self {
        Self::Forbidden {
            message: format!("Invalid location '{location}' for identifier '{ident}': {reason}"),
        }
    }

    /// An entity changed between load and update.
    #[must_use]
    pub fn concurrent_modification(what: impl std::fmt::Display) -> Self {
        Self::Conflict {
            message: format!("{what} was concurrently modified"),
            base: None,
            attempted: what.to_string(),
            actual: None,
        }
    }

    /// Returns the Iceberg exception name.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { error_type, .. } => error_type,
            Self::AlreadyExists { .. } => "AlreadyExistsException",
            Self::NamespaceNotEmpty { .. } => "NamespaceNotEmptyException",
            Self::Forbidden { .. } => "ForbiddenException",
            Self::Conflict { .. } => "CommitFailedException",
            Self::Unprocessable { .. } => "UnprocessableEntityException",
            Self::Validation { .. } => "ValidationException",
            Self::BadRequest { .. } => "BadRequestException",
            Self::IllegalState { .. } => "IllegalStateException",
            Self::Storage { .. } => "ServiceUnavailableException",
            Self::Internal { .. } => "InternalServerException",
        }
    }

    /// Returns the HTTP status code.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest { .. } | Self::Validation { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::AlreadyExists { .. } | Self::NamespaceNotEmpty { .. } | Self::Conflict { .. } => {
                409
            }
            Self::Unprocessable { .. } => 422,
            Self::IllegalState { .. } | Self::Internal { .. } => 500,
            Self::Storage { .. } => 503,
        }
    }

    /// True for errors that a metadata read must never retry.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::NotFound { .. }
            | Self::BadRequest { .. }
            | Self::Validation { .. }
            | Self::AlreadyExists { .. }
            | Self::Forbidden { .. }
            | Self::Unprocessable { .. } => true,
            Self::Storage { source, .. } => {
                source.is_not_found() || matches!(source, strata_core::Error::InvalidInput(_))
            }
            _ => false,
        }
    }
}

impl From<strata_core::Error> for CatalogError {
    fn from(err: strata_core::Error) -> Self {
        match err {
            strata_core::Error::Internal { message } => Self::Internal { message },
            other => Self::Storage {
                message: other.to_string(),
                source: other,
            },
        }
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest {
            message: format!("malformed metadata document: {err}"),
        }
    }
}

pub(crate) fn poisoned() -> CatalogError {
    CatalogError::Internal {
        message: "lock poisoned".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let ident = TableIdent::from_dotted("a.b.t");
        assert_eq!(CatalogError::table_not_found(&ident).http_status(), 404);
        assert_eq!(CatalogError::table_already_exists(&ident).http_status(), 409);
        assert_eq!(
            CatalogError::invalid_location("s3://x", &ident, "nope").http_status(),
            403
        );
        assert_eq!(
            CatalogError::Unprocessable {
                message: "x".into()
            }
            .http_status(),
            422
        );
    }

    #[test]
    fn test_conflict_carries_pointers() {
        let ident = TableIdent::from_dotted("a.b.t");
        let err = CatalogError::commit_conflict("table", &ident, Some("p1"), "p3", Some("p2"));
        assert_eq!(err.error_type(), "CommitFailedException");
        assert!(err.to_string().contains("from p1 to p3"));
        assert!(err.to_string().contains("concurrently modified to p2"));
        let CatalogError::Conflict {
            base,
            attempted,
            actual,
            ..
        } = err
        else {
            panic!("expected conflict");
        };
        assert_eq!(base.as_deref(), Some("p1"));
        assert_eq!(attempted, "p3");
        assert_eq!(actual.as_deref(), Some("p2"));
    }

    #[test]
    fn test_core_not_found_is_permanent() {
        let err = CatalogError::from(strata_core::Error::NotFound("s3://x".into()));
        assert!(err.is_permanent());
        let err = CatalogError::from(strata_core::Error::storage("timeout"));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_error_type_mapping() {
        let ns = Namespace::of(["a"]);
        assert_eq!(
            CatalogError::namespace_not_found(&ns).error_type(),
            "NoSuchNamespaceException"
        );
        assert_eq!(
            CatalogError::NamespaceNotEmpty {
                namespace: ns.to_string()
            }
            .error_type(),
            "NamespaceNotEmptyException"
        );
    }
}
