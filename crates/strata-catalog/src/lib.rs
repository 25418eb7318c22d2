//! # strata-catalog
//!
//! The write/read path of the Strata table catalog.
//!
//! - **Credential cache**: scoped storage credentials keyed by entity, action
//!   set and locations, loaded single-flight and held for half their lifetime
//! - **Metadata commits**: refresh and compare-and-swap commit of table and
//!   view metadata pointers, with location validation against the inherited
//!   storage configuration
//! - **Deferred tasks**: background execution of cleanup work with linear
//!   retry, dispatched to the first handler that accepts the task
//!
//! ## Commit flow
//!
//! 1. Validate the proposed location before anything is written
//! 2. Write the new metadata file with scoped credentials
//! 3. Swap the pointer with the store's version-checked update
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_catalog::prelude::*;
//!
//! let session = CatalogSession::initialize(services, "warehouse", ctx, props).await?;
//! let created = session
//!     .create_table_like(&ident, MetadataObject::Table(TableMetadata::new("")))
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fileio;
pub mod metadata;
pub mod metrics;
pub mod notification;
pub mod operations;
pub mod persistence;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod tasks;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{CatalogSession, DropOutcome};
    pub use crate::config::CatalogConfig;
    pub use crate::credentials::{
        CredentialCache, CredentialIssuer, CredentialMap, CredentialScope, ScopedCredentials,
        StorageAction,
    };
    pub use crate::error::{CatalogError, CatalogResult};
    pub use crate::metadata::{MetadataObject, TableLikeKind, TableMetadata, ViewMetadata};
    pub use crate::operations::{MetadataOperations, MetadataSnapshot, OperationState};
    pub use crate::persistence::{EntityStore, MemoryEntityStore};
    pub use crate::state::CatalogServices;
    pub use crate::tasks::{TaskExecutor, TaskHandler, TaskOutcome};
}

pub use catalog::{CatalogSession, DropOutcome};
pub use config::CatalogConfig;
pub use error::{CatalogError, CatalogResult};
pub use operations::{MetadataOperations, MetadataSnapshot};
pub use state::CatalogServices;
