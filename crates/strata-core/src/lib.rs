//! # strata-core
//!
//! Core primitives for the Strata table catalog.
//!
//! - **Entities**: the persisted record model shared by catalogs, namespaces,
//!   tables, views and deferred tasks
//! - **Identifiers**: entity ids, namespaces, table identifiers, realms
//! - **Storage**: object storage backend contract and storage configuration
//! - **Error Types**: shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let ns = Namespace::from_dotted("sales.eu");
//! let ident = TableIdent::new(ns, "orders");
//! assert_eq!(ident.to_string(), "sales.eu.orders");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod namespace;
pub mod observability;
pub mod realm;
pub mod storage;
pub mod storage_config;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::CallContext;
    pub use crate::entity::{Entity, EntityKind, EntitySubKind, NameAndId, keys};
    pub use crate::error::{Error, Result};
    pub use crate::id::{EntityId, EntityIdGenerator, RequestId};
    pub use crate::namespace::{Namespace, TableIdent};
    pub use crate::realm::RealmId;
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, ProviderError, StorageBackend, WritePrecondition, WriteResult,
    };
    pub use crate::storage_config::{StorageConfigInfo, StorageType};
}

pub use context::CallContext;
pub use entity::{Entity, EntityKind, EntitySubKind, NameAndId};
pub use error::{Error, Result};
pub use id::{EntityId, EntityIdGenerator, RequestId};
pub use namespace::{Namespace, TableIdent};
pub use observability::{LogFormat, Redacted, init_logging};
pub use realm::RealmId;
pub use storage::{
    MemoryBackend, ObjectMeta, ProviderError, StorageBackend, WritePrecondition, WriteResult,
};
pub use storage_config::{StorageConfigInfo, StorageType};
