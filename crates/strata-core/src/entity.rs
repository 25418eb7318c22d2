//! Entity records: the unit of persistence for the catalog.
//!
//! Every catalog object (catalog, namespace, table, view, deferred task) is
//! stored as an [`Entity`]. Type-specific state lives in two string maps:
//! system-owned `internal_properties` and user-visible `properties`. Only the
//! owning write path mutates either map, and every mutation goes through the
//! persistence layer's version-checked update.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::namespace::{Namespace, TableIdent};

/// Internal property keys understood by the catalog.
pub mod keys {
    /// JSON-encoded storage configuration attached to a catalog or namespace.
    pub const STORAGE_CONFIGURATION_INFO: &str = "storage-configuration-info";
    /// Encoded parent namespace of a namespace or table-like entity.
    pub const PARENT_NAMESPACE: &str = "parent-namespace";
    /// Location of the current metadata snapshot of a table-like entity.
    pub const METADATA_LOCATION: &str = "metadata-location";
    /// Default base location of a catalog.
    pub const DEFAULT_BASE_LOCATION: &str = "default-base-location";
    /// Location prefix that new table locations are rewritten from.
    pub const REPLACE_NEW_LOCATION_PREFIX: &str =
        "replace-new-location-prefix-with-catalog-default";
    /// Kind tag of a task entity.
    pub const TASK_TYPE: &str = "task-type";
    /// Opaque payload of a task entity.
    pub const TASK_DATA: &str = "data";
    /// Storage root handed to cleanup tasks.
    pub const STORAGE_LOCATION: &str = "storage-location";
}

/// Top-level entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    /// The realm root container.
    Root,
    /// A principal (user or service).
    Principal,
    /// A role granted to principals.
    PrincipalRole,
    /// A catalog.
    Catalog,
    /// A role scoped to one catalog.
    CatalogRole,
    /// A namespace inside a catalog.
    Namespace,
    /// A table or a view.
    TableLike,
    /// A deferred work item.
    Task,
}

impl EntityKind {
    /// Returns the lowercase display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Principal => "principal",
            Self::PrincipalRole => "principal_role",
            Self::Catalog => "catalog",
            Self::CatalogRole => "catalog_role",
            Self::Namespace => "namespace",
            Self::TableLike => "table_like",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kind distinguishing tables from views.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntitySubKind {
    /// No sub-kind.
    #[default]
    None,
    /// Table-like entity holding a table.
    Table,
    /// Table-like entity holding a view.
    View,
}

impl EntitySubKind {
    /// Returns the lowercase display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Table => "table",
            Self::View => "view",
        }
    }
}

impl fmt::Display for EntitySubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted catalog entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Catalog this entity belongs to (`ROOT` for top-level entities).
    pub catalog_id: EntityId,
    /// Immutable id.
    pub id: EntityId,
    /// Id of the enclosing entity.
    pub parent_id: EntityId,
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity sub-kind.
    pub sub_kind: EntitySubKind,
    /// Leaf name, unique among siblings of the same kind.
    pub name: String,
    /// Version counter bumped by the persistence layer on every update.
    pub entity_version: i64,
    /// Creation timestamp in epoch milliseconds.
    pub create_timestamp_ms: i64,
    /// System-owned properties.
    #[serde(default)]
    pub internal_properties: BTreeMap<String, String>,
    /// User-visible properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Entity {
    /// Creates an entity with empty property maps and no ids assigned.
    #[must_use]
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            catalog_id: EntityId::ROOT,
            id: EntityId::ROOT,
            parent_id: EntityId::ROOT,
            kind,
            sub_kind: EntitySubKind::None,
            name: name.into(),
            entity_version: 1,
            create_timestamp_ms: chrono::Utc::now().timestamp_millis(),
            internal_properties: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Builds a namespace entity for `namespace` (must be non-empty).
    #[must_use]
    pub fn namespace(catalog_id: EntityId, id: EntityId, namespace: &Namespace) -> Self {
        let mut entity = Self::new(EntityKind::Namespace, namespace.name().unwrap_or_default())
            .with_catalog_id(catalog_id)
            .with_id(id);
        let parent = namespace.parent();
        if !parent.is_empty() {
            entity
                .internal_properties
                .insert(keys::PARENT_NAMESPACE.to_string(), parent.encode());
        }
        entity
    }

    /// Builds a table or view entity pointing at `metadata_location`.
    #[must_use]
    pub fn table_like(
        catalog_id: EntityId,
        id: EntityId,
        ident: &TableIdent,
        sub_kind: EntitySubKind,
        metadata_location: impl Into<String>,
    ) -> Self {
        let mut entity = Self::new(EntityKind::TableLike, ident.name.clone())
            .with_catalog_id(catalog_id)
            .with_id(id)
            .with_sub_kind(sub_kind)
            .with_metadata_location(metadata_location);
        entity.internal_properties.insert(
            keys::PARENT_NAMESPACE.to_string(),
            ident.namespace.encode(),
        );
        entity
    }

    /// Sets the catalog id.
    #[must_use]
    pub const fn with_catalog_id(mut self, catalog_id: EntityId) -> Self {
        self.catalog_id = catalog_id;
        self
    }

    /// Sets the id.
    #[must_use]
    pub const fn with_id(mut self, id: EntityId) -> Self {
        self.id = id;
        self
    }

    /// Sets the parent id.
    #[must_use]
    pub const fn with_parent_id(mut self, parent_id: EntityId) -> Self {
        self.parent_id = parent_id;
        self
    }

    /// Sets the sub-kind.
    #[must_use]
    pub const fn with_sub_kind(mut self, sub_kind: EntitySubKind) -> Self {
        self.sub_kind = sub_kind;
        self
    }

    /// Replaces the user-visible properties.
    #[must_use]
    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Sets one internal property.
    #[must_use]
    pub fn with_internal_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.internal_properties.insert(key.into(), value.into());
        self
    }

    /// Sets the metadata pointer.
    #[must_use]
    pub fn with_metadata_location(self, location: impl Into<String>) -> Self {
        self.with_internal_property(keys::METADATA_LOCATION, location)
    }

    /// Returns the metadata pointer of a table-like entity.
    #[must_use]
    pub fn metadata_location(&self) -> Option<&str> {
        self.internal_properties
            .get(keys::METADATA_LOCATION)
            .map(String::as_str)
    }

    /// Returns true when this entity carries a storage configuration.
    #[must_use]
    pub fn has_storage_config(&self) -> bool {
        self.internal_properties
            .contains_key(keys::STORAGE_CONFIGURATION_INFO)
    }

    /// Returns the raw storage configuration document, if any.
    #[must_use]
    pub fn storage_config_json(&self) -> Option<&str> {
        self.internal_properties
            .get(keys::STORAGE_CONFIGURATION_INFO)
            .map(String::as_str)
    }

    /// Returns the decoded parent namespace.
    #[must_use]
    pub fn parent_namespace(&self) -> Namespace {
        self.internal_properties
            .get(keys::PARENT_NAMESPACE)
            .map_or_else(Namespace::empty, |encoded| Namespace::decode(encoded))
    }

    /// Returns the full namespace of a namespace entity.
    #[must_use]
    pub fn as_namespace(&self) -> Namespace {
        self.parent_namespace().child(self.name.clone())
    }

    /// Returns the identifier of a table-like entity.
    #[must_use]
    pub fn table_ident(&self) -> TableIdent {
        TableIdent::new(self.parent_namespace(), self.name.clone())
    }

    /// Returns the name/id pair used by listings.
    #[must_use]
    pub fn name_and_id(&self) -> NameAndId {
        NameAndId {
            name: self.name.clone(),
            id: self.id,
        }
    }
}

/// Compact listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameAndId {
    /// Entity name.
    pub name: String,
    /// Entity id.
    pub id: EntityId,
}
