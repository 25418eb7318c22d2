//! Entity persistence contract and an in-memory implementation.
//!
//! The commit protocol needs exactly three atomic primitives from the store:
//! create-if-absent, a version-checked property update, and drop-if-exists
//! that can register deferred cleanup work. Everything else here (lookup,
//! listing, rename) supports the catalog session surface.
//!
//! A `parent_path` is the ordered chain of resolved ancestors, catalog first.
//! Stores re-check that every ancestor still exists before writing below it.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use strata_core::entity::keys;
use strata_core::{Entity, EntityId, EntityIdGenerator, EntityKind, EntitySubKind};

use crate::error::{CatalogError, CatalogResult, poisoned};

/// Task type tag for table data cleanup.
pub const TABLE_CLEANUP_TASK: &str = "table-cleanup";

/// Outcome of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; carries the stored record.
    Applied(Entity),
    /// Another entity already holds the name.
    AlreadyExists {
        /// Sub-kind of the entity holding the name.
        sub_kind: EntitySubKind,
    },
    /// The entity or one of its ancestors no longer exists.
    NotFound,
    /// The stored version differs from the expected one.
    VersionMismatch,
}

impl WriteOutcome {
    /// Returns the stored record if the write was applied.
    #[must_use]
    pub fn applied(self) -> Option<Entity> {
        match self {
            Self::Applied(entity) => Some(entity),
            _ => None,
        }
    }
}

/// Status of a drop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropStatus {
    /// The record was removed.
    Dropped,
    /// No such record.
    NotFound,
    /// The record still has children.
    NotEmpty,
}

/// Result of [`EntityStore::drop_if_exists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropResult {
    /// What happened.
    pub status: DropStatus,
    /// Deferred cleanup task registered by the drop, if any.
    pub cleanup_task_id: Option<EntityId>,
}

impl DropResult {
    /// True when the record was removed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DropStatus::Dropped
    }
}

/// Entity persistence collaborator.
#[async_trait]
pub trait EntityStore: Send + Sync + 'static {
    /// Allocates a fresh entity id.
    fn generate_id(&self) -> EntityId;

    /// Loads an entity by id.
    async fn load_by_id(&self, catalog_id: EntityId, id: EntityId) -> CatalogResult<Option<Entity>>;

    /// Looks up a child entity by name.
    async fn lookup_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        kind: EntityKind,
        name: &str,
    ) -> CatalogResult<Option<Entity>>;

    /// Creates `entity` unless its name is already taken under the parent.
    async fn create_if_absent(&self, parent_path: &[Entity], entity: Entity)
    -> CatalogResult<WriteOutcome>;

    /// Replaces the properties of `expected` if the stored version still
    /// equals `expected.entity_version`. This is the authoritative
    /// compare-and-swap primitive.
    async fn update_properties_if_unchanged(
        &self,
        parent_path: &[Entity],
        expected: Entity,
    ) -> CatalogResult<WriteOutcome>;

    /// Drops `entity` if it exists. With `purge`, a table drop registers a
    /// cleanup task carrying `cleanup_properties`.
    async fn drop_if_exists(
        &self,
        parent_path: &[Entity],
        entity: &Entity,
        cleanup_properties: Option<BTreeMap<String, String>>,
        purge: bool,
    ) -> CatalogResult<DropResult>;

    /// Moves `entity` to `renamed` (new name and/or parent).
    async fn rename(
        &self,
        parent_path: &[Entity],
        entity: &Entity,
        new_parent_path: &[Entity],
        renamed: Entity,
    ) -> CatalogResult<WriteOutcome>;

    /// Lists children of `parent_id`, optionally filtered by sub-kind.
    async fn list(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        kind: EntityKind,
        sub_kind: Option<EntitySubKind>,
    ) -> CatalogResult<Vec<Entity>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NameKey {
    catalog_id: EntityId,
    parent_id: EntityId,
    kind: EntityKind,
    name: String,
}

impl NameKey {
    fn of(entity: &Entity) -> Self {
        Self {
            catalog_id: entity.catalog_id,
            parent_id: entity.parent_id,
            kind: entity.kind,
            name: entity.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entities: HashMap<EntityId, Entity>,
    names: HashMap<NameKey, EntityId>,
}

impl StoreState {
    fn path_is_live(&self, parent_path: &[Entity]) -> bool {
        parent_path
            .iter()
            .all(|p| self.entities.contains_key(&p.id))
    }

    fn has_children(&self, entity: &Entity) -> bool {
        self.entities
            .values()
            .any(|e| e.parent_id == entity.id && e.id != entity.id && e.kind != EntityKind::Task)
    }

    fn insert(&mut self, entity: Entity) {
        self.names.insert(NameKey::of(&entity), entity.id);
        self.entities.insert(entity.id, entity);
    }
}

/// Thread-safe in-memory entity store.
///
/// Suitable for tests and single-process deployments. Not durable.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    state: RwLock<StoreState>,
    ids: EntityIdGenerator,
}

impl MemoryEntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cleanup_task(
        &self,
        dropped: &Entity,
        cleanup_properties: BTreeMap<String, String>,
    ) -> CatalogResult<Entity> {
        let data = serde_json::to_string(dropped).map_err(|e| CatalogError::Internal {
            message: format!("failed to serialize dropped entity: {e}"),
        })?;
        let id = self.ids.next_id();
        let mut task = Entity::new(EntityKind::Task, format!("table-cleanup-{}", dropped.id))
            .with_id(id)
            .with_properties(BTreeMap::from([
                (keys::TASK_TYPE.to_string(), TABLE_CLEANUP_TASK.to_string()),
                (keys::TASK_DATA.to_string(), data),
            ]));
        task.internal_properties = cleanup_properties;
        Ok(task)
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    fn generate_id(&self) -> EntityId {
        self.ids.next_id()
    }

    async fn load_by_id(&self, catalog_id: EntityId, id: EntityId) -> CatalogResult<Option<Entity>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        Ok(state
            .entities
            .get(&id)
            .filter(|e| e.catalog_id == catalog_id)
            .cloned())
    }

    async fn lookup_by_name(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        kind: EntityKind,
        name: &str,
    ) -> CatalogResult<Option<Entity>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let key = NameKey {
            catalog_id,
            parent_id,
            kind,
            name: name.to_string(),
        };
        Ok(state
            .names
            .get(&key)
            .and_then(|id| state.entities.get(id))
            .cloned())
    }

    async fn create_if_absent(
        &self,
        parent_path: &[Entity],
        mut entity: Entity,
    ) -> CatalogResult<WriteOutcome> {
        if !entity.id.is_assigned() {
            entity.id = self.ids.next_id();
        }
        if let Some(parent) = parent_path.last() {
            entity.parent_id = parent.id;
        }

        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.path_is_live(parent_path) {
            return Ok(WriteOutcome::NotFound);
        }
        if let Some(existing) = state
            .names
            .get(&NameKey::of(&entity))
            .and_then(|id| state.entities.get(id))
        {
            return Ok(WriteOutcome::AlreadyExists {
                sub_kind: existing.sub_kind,
            });
        }
        entity.entity_version = 1;
        state.insert(entity.clone());
        drop(state);

        tracing::debug!(id = %entity.id, kind = %entity.kind, name = %entity.name, "entity created");
        Ok(WriteOutcome::Applied(entity))
    }

    async fn update_properties_if_unchanged(
        &self,
        parent_path: &[Entity],
        expected: Entity,
    ) -> CatalogResult<WriteOutcome> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.path_is_live(parent_path) {
            return Ok(WriteOutcome::NotFound);
        }
        let Some(stored) = state.entities.get_mut(&expected.id) else {
            return Ok(WriteOutcome::NotFound);
        };
        if stored.entity_version != expected.entity_version {
            return Ok(WriteOutcome::VersionMismatch);
        }
        stored.properties = expected.properties;
        stored.internal_properties = expected.internal_properties;
        stored.entity_version += 1;
        Ok(WriteOutcome::Applied(stored.clone()))
    }

    async fn drop_if_exists(
        &self,
        parent_path: &[Entity],
        entity: &Entity,
        cleanup_properties: Option<BTreeMap<String, String>>,
        purge: bool,
    ) -> CatalogResult<DropResult> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        let live = state.path_is_live(parent_path);
        let Some(stored) = state.entities.get(&entity.id).filter(|_| live).cloned() else {
            return Ok(DropResult {
                status: DropStatus::NotFound,
                cleanup_task_id: None,
            });
        };
        if matches!(stored.kind, EntityKind::Namespace | EntityKind::Catalog)
            && state.has_children(&stored)
        {
            return Ok(DropResult {
                status: DropStatus::NotEmpty,
                cleanup_task_id: None,
            });
        }

        state.names.remove(&NameKey::of(&stored));
        state.entities.remove(&stored.id);

        let cleanup_task_id = if purge
            && stored.kind == EntityKind::TableLike
            && stored.sub_kind == EntitySubKind::Table
        {
            let task = self.cleanup_task(&stored, cleanup_properties.unwrap_or_default())?;
            let task_id = task.id;
            state.insert(task);
            Some(task_id)
        } else {
            None
        };
        drop(state);

        Ok(DropResult {
            status: DropStatus::Dropped,
            cleanup_task_id,
        })
    }

    async fn rename(
        &self,
        parent_path: &[Entity],
        entity: &Entity,
        new_parent_path: &[Entity],
        mut renamed: Entity,
    ) -> CatalogResult<WriteOutcome> {
        let mut state = self.state.write().map_err(|_| poisoned())?;
        if !state.path_is_live(parent_path) || !state.path_is_live(new_parent_path) {
            return Ok(WriteOutcome::NotFound);
        }
        let Some(stored) = state.entities.get(&entity.id).cloned() else {
            return Ok(WriteOutcome::NotFound);
        };
        if stored.entity_version != entity.entity_version {
            return Ok(WriteOutcome::VersionMismatch);
        }
        if let Some(parent) = new_parent_path.last() {
            renamed.parent_id = parent.id;
        }
        renamed.id = stored.id;
        renamed.catalog_id = stored.catalog_id;
        renamed.kind = stored.kind;
        renamed.sub_kind = stored.sub_kind;
        if let Some(existing) = state
            .names
            .get(&NameKey::of(&renamed))
            .and_then(|id| state.entities.get(id))
        {
            return Ok(WriteOutcome::AlreadyExists {
                sub_kind: existing.sub_kind,
            });
        }

        state.names.remove(&NameKey::of(&stored));
        renamed.entity_version = stored.entity_version + 1;
        state.insert(renamed.clone());
        Ok(WriteOutcome::Applied(renamed))
    }

    async fn list(
        &self,
        catalog_id: EntityId,
        parent_id: EntityId,
        kind: EntityKind,
        sub_kind: Option<EntitySubKind>,
    ) -> CatalogResult<Vec<Entity>> {
        let state = self.state.read().map_err(|_| poisoned())?;
        let mut entities: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| {
                e.catalog_id == catalog_id
                    && e.parent_id == parent_id
                    && e.kind == kind
                    && sub_kind.is_none_or(|s| e.sub_kind == s)
            })
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Namespace, TableIdent};

    async fn catalog(store: &MemoryEntityStore) -> Entity {
        store
            .create_if_absent(&[], Entity::new(EntityKind::Catalog, "warehouse"))
            .await
            .expect("create")
            .applied()
            .expect("applied")
    }

    fn table(catalog: &Entity, name: &str, sub_kind: EntitySubKind) -> Entity {
        Entity::table_like(
            catalog.id,
            EntityId::ROOT,
            &TableIdent::new(Namespace::empty(), name),
            sub_kind,
            format!("s3://b/{name}/metadata/00000.metadata.json"),
        )
    }

    #[tokio::test]
    async fn test_create_if_absent_reports_existing_sub_kind() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;

        let created = store
            .create_if_absent(&[cat.clone()], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create");
        assert!(matches!(created, WriteOutcome::Applied(_)));

        let again = store
            .create_if_absent(&[cat.clone()], table(&cat, "t", EntitySubKind::View))
            .await
            .expect("create");
        assert_eq!(
            again,
            WriteOutcome::AlreadyExists {
                sub_kind: EntitySubKind::Table
            }
        );
    }

    #[tokio::test]
    async fn test_update_is_version_checked() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let t = store
            .create_if_absent(&[cat.clone()], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create")
            .applied()
            .expect("applied");

        let first = store
            .update_properties_if_unchanged(&[cat.clone()], t.clone().with_metadata_location("p2"))
            .await
            .expect("update");
        let updated = first.applied().expect("applied");
        assert_eq!(updated.entity_version, t.entity_version + 1);

        let stale = store
            .update_properties_if_unchanged(&[cat.clone()], t.with_metadata_location("p3"))
            .await
            .expect("update");
        assert_eq!(stale, WriteOutcome::VersionMismatch);

        let stored = store
            .load_by_id(cat.id, updated.id)
            .await
            .expect("load")
            .expect("present");
        assert_eq!(stored.metadata_location(), Some("p2"));
    }

    #[tokio::test]
    async fn test_purge_drop_registers_cleanup_task() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let t = store
            .create_if_absent(&[cat.clone()], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create")
            .applied()
            .expect("applied");

        let props = BTreeMap::from([(keys::STORAGE_LOCATION.to_string(), "s3://b/t".to_string())]);
        let result = store
            .drop_if_exists(&[cat.clone()], &t, Some(props), true)
            .await
            .expect("drop");
        assert!(result.is_success());
        let task_id = result.cleanup_task_id.expect("task registered");

        let task = store
            .load_by_id(EntityId::ROOT, task_id)
            .await
            .expect("load")
            .expect("task present");
        assert_eq!(task.kind, EntityKind::Task);
        assert_eq!(
            task.properties.get(keys::TASK_TYPE).map(String::as_str),
            Some(TABLE_CLEANUP_TASK)
        );
        assert_eq!(
            task.internal_properties.get(keys::STORAGE_LOCATION).map(String::as_str),
            Some("s3://b/t")
        );
    }

    #[tokio::test]
    async fn test_drop_without_purge_and_missing() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let v = store
            .create_if_absent(&[cat.clone()], table(&cat, "v", EntitySubKind::View))
            .await
            .expect("create")
            .applied()
            .expect("applied");

        let result = store
            .drop_if_exists(&[cat.clone()], &v, None, false)
            .await
            .expect("drop");
        assert_eq!(result.cleanup_task_id, None);

        let again = store
            .drop_if_exists(&[cat.clone()], &v, None, false)
            .await
            .expect("drop");
        assert_eq!(again.status, DropStatus::NotFound);
    }

    #[tokio::test]
    async fn test_namespace_with_children_is_not_dropped() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let ns = store
            .create_if_absent(
                &[cat.clone()],
                Entity::namespace(cat.id, EntityId::ROOT, &Namespace::of(["a"])),
            )
            .await
            .expect("create")
            .applied()
            .expect("applied");
        store
            .create_if_absent(&[cat.clone(), ns.clone()], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create");

        let result = store
            .drop_if_exists(&[cat.clone()], &ns, None, false)
            .await
            .expect("drop");
        assert_eq!(result.status, DropStatus::NotEmpty);
    }

    #[tokio::test]
    async fn test_create_under_dropped_parent_fails() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let ns = store
            .create_if_absent(
                &[cat.clone()],
                Entity::namespace(cat.id, EntityId::ROOT, &Namespace::of(["a"])),
            )
            .await
            .expect("create")
            .applied()
            .expect("applied");
        store
            .drop_if_exists(&[cat.clone()], &ns, None, false)
            .await
            .expect("drop");

        let outcome = store
            .create_if_absent(&[cat.clone(), ns], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create");
        assert_eq!(outcome, WriteOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_rename_and_list() {
        let store = MemoryEntityStore::new();
        let cat = catalog(&store).await;
        let t = store
            .create_if_absent(&[cat.clone()], table(&cat, "t", EntitySubKind::Table))
            .await
            .expect("create")
            .applied()
            .expect("applied");
        store
            .create_if_absent(&[cat.clone()], table(&cat, "v", EntitySubKind::View))
            .await
            .expect("create");

        let mut renamed = t.clone();
        renamed.name = "v".to_string();
        let clash = store
            .rename(&[cat.clone()], &t, &[cat.clone()], renamed)
            .await
            .expect("rename");
        assert_eq!(
            clash,
            WriteOutcome::AlreadyExists {
                sub_kind: EntitySubKind::View
            }
        );

        let mut renamed = t.clone();
        renamed.name = "u".to_string();
        store
            .rename(&[cat.clone()], &t, &[cat.clone()], renamed)
            .await
            .expect("rename")
            .applied()
            .expect("applied");

        let tables = store
            .list(cat.id, cat.id, EntityKind::TableLike, Some(EntitySubKind::Table))
            .await
            .expect("list");
        let names: Vec<_> = tables.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["u"]);
    }
}
