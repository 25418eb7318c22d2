//! Catalog session: namespace, table and view operations for one catalog.
//!
//! A [`CatalogSession`] binds the shared [`CatalogServices`] to one catalog
//! and one caller context. Table and view reads and writes go through
//! [`MetadataOperations`]; this module adds naming, default locations,
//! namespace management and the purge path that schedules cleanup tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use strata_core::entity::keys;
use strata_core::observability::catalog_span;
use strata_core::{CallContext, Entity, EntityKind, Namespace, TableIdent};
use tracing::Instrument;

use crate::credentials::{CredentialMap, CredentialScope, StorageAction};
use crate::error::{CatalogError, CatalogResult};
use crate::fileio::{IO_IMPL, merge_properties};
use crate::metadata::{MetadataObject, TableLikeKind};
use crate::operations::{MetadataOperations, MetadataSnapshot, credentials_for, validate_location};
use crate::persistence::{DropStatus, WriteOutcome};
use crate::resolver::{ResolutionMode, ResolvedPath};
use crate::state::CatalogServices;
use crate::tasks::TaskHandle;

/// Catalog property naming the default base location.
pub const DEFAULT_BASE_LOCATION: &str = "default-base-location";
/// Catalog property naming the warehouse root, used when no base is set.
pub const WAREHOUSE: &str = "warehouse";

/// Result of dropping a table or view.
#[derive(Debug)]
pub struct DropOutcome {
    /// Whether a record was removed.
    pub dropped: bool,
    /// Cleanup scheduled by a purge, if any.
    pub cleanup: Option<TaskHandle>,
}

/// Operations on one catalog on behalf of one caller.
#[derive(Debug)]
pub struct CatalogSession {
    services: Arc<CatalogServices>,
    catalog: Entity,
    ctx: CallContext,
    properties: BTreeMap<String, String>,
    default_base_location: Option<String>,
}

impl CatalogSession {
    /// Opens a session on `catalog` with client `properties`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the catalog does not exist
    /// - `Validation` when `properties` sets `io-impl` and that is not allowed
    pub async fn initialize(
        services: Arc<CatalogServices>,
        catalog: &str,
        ctx: CallContext,
        properties: BTreeMap<String, String>,
    ) -> CatalogResult<Self> {
        let path = services
            .resolver
            .resolve_catalog(catalog)
            .await?
            .ok_or_else(|| CatalogError::entity_not_found(format!("catalog {catalog}")))?;
        let catalog_entity = leaf(&path)?.clone();

        if properties.contains_key(IO_IMPL) && !services.config.allow_specifying_file_io_impl {
            return Err(CatalogError::Validation {
                message: format!(
                    "Cannot set property '{IO_IMPL}' in catalog {catalog}; \
                     specifying the storage client implementation is disabled"
                ),
            });
        }

        let default_base_location = catalog_entity
            .properties
            .get(keys::DEFAULT_BASE_LOCATION)
            .or_else(|| properties.get(DEFAULT_BASE_LOCATION))
            .or_else(|| properties.get(WAREHOUSE))
            .map(|base| base.trim_end_matches('/').to_string());

        tracing::debug!(
            catalog,
            realm = %ctx.realm,
            base = ?default_base_location,
            "catalog session initialized"
        );
        Ok(Self {
            services,
            catalog: catalog_entity,
            ctx,
            properties,
            default_base_location,
        })
    }

    /// Catalog name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.catalog.name
    }

    /// Caller context.
    #[must_use]
    pub const fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Client properties the session was opened with.
    #[must_use]
    pub const fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Default base location, without a trailing slash.
    #[must_use]
    pub fn default_base_location(&self) -> Option<&str> {
        self.default_base_location.as_deref()
    }

    /// Fresh refresh/commit state for `ident`.
    #[must_use]
    pub fn operations(&self, ident: TableIdent, kind: TableLikeKind) -> MetadataOperations {
        MetadataOperations::new(
            Arc::clone(&self.services),
            self.catalog.name.clone(),
            self.properties.clone(),
            ident,
            kind,
        )
    }

    fn span(&self, operation: &str) -> tracing::Span {
        catalog_span(operation, self.ctx.realm.as_str(), &self.catalog.name)
    }

    // Namespaces

    /// Creates `namespace` with `properties`.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` for the root or an existing namespace
    /// - `NotFound` when the parent namespace does not exist
    pub async fn create_namespace(
        &self,
        namespace: &Namespace,
        properties: BTreeMap<String, String>,
    ) -> CatalogResult<Entity> {
        if namespace.is_empty() {
            return Err(CatalogError::namespace_already_exists(namespace));
        }
        let parent = namespace.parent();
        let parent_path = self
            .resolve_namespace(&parent, ResolutionMode::Static)
            .await?
            .ok_or_else(|| CatalogError::namespace_not_found(&parent))?;

        let entity = Entity::namespace(self.catalog.id, self.services.store.generate_id(), namespace)
            .with_properties(properties);
        match self
            .services
            .store
            .create_if_absent(parent_path.entities(), entity)
            .await?
        {
            WriteOutcome::Applied(created) => {
                tracing::info!(%namespace, id = %created.id, "created namespace");
                Ok(created)
            }
            WriteOutcome::AlreadyExists { .. } => {
                Err(CatalogError::namespace_already_exists(namespace))
            }
            WriteOutcome::NotFound | WriteOutcome::VersionMismatch => {
                Err(CatalogError::namespace_not_found(&parent))
            }
        }
    }

    /// True if `namespace` exists. The root always exists.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub async fn namespace_exists(&self, namespace: &Namespace) -> CatalogResult<bool> {
        Ok(self
            .resolve_namespace(namespace, ResolutionMode::Static)
            .await?
            .is_some())
    }

    /// Properties of `namespace`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the namespace does not exist
    /// - `IllegalState` when the stored parent does not match
    pub async fn load_namespace_metadata(
        &self,
        namespace: &Namespace,
    ) -> CatalogResult<BTreeMap<String, String>> {
        let path = self.require_namespace(namespace).await?;
        let entity = leaf(&path)?;
        if !namespace.is_empty() && entity.parent_namespace() != namespace.parent() {
            tracing::error!(
                requested = %namespace,
                stored_parent = %entity.parent_namespace(),
                "stored namespace parent does not match"
            );
            return Err(CatalogError::IllegalState {
                message: format!("namespace {namespace} resolved to an entity with a different parent"),
            });
        }
        Ok(entity.properties.clone())
    }

    /// Merges `properties` into the properties of `namespace`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the namespace does not exist
    /// - `Conflict` when it changed concurrently
    pub async fn set_namespace_properties(
        &self,
        namespace: &Namespace,
        properties: BTreeMap<String, String>,
    ) -> CatalogResult<bool> {
        self.update_namespace_properties(namespace, |current| current.extend(properties))
            .await
    }

    /// Removes `keys` from the properties of `namespace`.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the namespace does not exist
    /// - `Conflict` when it changed concurrently
    pub async fn remove_namespace_properties(
        &self,
        namespace: &Namespace,
        keys: &BTreeSet<String>,
    ) -> CatalogResult<bool> {
        self.update_namespace_properties(namespace, |current| {
            current.retain(|k, _| !keys.contains(k));
        })
        .await
    }

    async fn update_namespace_properties(
        &self,
        namespace: &Namespace,
        apply: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> CatalogResult<bool> {
        if namespace.is_empty() {
            return Err(CatalogError::BadRequest {
                message: "cannot update properties of the root namespace".into(),
            });
        }
        let path = self.require_namespace(namespace).await?;
        let mut updated = leaf(&path)?.clone();
        apply(&mut updated.properties);

        match self
            .services
            .store
            .update_properties_if_unchanged(path.parent_path(), updated)
            .await?
        {
            WriteOutcome::Applied(_) => Ok(true),
            WriteOutcome::NotFound => Err(CatalogError::namespace_not_found(namespace)),
            WriteOutcome::VersionMismatch | WriteOutcome::AlreadyExists { .. } => {
                Err(CatalogError::concurrent_modification(format!("namespace {namespace}")))
            }
        }
    }

    /// Drops an empty namespace. Returns false if it was already gone.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the namespace does not exist
    /// - `NamespaceNotEmpty` when it still has children
    pub async fn drop_namespace(&self, namespace: &Namespace) -> CatalogResult<bool> {
        if namespace.is_empty() {
            return Err(CatalogError::BadRequest {
                message: "cannot drop the root namespace".into(),
            });
        }
        let path = self.require_namespace(namespace).await?;
        let result = self
            .services
            .store
            .drop_if_exists(
                path.parent_path(),
                leaf(&path)?,
                None,
                self.services.config.cleanup_on_namespace_drop,
            )
            .await?;
        match result.status {
            DropStatus::Dropped => {
                tracing::info!(%namespace, "dropped namespace");
                Ok(true)
            }
            DropStatus::NotFound => Ok(false),
            DropStatus::NotEmpty => Err(CatalogError::NamespaceNotEmpty {
                namespace: namespace.to_string(),
            }),
        }
    }

    /// Direct children of `parent`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when `parent` does not exist.
    pub async fn list_namespaces(&self, parent: &Namespace) -> CatalogResult<Vec<Namespace>> {
        let path = self.require_namespace(parent).await?;
        let children = self
            .services
            .store
            .list(self.catalog.id, leaf(&path)?.id, EntityKind::Namespace, None)
            .await?;
        Ok(children.iter().map(Entity::as_namespace).collect())
    }

    // Tables and views

    /// Creates a table or view from `metadata`.
    ///
    /// An empty location is replaced by the default warehouse location; a
    /// location under the catalog's replace prefix is rewritten.
    ///
    /// # Errors
    ///
    /// See [`MetadataOperations::commit`].
    pub async fn create_table_like(
        &self,
        ident: &TableIdent,
        mut metadata: MetadataObject,
    ) -> CatalogResult<MetadataSnapshot> {
        let location = if metadata.location().is_empty() {
            self.default_warehouse_location(ident)?
        } else {
            self.transform_location(metadata.location())
        };
        metadata.set_location(location);

        let mut ops = self.operations(ident.clone(), metadata.kind());
        ops.commit(None, metadata)
            .instrument(self.span("create"))
            .await
    }

    /// Loads the current metadata of a table or view.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no such object exists, plus refresh errors.
    pub async fn load_table_like(
        &self,
        ident: &TableIdent,
        kind: TableLikeKind,
    ) -> CatalogResult<MetadataSnapshot> {
        let mut ops = self.operations(ident.clone(), kind);
        ops.refresh()
            .instrument(self.span("load"))
            .await?
            .ok_or_else(|| kind.not_found(ident))
    }

    /// Commits `proposed` on top of `base`.
    ///
    /// # Errors
    ///
    /// See [`MetadataOperations::commit`].
    pub async fn commit_table_like(
        &self,
        ident: &TableIdent,
        base: &MetadataSnapshot,
        proposed: MetadataObject,
    ) -> CatalogResult<MetadataSnapshot> {
        let mut ops = self.operations(ident.clone(), proposed.kind());
        ops.commit(Some(base), proposed)
            .instrument(self.span("commit"))
            .await
    }

    /// Drops a table. With `purge`, schedules deletion of its files.
    ///
    /// # Errors
    ///
    /// Propagates resolution, credential and persistence errors.
    pub async fn drop_table(&self, ident: &TableIdent, purge: bool) -> CatalogResult<DropOutcome> {
        self.drop_table_like(ident, TableLikeKind::Table, purge)
            .instrument(self.span("drop_table"))
            .await
    }

    /// Drops a view. Views never have files purged.
    ///
    /// # Errors
    ///
    /// Propagates resolution and persistence errors.
    pub async fn drop_view(&self, ident: &TableIdent) -> CatalogResult<bool> {
        let outcome = self
            .drop_table_like(ident, TableLikeKind::View, false)
            .instrument(self.span("drop_view"))
            .await?;
        Ok(outcome.dropped)
    }

    async fn drop_table_like(
        &self,
        ident: &TableIdent,
        kind: TableLikeKind,
        purge: bool,
    ) -> CatalogResult<DropOutcome> {
        let Some(path) = self
            .services
            .resolver
            .resolve_table_like(&self.catalog.name, ident, Some(kind.sub_kind()), ResolutionMode::Static)
            .await?
        else {
            return Ok(DropOutcome {
                dropped: false,
                cleanup: None,
            });
        };
        let entity = leaf(&path)?;

        let cleanup_properties = if purge {
            self.cleanup_properties(ident, kind, &path).await?
        } else {
            None
        };
        let result = self
            .services
            .store
            .drop_if_exists(path.parent_path(), entity, cleanup_properties, purge)
            .await?;
        if result.status != DropStatus::Dropped {
            return Ok(DropOutcome {
                dropped: false,
                cleanup: None,
            });
        }
        tracing::info!(%ident, kind = kind.as_str(), purge, "dropped table-like entity");

        let cleanup = result.cleanup_task_id.map(|task_id| {
            tracing::info!(%ident, %task_id, "scheduled table cleanup task");
            self.services.tasks.dispatch(task_id, &self.ctx)
        });
        Ok(DropOutcome {
            dropped: true,
            cleanup,
        })
    }

    /// Properties handed to the cleanup task of a purged table: storage
    /// configuration, client properties with credentials, and the table root.
    async fn cleanup_properties(
        &self,
        ident: &TableIdent,
        kind: TableLikeKind,
        path: &ResolvedPath,
    ) -> CatalogResult<Option<BTreeMap<String, String>>> {
        let mut ops = self.operations(ident.clone(), kind);
        let Some(snapshot) = ops.refresh().await? else {
            return Ok(None);
        };
        let location = snapshot.metadata.location();
        let credentials = credentials_for(
            &self.services,
            path,
            &CredentialScope::for_actions(
                &BTreeSet::from([StorageAction::Read, StorageAction::Write, StorageAction::Delete]),
                location,
            ),
        )
        .await?;

        let mut properties = BTreeMap::new();
        if let Some(json) = path
            .storage_config_holder()
            .and_then(Entity::storage_config_json)
        {
            properties.insert(keys::STORAGE_CONFIGURATION_INFO.to_string(), json.to_string());
        }
        properties.extend(merge_properties(
            &merge_properties(&self.properties, snapshot.metadata.properties()),
            &credentials,
        ));
        properties.insert(keys::STORAGE_LOCATION.to_string(), location.to_string());
        Ok(Some(properties))
    }

    /// Renames a table or view, possibly into another namespace.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the source or the target namespace is missing
    /// - `AlreadyExists` when the target name is taken by either kind
    pub async fn rename_table_like(
        &self,
        from: &TableIdent,
        to: &TableIdent,
        kind: TableLikeKind,
    ) -> CatalogResult<()> {
        if from == to {
            return Ok(());
        }
        let resolver = &self.services.resolver;
        let source = resolver
            .resolve_table_like(&self.catalog.name, from, Some(kind.sub_kind()), ResolutionMode::Static)
            .await?
            .ok_or_else(|| kind.not_found(from))?;
        let target_namespace = self
            .resolve_namespace(&to.namespace, ResolutionMode::Static)
            .await?
            .ok_or_else(|| CatalogError::namespace_not_found(&to.namespace))?;
        if let Some(existing) = resolver
            .resolve_table_like(&self.catalog.name, to, None, ResolutionMode::Static)
            .await?
        {
            return Err(already_exists(leaf(&existing)?, to));
        }

        let entity = leaf(&source)?;
        let mut renamed = entity.clone();
        renamed.name.clone_from(&to.name);
        renamed
            .internal_properties
            .insert(keys::PARENT_NAMESPACE.to_string(), to.namespace.encode());

        match self
            .services
            .store
            .rename(source.parent_path(), entity, target_namespace.entities(), renamed)
            .await?
        {
            WriteOutcome::Applied(_) => {
                tracing::info!(%from, %to, kind = kind.as_str(), "renamed table-like entity");
                Ok(())
            }
            WriteOutcome::AlreadyExists { sub_kind } => Err(
                TableLikeKind::from_sub_kind(sub_kind)
                    .unwrap_or(kind)
                    .already_exists(to),
            ),
            WriteOutcome::NotFound => Err(kind.not_found(from)),
            WriteOutcome::VersionMismatch => {
                Err(CatalogError::concurrent_modification(format!("{} {from}", kind.as_str())))
            }
        }
    }

    /// Tables or views directly in `namespace`, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the namespace does not exist.
    pub async fn list_table_likes(
        &self,
        namespace: &Namespace,
        kind: TableLikeKind,
    ) -> CatalogResult<Vec<TableIdent>> {
        let path = self.require_namespace(namespace).await?;
        let entities = self
            .services
            .store
            .list(
                self.catalog.id,
                leaf(&path)?.id,
                EntityKind::TableLike,
                Some(kind.sub_kind()),
            )
            .await?;
        Ok(entities
            .into_iter()
            .map(|e| TableIdent::new(namespace.clone(), e.name))
            .collect())
    }

    // Locations and credentials

    /// Location used for a new object created without one:
    /// `<base>/<namespace levels>/<name>`.
    ///
    /// # Errors
    ///
    /// Returns `BadRequest` when the catalog has no default base location.
    pub fn default_warehouse_location(&self, ident: &TableIdent) -> CatalogResult<String> {
        let base = self
            .default_base_location
            .as_deref()
            .ok_or_else(|| CatalogError::BadRequest {
                message: format!("catalog {} has no default base location", self.catalog.name),
            })?;
        Ok(format!("{base}/{}", ident.path().join("/")))
    }

    /// Rewrites `location` onto the default base when it starts with the
    /// catalog's replace prefix.
    #[must_use]
    pub fn transform_location(&self, location: &str) -> String {
        let prefix = self
            .catalog
            .properties
            .get(keys::REPLACE_NEW_LOCATION_PREFIX)
            .or_else(|| self.catalog.internal_properties.get(keys::REPLACE_NEW_LOCATION_PREFIX));
        match (prefix, self.default_base_location.as_deref()) {
            (Some(prefix), Some(base)) if !prefix.is_empty() => location
                .strip_prefix(prefix.as_str())
                .map_or_else(|| location.to_string(), |rest| format!("{base}{rest}")),
            _ => location.to_string(),
        }
    }

    /// Scoped credentials for `actions` on `location` of table-like `ident`.
    ///
    /// Returns an empty map when no storage configuration exists in the
    /// hierarchy.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the object does not exist
    /// - `Forbidden` when the location is outside the storage boundary
    /// - `Unprocessable` when issuance fails
    pub async fn credential_config(
        &self,
        ident: &TableIdent,
        location: &str,
        actions: &BTreeSet<StorageAction>,
    ) -> CatalogResult<CredentialMap> {
        let path = self
            .services
            .resolver
            .resolve_table_like(&self.catalog.name, ident, None, ResolutionMode::Static)
            .await?
            .ok_or_else(|| CatalogError::table_not_found(ident))?;
        if path.storage_config_holder().is_none() {
            tracing::warn!(%ident, "no storage configuration in hierarchy; returning no credentials");
            return Ok(CredentialMap::new());
        }
        validate_location(&path, ident, location)?;
        credentials_for(
            &self.services,
            &path,
            &CredentialScope::for_actions(actions, location),
        )
        .await
    }

    pub(crate) async fn resolve_namespace(
        &self,
        namespace: &Namespace,
        mode: ResolutionMode,
    ) -> CatalogResult<Option<ResolvedPath>> {
        self.services
            .resolver
            .resolve_namespace(&self.catalog.name, namespace, mode)
            .await
    }

    async fn require_namespace(&self, namespace: &Namespace) -> CatalogResult<ResolvedPath> {
        self.resolve_namespace(namespace, ResolutionMode::Static)
            .await?
            .ok_or_else(|| CatalogError::namespace_not_found(namespace))
    }

    pub(crate) fn services(&self) -> &CatalogServices {
        &self.services
    }

    pub(crate) fn catalog_entity(&self) -> &Entity {
        &self.catalog
    }
}

pub(crate) fn leaf(path: &ResolvedPath) -> CatalogResult<&Entity> {
    path.leaf().ok_or_else(|| CatalogError::IllegalState {
        message: "resolved path is empty".into(),
    })
}

fn already_exists(existing: &Entity, ident: &TableIdent) -> CatalogError {
    TableLikeKind::from_sub_kind(existing.sub_kind)
        .map_or_else(|| CatalogError::table_already_exists(ident), |k| k.already_exists(ident))
}
