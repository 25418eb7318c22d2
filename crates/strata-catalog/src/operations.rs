//! Refresh and commit of table and view metadata pointers.
//!
//! A [`MetadataOperations`] instance covers one logical operation on one
//! identifier:
//!
//! ```text
//! New -> (Refreshing -> Refreshed)* -> Committing -> {Committed | Conflict | Failed}
//! ```
//!
//! Commit gives the metadata pointer compare-and-swap semantics. The
//! in-process comparison of the observed pointer against the stored one only
//! picks the error category; correctness rests on the store's version-checked
//! update, which is the last step of every successful commit.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use strata_core::storage_config::validate_unconfigured_location;
use strata_core::{Entity, StorageConfigInfo, TableIdent, WritePrecondition, WriteResult};

use crate::credentials::{CredentialMap, CredentialScope};
use crate::error::{CatalogError, CatalogResult};
use crate::fileio::{StorageLease, merge_properties};
use crate::metadata::{MetadataObject, TableLikeKind, metadata_dir, new_metadata_location};
use crate::metrics;
use crate::persistence::WriteOutcome;
use crate::resolver::{ResolutionMode, ResolvedPath};
use crate::retry::{Backoff, retry_read};
use crate::state::CatalogServices;

/// Table property overriding where data files are written.
pub const WRITE_DATA_PATH: &str = "write.data.path";
/// Table property overriding where metadata files are written.
pub const WRITE_METADATA_PATH: &str = "write.metadata.path";

/// Lifecycle of one metadata operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Nothing done yet.
    New,
    /// A refresh is running.
    Refreshing,
    /// The last refresh completed.
    Refreshed,
    /// A commit is running.
    Committing,
    /// The commit installed a new pointer.
    Committed,
    /// The commit lost a compare-and-swap race.
    Conflict,
    /// The operation failed for another reason.
    Failed,
}

/// A metadata document together with the pointer it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSnapshot {
    /// Location of the metadata file.
    pub pointer: String,
    /// Parsed document.
    pub metadata: MetadataObject,
}

/// Refresh/commit state for one table or view identifier.
pub struct MetadataOperations {
    services: Arc<CatalogServices>,
    catalog: String,
    catalog_properties: BTreeMap<String, String>,
    ident: TableIdent,
    kind: TableLikeKind,
    current: Option<MetadataSnapshot>,
    refresh_disabled: bool,
    state: OperationState,
}

impl fmt::Debug for MetadataOperations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataOperations")
            .field("catalog", &self.catalog)
            .field("ident", &self.ident)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl MetadataOperations {
    /// Creates operations for `ident` in `catalog`. `catalog_properties` are
    /// the storage client defaults credentials are layered over.
    #[must_use]
    pub fn new(
        services: Arc<CatalogServices>,
        catalog: impl Into<String>,
        catalog_properties: BTreeMap<String, String>,
        ident: TableIdent,
        kind: TableLikeKind,
    ) -> Self {
        Self {
            services,
            catalog: catalog.into(),
            catalog_properties,
            ident,
            kind,
            current: None,
            refresh_disabled: false,
            state: OperationState::New,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> OperationState {
        self.state
    }

    /// Snapshot seen by the last refresh or installed by the last commit.
    #[must_use]
    pub fn current(&self) -> Option<&MetadataSnapshot> {
        self.current.as_ref()
    }

    /// Reads the current pointer and metadata document.
    ///
    /// Once a refresh finds no pointer, later refreshes on this instance
    /// return without reading.
    ///
    /// # Errors
    ///
    /// Returns resolution, credential and read errors. Transient read
    /// failures are retried first.
    pub async fn refresh(&mut self) -> CatalogResult<Option<MetadataSnapshot>> {
        if self.refresh_disabled {
            return Ok(self.current.clone());
        }
        self.state = OperationState::Refreshing;
        let result = self.do_refresh().await;
        self.state = if result.is_ok() {
            OperationState::Refreshed
        } else {
            OperationState::Failed
        };
        result
    }

    async fn do_refresh(&mut self) -> CatalogResult<Option<MetadataSnapshot>> {
        let resolved = self
            .services
            .resolver
            .resolve_table_like(
                &self.catalog,
                &self.ident,
                Some(self.kind.sub_kind()),
                ResolutionMode::Passthrough,
            )
            .await?;
        let Some((path, pointer)) = resolved.and_then(|path| {
            let pointer = path.leaf()?.metadata_location()?.to_string();
            Some((path, pointer))
        }) else {
            self.refresh_disabled = true;
            self.current = None;
            return Ok(None);
        };

        if let Some(leaf) = path.leaf() {
            if leaf.name != self.ident.name {
                tracing::error!(
                    requested = %self.ident,
                    stored = %leaf.table_ident(),
                    "stored identifier does not match requested identifier"
                );
                return Err(CatalogError::IllegalState {
                    message: format!("resolved entity {} for identifier {}", leaf.name, self.ident),
                });
            }
        }

        let dir = metadata_dir(&pointer).to_string();
        tracing::debug!(ident = %self.ident, location = %pointer, "refreshing metadata");
        let credentials =
            credentials_for(&self.services, &path, &CredentialScope::read_only(&dir)).await?;
        let lease = StorageLease::open(
            self.services.storage.as_ref(),
            &self.catalog_properties,
            &credentials,
        )?;

        let config = &self.services.config;
        let backoff = Backoff {
            base: config.refresh_backoff_base,
            max: config.refresh_backoff_max,
        };
        let kind = self.kind;
        let client = &lease;
        let location = pointer.as_str();
        let metadata = retry_read(config.refresh_max_attempts, backoff, move |_| async move {
            let bytes = client.get(location).await?;
            MetadataObject::parse(kind, &bytes)
        })
        .await?;
        drop(lease);

        let snapshot = MetadataSnapshot { pointer, metadata };
        self.current = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Writes `proposed` and swaps the pointer from `base` to the new file.
    ///
    /// `base` is the snapshot observed by the caller's last refresh, or
    /// `None` when creating.
    ///
    /// # Errors
    ///
    /// - `NotFound` when the namespace (create) or the object (update) is gone
    /// - `Forbidden` when the location is outside the storage boundary
    /// - `AlreadyExists` when the name is taken, by either kind
    /// - `Conflict` when the pointer moved since `base` was read
    pub async fn commit(
        &mut self,
        base: Option<&MetadataSnapshot>,
        proposed: MetadataObject,
    ) -> CatalogResult<MetadataSnapshot> {
        self.state = OperationState::Committing;
        let result = self.do_commit(base, proposed).await;
        self.state = match &result {
            Ok(_) => OperationState::Committed,
            Err(CatalogError::Conflict { .. }) => OperationState::Conflict,
            Err(_) => OperationState::Failed,
        };
        result
    }

    async fn do_commit(
        &mut self,
        base: Option<&MetadataSnapshot>,
        proposed: MetadataObject,
    ) -> CatalogResult<MetadataSnapshot> {
        let services = Arc::clone(&self.services);
        let ident = self.ident.clone();
        let kind = self.kind;

        let namespace_path = services
            .resolver
            .resolve_namespace(&self.catalog, &ident.namespace, ResolutionMode::Passthrough)
            .await?;
        let Some(namespace_path) = namespace_path else {
            return Err(match base {
                None => CatalogError::namespace_not_found(&ident.namespace),
                Some(_) => kind.not_found(&ident),
            });
        };
        let existing_path = services
            .resolver
            .resolve_table_like(
                &self.catalog,
                &ident,
                Some(kind.sub_kind()),
                ResolutionMode::Passthrough,
            )
            .await?;
        let storage_path = existing_path.as_ref().unwrap_or(&namespace_path);

        if base.is_none_or(|b| b.metadata.location() != proposed.location()) {
            validate_location(storage_path, &ident, proposed.location())?;
            for key in [WRITE_DATA_PATH, WRITE_METADATA_PATH] {
                if let Some(location) = proposed.properties().get(key) {
                    validate_location(storage_path, &ident, location)?;
                }
            }
        }

        let opposite = services
            .resolver
            .resolve_table_like(
                &self.catalog,
                &ident,
                Some(kind.opposite().sub_kind()),
                ResolutionMode::Passthrough,
            )
            .await?;
        if opposite.is_some() {
            return Err(kind.opposite().already_exists(&ident));
        }

        let credentials = credentials_for(
            &services,
            storage_path,
            &CredentialScope::read_write(proposed.location()),
        )
        .await?;
        let client_properties = merge_properties(&self.catalog_properties, proposed.properties());
        let lease = StorageLease::open(services.storage.as_ref(), &client_properties, &credentials)?;

        let new_pointer =
            new_metadata_location(proposed.location(), base.map(|b| b.pointer.as_str()));
        let written = lease
            .put(
                &new_pointer,
                Bytes::from(proposed.to_json()?),
                WritePrecondition::DoesNotExist,
            )
            .await?;
        if let WriteResult::PreconditionFailed { .. } = written {
            return Err(CatalogError::IllegalState {
                message: format!("metadata file {new_pointer} already exists"),
            });
        }

        let swapped = self
            .swap_pointer(&namespace_path, base.map(|b| b.pointer.as_str()), &new_pointer)
            .await;
        if swapped.is_err() {
            if let Err(e) = lease.delete(&new_pointer).await {
                tracing::warn!(location = %new_pointer, error = %e, "failed to remove orphaned metadata file");
            }
        }
        drop(lease);
        swapped?;

        let snapshot = MetadataSnapshot {
            pointer: new_pointer,
            metadata: proposed,
        };
        self.current = Some(snapshot.clone());
        Ok(snapshot)
    }

    async fn swap_pointer(
        &self,
        namespace_path: &ResolvedPath,
        base: Option<&str>,
        new_pointer: &str,
    ) -> CatalogResult<()> {
        let services = &self.services;
        let ident = &self.ident;
        let kind = self.kind;

        let existing = services
            .resolver
            .resolve_table_like(
                &self.catalog,
                ident,
                Some(kind.sub_kind()),
                ResolutionMode::Passthrough,
            )
            .await?;
        let existing_entity = existing.as_ref().and_then(ResolvedPath::leaf);
        let existing_pointer = existing_entity.and_then(Entity::metadata_location);

        match (base, existing_entity) {
            (None, None) => {
                let catalog_id = namespace_path
                    .catalog()
                    .map(|c| c.id)
                    .ok_or_else(|| CatalogError::IllegalState {
                        message: format!("resolved path for {ident} has no catalog"),
                    })?;
                let entity = Entity::table_like(
                    catalog_id,
                    services.store.generate_id(),
                    ident,
                    kind.sub_kind(),
                    new_pointer,
                );
                match services
                    .store
                    .create_if_absent(namespace_path.entities(), entity)
                    .await?
                {
                    WriteOutcome::Applied(created) => {
                        tracing::info!(%ident, id = %created.id, kind = kind.as_str(), "created table-like entity");
                        Ok(())
                    }
                    WriteOutcome::AlreadyExists { sub_kind } => {
                        Err(if sub_kind == kind.sub_kind() {
                            kind.already_exists(ident)
                        } else {
                            kind.opposite().already_exists(ident)
                        })
                    }
                    WriteOutcome::NotFound | WriteOutcome::VersionMismatch => {
                        Err(CatalogError::namespace_not_found(&ident.namespace))
                    }
                }
            }
            (None, Some(_)) => Err(kind.already_exists(ident)),
            (Some(_), None) => Err(kind.not_found(ident)),
            (Some(base), Some(entity)) => {
                if existing_pointer != Some(base) {
                    metrics::record_commit_conflict(kind.as_str());
                    return Err(CatalogError::commit_conflict(
                        kind.as_str(),
                        ident,
                        Some(base),
                        new_pointer,
                        existing_pointer,
                    ));
                }
                let parent_path = existing
                    .as_ref()
                    .map_or(namespace_path.entities(), ResolvedPath::parent_path);
                let expected = entity.clone().with_metadata_location(new_pointer);
                match services
                    .store
                    .update_properties_if_unchanged(parent_path, expected)
                    .await?
                {
                    WriteOutcome::Applied(_) => Ok(()),
                    WriteOutcome::VersionMismatch | WriteOutcome::AlreadyExists { .. } => {
                        metrics::record_commit_conflict(kind.as_str());
                        let actual = services
                            .store
                            .load_by_id(entity.catalog_id, entity.id)
                            .await?
                            .and_then(|e| e.metadata_location().map(str::to_string));
                        Err(CatalogError::commit_conflict(
                            kind.as_str(),
                            ident,
                            Some(base),
                            new_pointer,
                            actual.as_deref(),
                        ))
                    }
                    WriteOutcome::NotFound => Err(kind.not_found(ident)),
                }
            }
        }
    }
}

/// Checks `location` against the storage configuration nearest to the leaf
/// of `path`.
///
/// # Errors
///
/// Returns [`CatalogError::Forbidden`] when the location is not allowed, and
/// [`CatalogError::Internal`] when the stored configuration is unreadable.
pub fn validate_location(
    path: &ResolvedPath,
    ident: &dyn fmt::Display,
    location: &str,
) -> CatalogResult<()> {
    let result = match path.storage_config_holder().and_then(Entity::storage_config_json) {
        None => validate_unconfigured_location(location),
        Some(json) => {
            let config = StorageConfigInfo::from_json(json).map_err(|e| CatalogError::Internal {
                message: format!("unreadable storage configuration: {e}"),
            })?;
            config.validate_location(location)
        }
    };
    result.map_err(|e| {
        let reason = match e {
            strata_core::Error::InvalidInput(reason) => reason,
            other => other.to_string(),
        };
        CatalogError::invalid_location(location, ident, &reason)
    })
}

/// Scoped credentials from the storage configuration nearest to the leaf of
/// `path`. Without a configuration no credentials are issued.
///
/// # Errors
///
/// Propagates credential cache errors.
pub async fn credentials_for(
    services: &CatalogServices,
    path: &ResolvedPath,
    scope: &CredentialScope,
) -> CatalogResult<CredentialMap> {
    let Some(holder) = path.storage_config_holder() else {
        tracing::warn!(
            entity = ?path.leaf().map(|e| e.name.as_str()),
            "no storage configuration in hierarchy; using catalog defaults"
        );
        return Ok(CredentialMap::new());
    };
    let credentials = services.credentials.get_or_generate(holder, scope).await?;
    tracing::debug!(
        holder = %holder.id,
        keys = ?credentials.keys().collect::<Vec<_>>(),
        "fetched scoped credentials"
    );
    Ok(credentials)
}
