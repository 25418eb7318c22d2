//! Out-of-band table notifications.
//!
//! An external engine that owns a table's metadata files can tell the catalog
//! that a table was created, updated or dropped. The catalog mirrors the
//! change without reading or writing metadata itself.

use serde::{Deserialize, Serialize};
use strata_core::{Entity, Namespace, TableIdent};

use crate::catalog::{CatalogSession, leaf};
use crate::error::{CatalogError, CatalogResult};
use crate::metadata::TableLikeKind;
use crate::operations::validate_location;
use crate::persistence::WriteOutcome;
use crate::resolver::{ResolutionMode, ResolvedPath};

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationType {
    /// The table was created.
    Create,
    /// The table's metadata pointer moved.
    Update,
    /// The table was dropped.
    Drop,
}

/// Table state carried by create and update notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TableUpdateNotification {
    /// Table name as known to the sender.
    pub table_name: String,
    /// Event time in epoch milliseconds.
    pub timestamp: i64,
    /// Table UUID, if the sender knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_uuid: Option<String>,
    /// New metadata pointer.
    pub metadata_location: String,
}

/// A notification request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct NotificationRequest {
    /// What happened.
    pub notification_type: NotificationType,
    /// Table state; required for create and update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<TableUpdateNotification>,
}

impl CatalogSession {
    /// Applies a notification for table `ident`.
    ///
    /// Create and update add any missing ancestor namespaces, then create the
    /// table record or move its pointer. Drop removes the record without
    /// purging files. Returns whether the catalog changed.
    ///
    /// # Errors
    ///
    /// - `BadRequest` when a create or update carries no payload
    /// - `Forbidden` when the metadata location is outside the storage boundary
    /// - `AlreadyExists` when a view holds the name
    pub async fn send_notification(
        &self,
        ident: &TableIdent,
        request: &NotificationRequest,
    ) -> CatalogResult<bool> {
        tracing::debug!(%ident, kind = ?request.notification_type, "handling notification");
        match request.notification_type {
            NotificationType::Drop => Ok(self.drop_table(ident, false).await?.dropped),
            NotificationType::Create | NotificationType::Update => {
                let payload = request.payload.as_ref().ok_or_else(|| CatalogError::BadRequest {
                    message: format!("{:?} notification requires a payload", request.notification_type),
                })?;
                self.apply_table_update(ident, payload).await
            }
        }
    }

    async fn apply_table_update(
        &self,
        ident: &TableIdent,
        payload: &TableUpdateNotification,
    ) -> CatalogResult<bool> {
        let namespace_path = self.create_missing_namespaces(&ident.namespace).await?;
        let new_location = self.transform_location(&payload.metadata_location);

        let existing = self
            .services()
            .resolver
            .resolve_table_like(
                self.name(),
                ident,
                Some(TableLikeKind::Table.sub_kind()),
                ResolutionMode::Passthrough,
            )
            .await?;
        validate_location(
            existing.as_ref().unwrap_or(&namespace_path),
            ident,
            &new_location,
        )?;

        let store = &self.services().store;
        let outcome = match &existing {
            None => {
                tracing::debug!(%ident, location = %new_location, "creating table for notification");
                let entity = Entity::table_like(
                    self.catalog_entity().id,
                    store.generate_id(),
                    ident,
                    TableLikeKind::Table.sub_kind(),
                    &new_location,
                );
                store.create_if_absent(namespace_path.entities(), entity).await?
            }
            Some(path) => {
                tracing::debug!(%ident, location = %new_location, "updating table for notification");
                let updated = leaf(path)?.clone().with_metadata_location(&new_location);
                store
                    .update_properties_if_unchanged(path.parent_path(), updated)
                    .await?
            }
        };

        match outcome {
            WriteOutcome::Applied(_) => Ok(true),
            WriteOutcome::AlreadyExists { sub_kind } => Err(TableLikeKind::from_sub_kind(sub_kind)
                .unwrap_or(TableLikeKind::Table)
                .already_exists(ident)),
            WriteOutcome::NotFound => Err(CatalogError::table_not_found(ident)),
            WriteOutcome::VersionMismatch => {
                Err(CatalogError::concurrent_modification(format!("table {ident}")))
            }
        }
    }

    /// Creates every missing level of `namespace` and returns its path.
    async fn create_missing_namespaces(&self, namespace: &Namespace) -> CatalogResult<ResolvedPath> {
        for depth in 1..=namespace.len() {
            let level = namespace.prefix(depth);
            if self
                .resolve_namespace(&level, ResolutionMode::Passthrough)
                .await?
                .is_some()
            {
                continue;
            }
            match self.create_namespace(&level, std::collections::BTreeMap::new()).await {
                Ok(_) | Err(CatalogError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        self.resolve_namespace(namespace, ResolutionMode::Passthrough)
            .await?
            .ok_or_else(|| CatalogError::namespace_not_found(namespace))
    }
}
