//! Purges the files of a dropped table.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use strata_core::entity::keys;
use strata_core::{CallContext, Entity};

use super::TaskHandler;
use crate::error::CatalogResult;
use crate::fileio::{StorageClientFactory, StorageLease};
use crate::persistence::TABLE_CLEANUP_TASK;

/// Deletes every object under the storage location of a purged table.
///
/// The task record carries the location and the storage client properties
/// (credentials included) captured when the table was dropped.
pub struct TableCleanupTaskHandler {
    storage: Arc<dyn StorageClientFactory>,
}

impl std::fmt::Debug for TableCleanupTaskHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCleanupTaskHandler").finish_non_exhaustive()
    }
}

impl TableCleanupTaskHandler {
    /// Creates a handler that opens storage clients through `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageClientFactory>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TaskHandler for TableCleanupTaskHandler {
    fn name(&self) -> &'static str {
        "table-cleanup"
    }

    fn can_handle(&self, task: &Entity) -> bool {
        task.properties.get(keys::TASK_TYPE).map(String::as_str) == Some(TABLE_CLEANUP_TASK)
    }

    async fn handle(&self, task: &Entity, _ctx: &CallContext) -> CatalogResult<bool> {
        let Some(location) = task.internal_properties.get(keys::STORAGE_LOCATION) else {
            tracing::warn!(task = %task.name, "cleanup task has no storage location");
            return Ok(false);
        };
        let dropped = task
            .properties
            .get(keys::TASK_DATA)
            .and_then(|data| serde_json::from_str::<Entity>(data).ok());

        let lease = StorageLease::open(
            self.storage.as_ref(),
            &BTreeMap::new(),
            &task.internal_properties,
        )?;
        let prefix = format!("{}/", location.trim_end_matches('/'));
        let objects = lease.list(&prefix).await?;
        try_join_all(objects.iter().map(|object| lease.delete(&object.location))).await?;

        tracing::info!(
            table = ?dropped.as_ref().map(Entity::table_ident),
            location = %location,
            deleted = objects.len(),
            "purged table files"
        );
        Ok(true)
    }
}
