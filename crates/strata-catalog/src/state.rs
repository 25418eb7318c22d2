//! Shared service state.
//!
//! One [`CatalogServices`] is built per service instance and shared by every
//! catalog session. It owns the credential cache and the task executor, so
//! neither is a process-wide singleton.

use std::sync::Arc;

use crate::config::CatalogConfig;
use crate::credentials::{CredentialCache, CredentialIssuer};
use crate::error::CatalogResult;
use crate::fileio::StorageClientFactory;
use crate::metrics::register_metrics;
use crate::persistence::EntityStore;
use crate::resolver::{Resolver, StoreResolver};
use crate::tasks::{TableCleanupTaskHandler, TaskExecutor};

/// Collaborators and shared structures used by catalog sessions.
#[derive(Clone)]
pub struct CatalogServices {
    /// Service configuration.
    pub config: CatalogConfig,
    /// Entity persistence.
    pub store: Arc<dyn EntityStore>,
    /// Identifier resolution.
    pub resolver: Arc<dyn Resolver>,
    /// Scoped credential cache.
    pub credentials: Arc<CredentialCache>,
    /// Storage client factory.
    pub storage: Arc<dyn StorageClientFactory>,
    /// Deferred task executor.
    pub tasks: Arc<TaskExecutor>,
}

impl std::fmt::Debug for CatalogServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogServices")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl CatalogServices {
    /// Builds services over `store`, resolving identifiers against the store
    /// and registering the table cleanup handler.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Validation`](crate::CatalogError::Validation)
    /// for an invalid configuration.
    pub fn new(
        store: Arc<dyn EntityStore>,
        issuer: Arc<dyn CredentialIssuer>,
        storage: Arc<dyn StorageClientFactory>,
        config: CatalogConfig,
    ) -> CatalogResult<Self> {
        config.validate()?;
        register_metrics();

        let resolver: Arc<dyn Resolver> = Arc::new(StoreResolver::new(Arc::clone(&store)));
        let credentials = Arc::new(CredentialCache::with_limits(
            issuer,
            config.credential_cache_max_entries,
            config.credential_cache_max_ttl,
        ));
        let tasks = Arc::new(TaskExecutor::new(Arc::clone(&store), &config));
        tasks.add_handler(Arc::new(TableCleanupTaskHandler::new(Arc::clone(&storage))))?;

        Ok(Self {
            config,
            store,
            resolver,
            credentials,
            storage,
            tasks,
        })
    }

    /// Replaces the resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }
}
