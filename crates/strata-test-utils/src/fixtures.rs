//! Pre-built catalog fixtures.

use std::collections::BTreeMap;
use std::sync::Arc;

use strata_catalog::fileio::MemoryStorageFactory;
use strata_catalog::metadata::{MetadataObject, TableMetadata, ViewMetadata};
use strata_catalog::persistence::{EntityStore, MemoryEntityStore};
use strata_catalog::{CatalogConfig, CatalogServices, CatalogSession};
use strata_core::entity::keys;
use strata_core::{
    CallContext, Entity, EntityKind, Namespace, RealmId, StorageConfigInfo, StorageType,
};

use crate::issuer::CountingIssuer;
use crate::storage::TracingMemoryBackend;

/// Name of the fixture catalog.
pub const TEST_CATALOG: &str = "warehouse";
/// Realm of the fixture context.
pub const TEST_REALM: &str = "test-realm";
/// Prefix every fixture table location must live under.
pub const TEST_ALLOWED_LOCATION: &str = "s3://bucket/";

/// A catalog over in-memory collaborators, with handles on every fake.
pub struct TestCatalog {
    /// Entity store.
    pub store: Arc<MemoryEntityStore>,
    /// Object storage shared by every storage client.
    pub storage: Arc<TracingMemoryBackend>,
    /// Storage client factory.
    pub factory: Arc<MemoryStorageFactory>,
    /// Credential issuer.
    pub issuer: Arc<CountingIssuer>,
    /// Shared services.
    pub services: Arc<CatalogServices>,
    /// The catalog entity.
    pub catalog: Entity,
    /// Caller context.
    pub ctx: CallContext,
}

impl TestCatalog {
    /// Catalog with default configuration and no retry delays.
    pub async fn new() -> Self {
        Self::with_config(CatalogConfig::default().without_delays()).await
    }

    /// Catalog with `config`; the catalog allows `s3://bucket/`.
    pub async fn with_config(config: CatalogConfig) -> Self {
        Self::build(config, Arc::new(CountingIssuer::new())).await
    }

    /// Catalog with `config` and a custom issuer.
    pub async fn build(config: CatalogConfig, issuer: Arc<CountingIssuer>) -> Self {
        let store = Arc::new(MemoryEntityStore::new());
        let storage = Arc::new(TracingMemoryBackend::new());
        let factory = Arc::new(MemoryStorageFactory::new(storage.clone()));

        let catalog = store
            .create_if_absent(
                &[],
                Entity::new(EntityKind::Catalog, TEST_CATALOG)
                    .with_properties(BTreeMap::from([(
                        keys::DEFAULT_BASE_LOCATION.to_string(),
                        "s3://bucket/warehouse".to_string(),
                    )]))
                    .with_internal_property(
                        keys::STORAGE_CONFIGURATION_INFO,
                        s3_storage_config(&[TEST_ALLOWED_LOCATION]),
                    ),
            )
            .await
            .expect("create catalog")
            .applied()
            .expect("catalog created");

        let services = CatalogServices::new(store.clone(), issuer.clone(), factory.clone(), config)
            .expect("services");

        Self {
            store,
            storage,
            factory,
            issuer,
            services: Arc::new(services),
            catalog,
            ctx: CallContext::new(RealmId::new(TEST_REALM).expect("realm")),
        }
    }

    /// Opens a session with no client properties.
    pub async fn session(&self) -> CatalogSession {
        CatalogSession::initialize(
            Arc::clone(&self.services),
            TEST_CATALOG,
            self.ctx.clone(),
            BTreeMap::new(),
        )
        .await
        .expect("session")
    }

    /// Creates every level of the dotted namespace `dotted`.
    pub async fn create_namespace(&self, dotted: &str) -> Namespace {
        let namespace = Namespace::from_dotted(dotted);
        let session = self.session().await;
        for depth in 1..=namespace.len() {
            let level = namespace.prefix(depth);
            if !session.namespace_exists(&level).await.expect("exists") {
                session
                    .create_namespace(&level, BTreeMap::new())
                    .await
                    .expect("create namespace");
            }
        }
        namespace
    }
}

/// Storage configuration JSON for S3 with `allowed` prefixes.
pub fn s3_storage_config(allowed: &[&str]) -> String {
    StorageConfigInfo::new(StorageType::S3, allowed.iter().copied())
        .to_json()
        .expect("storage config json")
}

/// Minimal table metadata at `location`.
pub fn table_metadata(location: &str) -> MetadataObject {
    MetadataObject::Table(TableMetadata::new(location))
}

/// Minimal view metadata at `location`.
pub fn view_metadata(location: &str) -> MetadataObject {
    MetadataObject::View(ViewMetadata::new(location))
}
