//! Identifier resolution.
//!
//! Resolution turns an identifier into the ordered chain of entity records
//! from the catalog down to the leaf. Two modes exist: `Static` returns the
//! chain authorized at the start of a call, and `Passthrough` bypasses any
//! cached authorization state and reads the store live. Refresh and commit
//! always use `Passthrough`.

use std::sync::Arc;

use async_trait::async_trait;
use strata_core::{Entity, EntityId, EntityKind, EntitySubKind, Namespace, TableIdent};

use crate::error::CatalogResult;
use crate::persistence::EntityStore;

/// How a lookup treats cached authorization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMode {
    /// Use the pre-authorized chain.
    Static,
    /// Read live state.
    Passthrough,
}

impl ResolutionMode {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Ordered ancestor chain, catalog first, leaf last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    entities: Vec<Entity>,
}

impl ResolvedPath {
    /// Wraps a non-empty chain.
    #[must_use]
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// All entities, catalog first.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The catalog entity.
    #[must_use]
    pub fn catalog(&self) -> Option<&Entity> {
        self.entities.first()
    }

    /// The leaf entity.
    #[must_use]
    pub fn leaf(&self) -> Option<&Entity> {
        self.entities.last()
    }

    /// Everything except the leaf.
    #[must_use]
    pub fn parent_path(&self) -> &[Entity] {
        match self.entities.split_last() {
            Some((_, parents)) => parents,
            None => &[],
        }
    }

    /// Nearest entity, leaf first, that carries a storage configuration.
    #[must_use]
    pub fn storage_config_holder(&self) -> Option<&Entity> {
        self.entities.iter().rev().find(|e| e.has_storage_config())
    }

    /// Appends a leaf.
    #[must_use]
    pub fn with_leaf(mut self, leaf: Entity) -> Self {
        self.entities.push(leaf);
        self
    }
}

/// Resolution collaborator.
#[async_trait]
pub trait Resolver: Send + Sync + 'static {
    /// Resolves a catalog by name.
    async fn resolve_catalog(&self, catalog: &str) -> CatalogResult<Option<ResolvedPath>>;

    /// Resolves a namespace. The empty namespace resolves to the catalog.
    async fn resolve_namespace(
        &self,
        catalog: &str,
        namespace: &Namespace,
        mode: ResolutionMode,
    ) -> CatalogResult<Option<ResolvedPath>>;

    /// Resolves a table-like identifier, optionally restricted to one sub-kind.
    async fn resolve_table_like(
        &self,
        catalog: &str,
        ident: &TableIdent,
        sub_kind: Option<EntitySubKind>,
        mode: ResolutionMode,
    ) -> CatalogResult<Option<ResolvedPath>>;
}

/// Resolver that walks an [`EntityStore`] by name.
///
/// The store keeps no authorization cache, so both modes read live state.
#[derive(Clone)]
pub struct StoreResolver {
    store: Arc<dyn EntityStore>,
}

impl std::fmt::Debug for StoreResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreResolver").finish_non_exhaustive()
    }
}

impl StoreResolver {
    /// Creates a resolver over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resolver for StoreResolver {
    async fn resolve_catalog(&self, catalog: &str) -> CatalogResult<Option<ResolvedPath>> {
        let entity = self
            .store
            .lookup_by_name(EntityId::ROOT, EntityId::ROOT, EntityKind::Catalog, catalog)
            .await?;
        Ok(entity.map(|e| ResolvedPath::new(vec![e])))
    }

    async fn resolve_namespace(
        &self,
        catalog: &str,
        namespace: &Namespace,
        mode: ResolutionMode,
    ) -> CatalogResult<Option<ResolvedPath>> {
        tracing::trace!(%namespace, mode = mode.as_str(), "resolving namespace");
        let Some(mut path) = self.resolve_catalog(catalog).await? else {
            return Ok(None);
        };
        let catalog_id = path.catalog().map_or(EntityId::ROOT, |c| c.id);

        for level in namespace.levels() {
            let parent_id = path.leaf().map_or(catalog_id, |p| p.id);
            let child = self
                .store
                .lookup_by_name(catalog_id, parent_id, EntityKind::Namespace, level)
                .await?;
            match child {
                Some(child) => path = path.with_leaf(child),
                None => return Ok(None),
            }
        }
        Ok(Some(path))
    }

    async fn resolve_table_like(
        &self,
        catalog: &str,
        ident: &TableIdent,
        sub_kind: Option<EntitySubKind>,
        mode: ResolutionMode,
    ) -> CatalogResult<Option<ResolvedPath>> {
        let Some(path) = self
            .resolve_namespace(catalog, &ident.namespace, mode)
            .await?
        else {
            return Ok(None);
        };
        let catalog_id = path.catalog().map_or(EntityId::ROOT, |c| c.id);
        let parent_id = path.leaf().map_or(catalog_id, |p| p.id);
        let leaf = self
            .store
            .lookup_by_name(catalog_id, parent_id, EntityKind::TableLike, &ident.name)
            .await?
            .filter(|e| sub_kind.is_none_or(|s| e.sub_kind == s));
        Ok(leaf.map(|leaf| path.with_leaf(leaf)))
    }
}
