//! Bounded, time-limited credential cache with single-flight loading.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use strata_core::{Entity, EntityId, EntityKind};
use tokio::sync::watch;
use tokio::time::Instant;

use super::{CredentialIssuer, CredentialMap, CredentialScope};
use crate::config::{DEFAULT_CREDENTIAL_CACHE_MAX_ENTRIES, DEFAULT_CREDENTIAL_CACHE_MAX_TTL};
use crate::error::{CatalogError, CatalogResult, poisoned};
use crate::metrics;

/// Cache key. Location sets are ordered, so equality and hashing do not
/// depend on the order callers listed them in.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialCacheKey {
    /// Catalog of the entity.
    pub catalog_id: EntityId,
    /// Entity the credentials are issued for.
    pub entity_id: EntityId,
    /// Whether listing is allowed.
    pub allow_list: bool,
    /// Readable locations.
    pub read_locations: BTreeSet<String>,
    /// Writable locations.
    pub write_locations: BTreeSet<String>,
}

impl CredentialCacheKey {
    /// Builds the key for `entity` and `scope`.
    #[must_use]
    pub fn new(entity: &Entity, scope: &CredentialScope) -> Self {
        Self {
            catalog_id: entity.catalog_id,
            entity_id: entity.id,
            allow_list: scope.allow_list,
            read_locations: scope.read_locations.clone(),
            write_locations: scope.write_locations.clone(),
        }
    }
}

/// Time-to-live for credentials expiring at `expires_at`: half the remaining
/// lifetime, capped at `max_ttl`, never negative.
#[must_use]
pub fn ttl_for(expires_at: DateTime<Utc>, now: DateTime<Utc>, max_ttl: Duration) -> Duration {
    let remaining_ms = (expires_at - now).num_milliseconds();
    let half = u64::try_from(remaining_ms / 2).unwrap_or(0);
    Duration::from_millis(half).min(max_ttl)
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

type LoadOutcome = Result<Arc<CredentialMap>, String>;

#[derive(Debug)]
struct CacheEntry {
    credentials: Arc<CredentialMap>,
    expires_at: Instant,
    last_access: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CredentialCacheKey, CacheEntry>,
    // Access tick -> key, oldest first.
    recency: BTreeMap<u64, CredentialCacheKey>,
    in_flight: HashMap<CredentialCacheKey, watch::Receiver<Option<LoadOutcome>>>,
    tick: u64,
    last_sweep: Option<Instant>,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &CredentialCacheKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_access);
            entry.last_access = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn insert(&mut self, key: CredentialCacheKey, credentials: Arc<CredentialMap>, expires_at: Instant) {
        self.remove(&key);
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                credentials,
                expires_at,
                last_access: tick,
            },
        );
    }

    fn remove(&mut self, key: &CredentialCacheKey) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.last_access);
        }
    }

    /// Frees a slot for one insert. Expired entries are swept at most once
    /// per [`SWEEP_INTERVAL`]; otherwise the least recently used entries go.
    fn make_room(&mut self, max_entries: usize, now: Instant) {
        if self.entries.len() < max_entries {
            return;
        }
        if self
            .last_sweep
            .is_none_or(|last| now.duration_since(last) >= SWEEP_INTERVAL)
        {
            self.last_sweep = Some(now);
            let expired: Vec<CredentialCacheKey> = self
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            for key in &expired {
                self.remove(key);
            }
        }
        while self.entries.len() >= max_entries {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

enum Lookup {
    Hit(Arc<CredentialMap>),
    Wait(watch::Receiver<Option<LoadOutcome>>),
    Load(watch::Sender<Option<LoadOutcome>>),
}

/// Shared credential cache.
///
/// Concurrent misses for one key share a single issuer call. Failed loads
/// are not cached. Entry lifetime is fixed when the entry is created.
pub struct CredentialCache {
    issuer: Arc<dyn CredentialIssuer>,
    max_entries: usize,
    max_ttl: Duration,
    state: Mutex<CacheState>,
}

impl std::fmt::Debug for CredentialCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("max_entries", &self.max_entries)
            .field("max_ttl", &self.max_ttl)
            .finish_non_exhaustive()
    }
}

/// Removes the in-flight marker if the loading call is dropped mid-load,
/// which lets a waiting caller take over.
struct InFlightGuard<'a> {
    state: &'a Mutex<CacheState>,
    key: Option<CredentialCacheKey>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Ok(mut state) = self.state.lock() {
                state.in_flight.remove(&key);
            }
        }
    }
}

impl CredentialCache {
    /// Creates a cache with the default bounds.
    #[must_use]
    pub fn new(issuer: Arc<dyn CredentialIssuer>) -> Self {
        Self::with_limits(
            issuer,
            DEFAULT_CREDENTIAL_CACHE_MAX_ENTRIES,
            DEFAULT_CREDENTIAL_CACHE_MAX_TTL,
        )
    }

    /// Creates a cache with explicit bounds.
    #[must_use]
    pub fn with_limits(issuer: Arc<dyn CredentialIssuer>, max_entries: usize, max_ttl: Duration) -> Self {
        Self {
            issuer,
            max_entries: max_entries.max(1),
            max_ttl,
            state: Mutex::new(CacheState::default()),
        }
    }

    /// Returns true for entity kinds credentials can be issued for.
    #[must_use]
    pub const fn is_supported_kind(kind: EntityKind) -> bool {
        matches!(
            kind,
            EntityKind::Catalog | EntityKind::Namespace | EntityKind::TableLike | EntityKind::Task
        )
    }

    /// Returns cached credentials for `entity` and `scope`, loading them on
    /// a miss.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Unprocessable`] for unsupported entity kinds
    /// and when the issuer fails.
    pub async fn get_or_generate(
        &self,
        entity: &Entity,
        scope: &CredentialScope,
    ) -> CatalogResult<CredentialMap> {
        if !Self::is_supported_kind(entity.kind) {
            return Err(CatalogError::Unprocessable {
                message: format!(
                    "entity kind {} is not supported for credential vending",
                    entity.kind
                ),
            });
        }
        let key = CredentialCacheKey::new(entity, scope);

        loop {
            match self.lookup(&key)? {
                Lookup::Hit(credentials) => {
                    metrics::record_cache_hit();
                    tracing::debug!(entity_id = %key.entity_id, "credential cache hit");
                    return Ok(credentials.as_ref().clone());
                }
                Lookup::Wait(mut rx) => {
                    metrics::record_cache_miss();
                    let outcome = rx.wait_for(Option::is_some).await.map(|v| (*v).clone());
                    match outcome {
                        Ok(Some(result)) => return Self::materialize(result),
                        _ => {
                            self.clear_closed(&key, &rx)?;
                        }
                    }
                }
                Lookup::Load(tx) => {
                    metrics::record_cache_miss();
                    return self.load(key, entity, scope, tx).await;
                }
            }
        }
    }

    /// Returns cached credentials without loading.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn peek(&self, key: &CredentialCacheKey) -> CatalogResult<Option<CredentialMap>> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        let now = Instant::now();
        Ok(state
            .entries
            .get(key)
            .filter(|e| e.expires_at > now)
            .map(|e| e.credentials.as_ref().clone()))
    }

    /// Number of live entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn len(&self) -> CatalogResult<usize> {
        let state = self.state.lock().map_err(|_| poisoned())?;
        let now = Instant::now();
        Ok(state.entries.values().filter(|e| e.expires_at > now).count())
    }

    /// True when no live entries are cached.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn is_empty(&self) -> CatalogResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lookup(&self, key: &CredentialCacheKey) -> CatalogResult<Lookup> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        let now = Instant::now();

        let cached = state
            .entries
            .get(key)
            .map(|e| (e.expires_at > now, Arc::clone(&e.credentials)));
        match cached {
            Some((true, credentials)) => {
                state.touch(key);
                return Ok(Lookup::Hit(credentials));
            }
            Some((false, _)) => state.remove(key),
            None => {}
        }

        if let Some(rx) = state.in_flight.get(key) {
            return Ok(Lookup::Wait(rx.clone()));
        }

        let (tx, rx) = watch::channel(None);
        state.in_flight.insert(key.clone(), rx);
        Ok(Lookup::Load(tx))
    }

    fn clear_closed(
        &self,
        key: &CredentialCacheKey,
        rx: &watch::Receiver<Option<LoadOutcome>>,
    ) -> CatalogResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        if state
            .in_flight
            .get(key)
            .is_some_and(|current| current.same_channel(rx))
        {
            state.in_flight.remove(key);
        }
        Ok(())
    }

    async fn load(
        &self,
        key: CredentialCacheKey,
        entity: &Entity,
        scope: &CredentialScope,
        tx: watch::Sender<Option<LoadOutcome>>,
    ) -> CatalogResult<CredentialMap> {
        let mut guard = InFlightGuard {
            state: &self.state,
            key: Some(key.clone()),
        };

        tracing::debug!(
            entity_id = %key.entity_id,
            allow_list = key.allow_list,
            read_locations = key.read_locations.len(),
            write_locations = key.write_locations.len(),
            "loading scoped credentials"
        );
        let issued = self.issuer.issue(entity, scope).await;

        let outcome: LoadOutcome = match issued {
            Ok(issued) => {
                let ttl = ttl_for(issued.expires_at, Utc::now(), self.max_ttl);
                let credentials = Arc::new(issued.credentials);
                let mut state = self.state.lock().map_err(|_| poisoned())?;
                guard.key = None;
                state.in_flight.remove(&key);
                let now = Instant::now();
                state.make_room(self.max_entries, now);
                state.insert(key, Arc::clone(&credentials), now + ttl);
                drop(state);
                tracing::debug!(ttl_ms = ttl.as_millis(), "cached scoped credentials");
                Ok(credentials)
            }
            Err(e) => {
                metrics::record_load_failure();
                tracing::warn!(error = %e, "credential issuance failed");
                let mut state = self.state.lock().map_err(|_| poisoned())?;
                guard.key = None;
                state.in_flight.remove(&key);
                drop(state);
                Err(e.message)
            }
        };

        let _ = tx.send(Some(outcome.clone()));
        Self::materialize(outcome)
    }

    fn materialize(outcome: LoadOutcome) -> CatalogResult<CredentialMap> {
        outcome
            .map(|credentials| credentials.as_ref().clone())
            .map_err(|message| CatalogError::Unprocessable {
                message: format!("Failed to get subscoped credentials: {message}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{IssueError, ScopedCredentials};
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedIssuer {
        calls: AtomicUsize,
        lifetime: chrono::Duration,
        fail: bool,
    }

    impl FixedIssuer {
        fn new(lifetime: chrono::Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                lifetime,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl CredentialIssuer for FixedIssuer {
        async fn issue(
            &self,
            entity: &Entity,
            _scope: &CredentialScope,
        ) -> Result<ScopedCredentials, IssueError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(IssueError::new("sts unavailable"));
            }
            Ok(ScopedCredentials {
                credentials: CredentialMap::from([(
                    "token".to_string(),
                    format!("{}-{n}", entity.id),
                )]),
                expires_at: Utc::now() + self.lifetime,
            })
        }
    }

    fn table(id: i64) -> Entity {
        Entity::new(EntityKind::TableLike, "t")
            .with_catalog_id(EntityId::new(1))
            .with_id(EntityId::new(id))
    }

    #[test]
    fn test_ttl_is_half_remaining_capped() {
        let now = Utc::now();
        let max = Duration::from_secs(1800);
        assert_eq!(
            ttl_for(now + chrono::Duration::minutes(10), now, max),
            Duration::from_secs(300)
        );
        assert_eq!(ttl_for(now + chrono::Duration::hours(12), now, max), max);
        assert_eq!(
            ttl_for(now - chrono::Duration::minutes(1), now, max),
            Duration::ZERO
        );
    }

    #[test]
    fn test_key_ignores_location_order() {
        let entity = table(7);
        let a = CredentialScope {
            allow_list: false,
            read_locations: ["s3://b/x", "s3://b/y"].map(String::from).into(),
            write_locations: BTreeSet::new(),
        };
        let b = CredentialScope {
            allow_list: false,
            read_locations: ["s3://b/y", "s3://b/x"].map(String::from).into(),
            write_locations: BTreeSet::new(),
        };
        assert_eq!(
            CredentialCacheKey::new(&entity, &a),
            CredentialCacheKey::new(&entity, &b)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_half_lifetime() {
        let issuer = Arc::new(FixedIssuer::new(chrono::Duration::minutes(10)));
        let cache = CredentialCache::new(issuer.clone());
        let entity = table(7);
        let scope = CredentialScope::read_only("s3://b/t");

        cache.get_or_generate(&entity, &scope).await.expect("load");
        tokio::time::advance(Duration::from_secs(290)).await;
        cache.get_or_generate(&entity, &scope).await.expect("hit");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(20)).await;
        let key = CredentialCacheKey::new(&entity, &scope);
        assert!(cache.peek(&key).expect("peek").is_none());
        cache.get_or_generate(&entity, &scope).await.expect("reload");
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unsupported_kind_never_reaches_issuer() {
        let issuer = Arc::new(FixedIssuer::new(chrono::Duration::hours(1)));
        let cache = CredentialCache::new(issuer.clone());
        let principal = Entity::new(EntityKind::Principal, "alice").with_id(EntityId::new(3));

        let err = cache
            .get_or_generate(&principal, &CredentialScope::read_only("s3://b"))
            .await
            .expect_err("unsupported");
        assert!(matches!(err, CatalogError::Unprocessable { .. }));
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let issuer = Arc::new(FixedIssuer {
            fail: true,
            ..FixedIssuer::new(chrono::Duration::hours(1))
        });
        let cache = CredentialCache::new(issuer.clone());
        let entity = table(7);
        let scope = CredentialScope::read_only("s3://b/t");

        for _ in 0..2 {
            let err = cache
                .get_or_generate(&entity, &scope)
                .await
                .expect_err("fails");
            assert!(err.to_string().starts_with("Failed to get subscoped credentials"));
        }
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty().expect("len"));
    }

    #[tokio::test]
    async fn test_size_bound_evicts_least_recent() {
        let issuer = Arc::new(FixedIssuer::new(chrono::Duration::hours(1)));
        let cache = CredentialCache::with_limits(issuer.clone(), 2, Duration::from_secs(1800));
        let scope = CredentialScope::read_only("s3://b/t");

        cache.get_or_generate(&table(1), &scope).await.expect("load");
        cache.get_or_generate(&table(2), &scope).await.expect("load");
        cache.get_or_generate(&table(1), &scope).await.expect("hit");
        cache.get_or_generate(&table(3), &scope).await.expect("load");

        assert_eq!(cache.len().expect("len"), 2);
        let key = |id| CredentialCacheKey::new(&table(id), &scope);
        assert!(cache.peek(&key(1)).expect("peek").is_some());
        assert!(cache.peek(&key(2)).expect("peek").is_none());
        assert!(cache.peek(&key(3)).expect("peek").is_some());
    }

    /// A full cache drops expired entries before evicting live ones, even
    /// when the live entry is the least recently used.
    #[tokio::test(start_paused = true)]
    async fn test_full_cache_sweeps_expired_before_evicting() {
        let issuer = Arc::new(FixedIssuer::new(chrono::Duration::minutes(10)));
        let cache = CredentialCache::with_limits(issuer.clone(), 2, Duration::from_secs(1800));
        let scope = CredentialScope::read_only("s3://b/t");
        let key = |id| CredentialCacheKey::new(&table(id), &scope);

        cache.get_or_generate(&table(1), &scope).await.expect("load");
        tokio::time::advance(Duration::from_secs(240)).await;
        cache.get_or_generate(&table(2), &scope).await.expect("load");
        cache.get_or_generate(&table(1), &scope).await.expect("hit");
        tokio::time::advance(Duration::from_secs(120)).await;

        cache.get_or_generate(&table(3), &scope).await.expect("load");
        assert!(cache.peek(&key(1)).expect("peek").is_none());
        assert!(cache.peek(&key(2)).expect("peek").is_some());
        assert!(cache.peek(&key(3)).expect("peek").is_some());
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 3);
    }

    fn locations() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec("s3://[a-z]{1,6}/[a-z0-9/]{0,12}", 0..8)
    }

    proptest! {
        #[test]
        fn prop_key_ignores_location_order(
            (reads, shuffled_reads) in locations()
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            (writes, shuffled_writes) in locations()
                .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle())),
            allow_list in any::<bool>(),
        ) {
            let entity = table(7);
            let scope = |reads: &[String], writes: &[String], allow_list| CredentialScope {
                allow_list,
                read_locations: reads.iter().cloned().collect(),
                write_locations: writes.iter().cloned().collect(),
            };
            let original = CredentialCacheKey::new(&entity, &scope(&reads, &writes, allow_list));
            let reordered = CredentialCacheKey::new(
                &entity,
                &scope(&shuffled_reads, &shuffled_writes, allow_list),
            );
            prop_assert_eq!(&original, &reordered);

            let flipped = CredentialCacheKey::new(&entity, &scope(&reads, &writes, !allow_list));
            prop_assert_ne!(original, flipped);
        }

        #[test]
        fn prop_ttl_is_half_remaining_clamped(offset_ms in -7_200_000_i64..7_200_000) {
            let now = Utc::now();
            let max = Duration::from_millis(1_800_000);
            let ttl = ttl_for(now + chrono::Duration::milliseconds(offset_ms), now, max);
            let expected = u64::try_from((offset_ms / 2).max(0)).unwrap_or(0).min(1_800_000);
            prop_assert_eq!(ttl, Duration::from_millis(expected));
        }
    }
}
