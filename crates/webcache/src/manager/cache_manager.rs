use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use reqwest::header::HeaderMap;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::manager::freshness::FreshnessPolicy;
use crate::manager::policy::{self, Cacheability};
use crate::manager::CacheStats;
use crate::protocol::{FetchRequest, Fetcher, Method, ProtocolAccess};
use crate::shared::{SharedApi, SharedItem};
use crate::store::{CacheEntry, DiskCacheAccess, DiskStore, Document, ReadOutcome, StoreId};
use crate::time_value::{TimeValue, now_secs};

/// Top-level cache coordinator.
///
/// Cloning is cheap; clones share the same stores and active table.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<ManagerInner>,
}

pub(crate) type ActiveItems = HashMap<CacheKey, Arc<SharedItem>>;

pub(crate) struct ManagerInner {
    state: Mutex<ManagerState>,
    /// Shared items with live consumers. Locked before `state` and before an
    /// item's own lock when both are needed.
    active: Mutex<ActiveItems>,
    fetcher: Arc<dyn Fetcher>,
}

struct ManagerState {
    config: CacheConfig,
    freshness: FreshnessPolicy,
    stores: Vec<DiskStore>,
    primary: Option<StoreId>,
    /// Routes each cached key to the store holding it
    index: HashMap<CacheKey, StoreId>,
    next_store_id: u64,
}

/// A readable cached copy found while opening a URL.
struct CachedCopy {
    access: DiskCacheAccess,
    fresh: bool,
    last_modified: Option<TimeValue>,
}

impl ManagerState {
    fn allocate_id(&mut self) -> StoreId {
        let id = StoreId(self.next_store_id);
        self.next_store_id += 1;
        id
    }

    fn store(&self, id: StoreId) -> Option<&DiskStore> {
        self.stores.iter().find(|store| store.id() == id)
    }

    fn store_mut(&mut self, id: StoreId) -> Option<&mut DiskStore> {
        self.stores.iter_mut().find(|store| store.id() == id)
    }

    fn primary_mut(&mut self) -> Option<&mut DiskStore> {
        let id = self.primary?;
        self.store_mut(id)
    }

    /// A live store id resolves to itself; a closed one forwards to the
    /// current primary.
    fn resolve(&self, id: StoreId) -> Option<StoreId> {
        if self.store(id).is_some() {
            Some(id)
        } else {
            self.primary
        }
    }

    fn route(&self, key: &CacheKey) -> Option<StoreId> {
        self.index.get(key).and_then(|id| self.resolve(*id))
    }

    fn attach(&mut self, store: DiskStore, primary: bool) {
        let id = store.id();
        for key in store.keys() {
            if primary {
                self.index.insert(key.clone(), id);
            } else {
                self.index.entry(key.clone()).or_insert(id);
            }
        }
        if primary {
            self.primary = Some(id);
            self.stores.insert(0, store);
        } else {
            self.stores.push(store);
        }
    }

    fn remove_route(&mut self, key: &CacheKey, id: StoreId) {
        if self.index.get(key) == Some(&id) {
            self.index.remove(key);
        }
    }

    /// Drop index routes into `id` that the store no longer backs.
    fn reindex(&mut self, id: StoreId) {
        match self.stores.iter().find(|store| store.id() == id) {
            Some(store) => self
                .index
                .retain(|key, owner| *owner != id || store.contains(key)),
            None => self.index.retain(|_, owner| *owner != id),
        }
    }

    fn close_store(&mut self, id: StoreId, flush_log: bool) -> bool {
        let Some(position) = self.stores.iter().position(|store| store.id() == id) else {
            return false;
        };
        let store = self.stores.remove(position);
        for key in store.close(flush_log) {
            self.remove_route(&key, id);
        }
        if self.primary == Some(id) {
            self.primary = None;
        }
        true
    }

    /// Close the primary store and open a fresh one on `dir`. If the new
    /// store cannot be opened the manager carries on without one.
    fn reset_primary(&mut self, flush_log: bool, dir: PathBuf, max_size: u64) {
        if let Some(id) = self.primary {
            self.close_store(id, flush_log);
        }
        let id = self.allocate_id();
        match DiskStore::open(id, &dir, max_size) {
            Ok(store) => self.attach(store, true),
            Err(e) => {
                warn!(dir = ?dir, error = %e, "Failed to open disk store, running without disk cache")
            }
        }
    }

    fn read_cached(&mut self, key: &CacheKey, now: i64, reload: bool) -> Option<CachedCopy> {
        let Some(id) = self.route(key) else {
            self.index.remove(key);
            return None;
        };
        let outcome = self.store_mut(id)?.get_read_handle(key, now);

        match outcome {
            Ok(ReadOutcome::Hit(access)) => {
                let entry = self.stores.iter().find(|s| s.id() == id)?.lookup(key)?;
                let fresh = reload || self.freshness.is_fresh(entry, now);
                Some(CachedCopy {
                    access,
                    fresh,
                    last_modified: entry.last_modified.clone(),
                })
            }
            Ok(ReadOutcome::NeedsEviction(reason)) => {
                info!(key = %key, reason = %reason, "Evicting unusable cache entry");
                if let Some(store) = self.store_mut(id) {
                    if let Err(e) = store.evict(key) {
                        warn!(key = %key, error = %e, "Eviction of unusable entry failed");
                    }
                }
                self.index.remove(key);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, fetching live");
                if matches!(e, CacheError::NotFound(_)) {
                    self.index.remove(key);
                }
                None
            }
        }
    }

    fn touch(&mut self, key: &CacheKey, refresh: bool, now: i64) -> bool {
        let Some(id) = self.route(key) else {
            return false;
        };
        self.store_mut(id)
            .is_some_and(|store| store.touch(key, refresh, now))
    }

    fn evict_routed(&mut self, key: &CacheKey) {
        if let Some(id) = self.route(key) {
            if let Some(store) = self.store_mut(id) {
                if let Err(e) = store.evict(key) {
                    debug!(key = %key, error = %e, "Nothing to evict");
                }
            }
        }
        self.index.remove(key);
    }

    fn add(&mut self, doc: &Document, reload: bool, now: i64) -> bool {
        let owner = self.route(&doc.key);
        if owner.is_some() && !reload {
            debug!(key = %doc.key, "Already cached");
            return false;
        }

        let max_size = self.primary.and_then(|id| self.store(id)).map(DiskStore::max_size);
        let expires_override = match policy::evaluate(&doc.url, &doc.meta, doc.len(), max_size, now)
        {
            Cacheability::Cacheable { expires_override } => expires_override,
            // A forced reload replaces the cached copy whatever the response says.
            Cacheability::Refused(reason) if owner.is_some() => {
                debug!(url = %doc.url, reason = %reason, "Replacing cached copy on reload");
                None
            }
            Cacheability::Refused(reason) => {
                debug!(url = %doc.url, reason = %reason, "Not caching");
                return false;
            }
        };

        let Some(primary_id) = self.primary else {
            return false;
        };
        if owner.is_some_and(|id| id != primary_id) {
            self.evict_routed(&doc.key);
        }
        let Some(primary) = self.primary_mut() else {
            return false;
        };

        let result = if owner == Some(primary_id) {
            primary.update(doc, expires_override, now)
        } else {
            primary.add(doc, expires_override, now)
        };

        match result {
            Ok(room) => {
                for key in &room.evicted {
                    self.remove_route(key, primary_id);
                }
                self.index.insert(doc.key.clone(), primary_id);
                debug!(key = %doc.key, evicted = room.evicted.len(), "Cached document");
                true
            }
            Err(e) => {
                warn!(url = %doc.url, error = %e, "Failed to cache document");
                self.reindex(primary_id);
                false
            }
        }
    }
}

impl ManagerInner {
    /// Store a finished document if policy allows. With `reload` an existing
    /// entry is replaced.
    pub(crate) fn add(&self, doc: &Document, reload: bool) -> bool {
        self.state.lock().add(doc, reload, now_secs())
    }

    pub(crate) fn lock_active(&self) -> MutexGuard<'_, ActiveItems> {
        self.active.lock()
    }
}

/// Remove `item` from the active table, unless the key has since been taken
/// over by a newer item.
pub(crate) fn deactivate(active: &mut ActiveItems, key: &CacheKey, item: &Arc<SharedItem>) {
    if active
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, item))
    {
        active.remove(key);
        debug!(key = %key, "Deactivated shared item");
    }
}

impl CacheManager {
    /// Create a manager and open its primary store. A store that cannot be
    /// opened is reported and the manager runs without a disk cache.
    pub fn new(config: CacheConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        let mut state = ManagerState {
            freshness: FreshnessPolicy::from_config(&config),
            config,
            stores: Vec::new(),
            primary: None,
            index: HashMap::new(),
            next_store_id: 1,
        };
        let dir = state.config.resolved_directory();
        let max_size = state.config.max_size;
        state.reset_primary(false, dir, max_size);

        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(state),
                active: Mutex::new(HashMap::new()),
                fetcher,
            }),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn normalize_key(&self, url: &str) -> CacheResult<CacheKey> {
        CacheKey::normalize(url)
    }

    /// Open `url` for reading.
    ///
    /// GET requests join an active item for the same key, or are served from
    /// the disk cache when a fresh copy exists, or revalidate a stale copy,
    /// or fetch live. `reload` always fetches live and replaces the cached
    /// copy. POST requests always fetch live and are never cached.
    pub fn open(
        &self,
        url: &str,
        method: Method,
        params: HeaderMap,
        reload: bool,
        data: Option<Bytes>,
    ) -> CacheResult<SharedApi> {
        let key = CacheKey::normalize(url)?;
        let request = FetchRequest {
            url: url.to_string(),
            method,
            headers: params,
            body: data,
            if_modified_since: None,
            reload,
        };

        match method {
            Method::Get => self.open_get(key, request),
            Method::Post => self.open_post(key, request),
        }
    }

    /// Plain GET of `url`.
    pub fn get(&self, url: &str) -> CacheResult<SharedApi> {
        self.open(url, Method::Get, HeaderMap::new(), false, None)
    }

    fn open_get(&self, key: CacheKey, mut request: FetchRequest) -> CacheResult<SharedApi> {
        let mut active = self.inner.active.lock();
        if let Some(item) = active.get(&key) {
            debug!(key = %key, "Joining active item");
            return Ok(item.attach());
        }

        let now = now_secs();
        let manager = Some(Arc::downgrade(&self.inner));
        let cached = self.inner.state.lock().read_cached(&key, now, request.reload);

        let item = match cached {
            None => {
                debug!(key = %key, "Cache miss");
                let source = self.inner.fetcher.fetch(&request)?;
                SharedItem::live(
                    key.clone(),
                    request.url.clone(),
                    Method::Get,
                    source,
                    manager,
                    request.reload,
                )
            }
            Some(mut copy) if request.reload => {
                debug!(key = %key, "Reloading cached document");
                copy.access.close();
                self.inner.state.lock().touch(&key, false, now);
                let source = self.inner.fetcher.fetch(&request)?;
                SharedItem::live(key.clone(), request.url.clone(), Method::Get, source, manager, true)
            }
            Some(copy) if !copy.fresh => {
                debug!(key = %key, "Revalidating cached document");
                self.inner.state.lock().touch(&key, true, now);
                request.if_modified_since = copy.last_modified.clone();
                match self.inner.fetcher.fetch(&request) {
                    Ok(source) => SharedItem::revalidating(
                        key.clone(),
                        request.url.clone(),
                        source,
                        copy.access,
                        manager,
                    ),
                    Err(e) => {
                        warn!(key = %key, error = %e, "Revalidation failed to start, serving cached copy");
                        SharedItem::cached(key.clone(), request.url.clone(), copy.access, manager)
                    }
                }
            }
            Some(copy) => {
                debug!(key = %key, "Cache hit");
                SharedItem::cached(key.clone(), request.url.clone(), copy.access, manager)
            }
        };

        active.insert(key, Arc::clone(&item));
        Ok(item.attach())
    }

    fn open_post(&self, key: CacheKey, request: FetchRequest) -> CacheResult<SharedApi> {
        debug!(url = %request.url, "POST bypasses the cache");
        let source = self.inner.fetcher.fetch(&request)?;
        let item = SharedItem::live(key, request.url.clone(), Method::Post, source, None, false);
        Ok(item.attach())
    }

    /// Offer a finished document to the cache. Returns true if it was stored.
    pub fn add(&self, doc: &Document, reload: bool) -> bool {
        self.inner.add(doc, reload)
    }

    /// Open an additional store behind the primary.
    pub fn add_store(&self, dir: impl AsRef<Path>, max_size: u64) -> CacheResult<StoreId> {
        let mut state = self.inner.state.lock();
        let id = state.allocate_id();
        let store = DiskStore::open(id, dir.as_ref(), max_size)?;
        state.attach(store, false);
        Ok(id)
    }

    /// Close a store, dropping its routes. A closed primary is not replaced.
    pub fn close_store(&self, id: StoreId, flush_log: bool) -> bool {
        self.inner.state.lock().close_store(id, flush_log)
    }

    /// Current store for `id`: itself while open, the primary once closed.
    pub fn resolve_store(&self, id: StoreId) -> Option<StoreId> {
        self.inner.state.lock().resolve(id)
    }

    pub fn primary_store(&self) -> Option<StoreId> {
        self.inner.state.lock().primary
    }

    /// Mark `key` as just validated. With `refresh` the new date is logged.
    pub fn touch(&self, key: &CacheKey, refresh: bool) -> bool {
        self.inner.state.lock().touch(key, refresh, now_secs())
    }

    pub fn touch_url(&self, url: &str, refresh: bool) -> CacheResult<bool> {
        let key = CacheKey::normalize(url)?;
        Ok(self.touch(&key, refresh))
    }

    /// Forget `keys`. With `evict` the entries and payloads are removed from
    /// their stores; without it only the routes are dropped.
    pub fn delete(&self, keys: &[CacheKey], evict: bool) {
        let mut state = self.inner.state.lock();
        for key in keys {
            if evict {
                state.evict_routed(key);
            } else {
                state.index.remove(key);
            }
        }
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let state = self.inner.state.lock();
        let id = state.route(key)?;
        state.store(id)?.lookup(key).cloned()
    }

    /// Every cached entry, primary store first, least recently used first.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.inner.state.lock();
        state
            .stores
            .iter()
            .flat_map(|store| store.iter().cloned())
            .collect()
    }

    pub fn is_active(&self, key: &CacheKey) -> bool {
        self.inner.active.lock().contains_key(key)
    }

    /// Apply changed settings: re-select the freshness policy, resize the
    /// primary in place, and move to a new store if the directory changed.
    pub fn update_config(&self, config: CacheConfig) {
        let mut state = self.inner.state.lock();
        state.freshness = FreshnessPolicy::from_config(&config);

        let dir = config.resolved_directory();
        let current = state
            .primary
            .and_then(|id| state.store(id))
            .map(|store| store.directory().to_path_buf());

        if current.as_deref() == Some(dir.as_path()) {
            if let Some(primary) = state.primary_mut() {
                primary.set_max_size(config.max_size);
            }
        } else {
            if let Some(primary) = state.primary_mut() {
                if let Err(e) = primary.checkpoint() {
                    warn!(error = %e, "Checkpoint before directory change failed");
                }
            }
            info!(dir = ?dir, "Cache directory changed, switching stores");
            state.reset_primary(false, dir, config.max_size);
        }
        state.config = config;
    }

    /// Close the primary store and reopen it on the same directory. With
    /// `flush_log` the log is emptied first.
    pub fn reset_disk_cache(&self, flush_log: bool) {
        let mut state = self.inner.state.lock();
        let (dir, max_size) = match state.primary.and_then(|id| state.store(id)) {
            Some(store) => (store.directory().to_path_buf(), store.max_size()),
            None => (state.config.resolved_directory(), state.config.max_size),
        };
        state.reset_primary(flush_log, dir, max_size);
    }

    /// Delete every payload in the primary store and start it over empty.
    pub fn erase_cache(&self) {
        let mut state = self.inner.state.lock();
        let Some(primary) = state.primary_mut() else {
            return;
        };
        let removed = primary.erase_payloads();
        let dir = primary.directory().to_path_buf();
        let max_size = primary.max_size();
        info!(dir = ?dir, removed, "Erased disk cache");
        state.reset_primary(true, dir, max_size);
    }

    /// Delete payload files in the primary store that no entry references.
    pub fn erase_unlogged_files(&self) -> usize {
        self.inner
            .state
            .lock()
            .primary_mut()
            .map_or(0, |store| store.erase_unlogged_files())
    }

    /// Checkpoint every store. All stores are attempted; the first failure is
    /// returned.
    pub fn save_state(&self) -> CacheResult<()> {
        let mut state = self.inner.state.lock();
        let mut first_error = None;
        for store in &mut state.stores {
            if let Err(e) = store.checkpoint() {
                warn!(store = %store.id(), error = %e, "Checkpoint failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Checkpoint on the way out if configured to.
    pub fn shutdown(&self) -> CacheResult<()> {
        let checkpoint = self.inner.state.lock().config.checkpoint_on_exit;
        if checkpoint {
            self.save_state()?;
        }
        info!("Cache manager shut down");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let active = self.inner.active.lock().len();
        let state = self.inner.state.lock();
        CacheStats {
            stores: state.stores.len(),
            entries: state.stores.iter().map(DiskStore::len).sum(),
            size: state.stores.iter().map(DiskStore::size).sum(),
            max_size: state
                .primary
                .and_then(|id| state.store(id))
                .map_or(0, DiskStore::max_size),
            active,
        }
    }
}
