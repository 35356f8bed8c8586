use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::store::access::DiskCacheAccess;
use crate::store::entry::CacheEntry;
use crate::store::log::{LOG_FILE, LogRecord, TransactionLog};
use crate::store::lru::LruOrder;
use crate::store::naming::{FileNamer, is_payload_name};
use crate::store::{Document, ReadOutcome, StoreId};
use crate::time_value::TimeValue;

/// Report from freeing space in a store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MakeRoom {
    /// Keys evicted to make room, expired ones first
    pub evicted: Vec<CacheKey>,
    /// Set when the store ran out of entries before the budget was met
    pub exhausted: bool,
}

/// A persistent, size-budgeted store of cached documents in one directory.
///
/// `entries`, `lru` and `size` change only through this type's methods, and
/// every change is journaled after it has been applied in memory.
#[derive(Debug)]
pub struct DiskStore {
    id: StoreId,
    dir: PathBuf,
    entries: HashMap<CacheKey, CacheEntry>,
    lru: LruOrder,
    /// Keys of entries carrying an explicit expiry
    expiring: Vec<CacheKey>,
    size: u64,
    max_size: u64,
    log: TransactionLog,
    namer: FileNamer,
}

impl DiskStore {
    /// Open the store in `dir`, creating the directory and an empty log on
    /// first use, and replay the existing log.
    pub fn open(id: StoreId, dir: impl Into<PathBuf>, max_size: u64) -> CacheResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| CacheError::Storage {
            path: dir.clone(),
            source,
        })?;

        let replay = TransactionLog::replay(&dir, id)?;
        let log = TransactionLog::open(&dir)?;

        let expiring = replay
            .entries
            .values()
            .filter(|entry| entry.expires.is_some())
            .map(|entry| entry.key.clone())
            .collect();

        info!(
            store = %id,
            dir = ?dir,
            entries = replay.entries.len(),
            size = replay.size,
            max_size,
            "Opened disk store"
        );

        let mut store = Self {
            id,
            dir,
            entries: replay.entries,
            lru: replay.lru,
            expiring,
            size: replay.size,
            max_size,
            log,
            namer: FileNamer::default(),
        };

        // A rejected log is rewritten so the next start does not reject it again.
        if replay.discarded {
            store.checkpoint()?;
        }
        Ok(store)
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Change the budget in place. Takes effect on the next `add`.
    pub fn set_max_size(&mut self, max_size: u64) {
        self.max_size = max_size;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn namer_mut(&mut self) -> &mut FileNamer {
        &mut self.namer
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Entries from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = &CacheEntry> {
        self.lru.iter().filter_map(|key| self.entries.get(key))
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.lru.iter()
    }

    fn record(&mut self, record: LogRecord) {
        if let Err(e) = self.log.append(&record) {
            warn!(store = %self.id, error = %e, "Failed to append to transaction log");
        }
    }

    /// Move `key` to the most recently used position. Returns false if the
    /// key is not in this store.
    pub fn mark_used(&mut self, key: &CacheKey) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        self.lru.touch(key);
        self.record(LogRecord::Touch(key.clone()));
        true
    }

    /// Write `doc` to a new payload file and index it, evicting other
    /// entries first if the budget requires it. An existing entry for the
    /// same key is evicted first and reported in [`MakeRoom::evicted`].
    ///
    /// `expires_override` replaces any `Expires` header. On a write failure
    /// nothing is indexed and [`CacheError::Storage`] is returned; entries
    /// evicted before the failure stay evicted.
    pub fn add(
        &mut self,
        doc: &Document,
        expires_override: Option<i64>,
        now: i64,
    ) -> CacheResult<MakeRoom> {
        let replaced = self.contains(&doc.key);
        if replaced {
            self.evict(&doc.key)?;
        }

        let size = doc.len();
        let mut room = self.make_room(size, now);
        if replaced {
            room.evicted.insert(0, doc.key.clone());
        }

        let mut entry = CacheEntry::from_headers(
            doc.key.clone(),
            &doc.url,
            size,
            &doc.meta.headers,
            self.id,
            now,
        );
        if let Some(expires) = expires_override {
            entry.expires = Some(TimeValue::from_secs(expires));
        }
        entry.filename = self.namer.next_name(&entry.content_type);

        let path = self.dir.join(&entry.filename);
        if let Err(source) = write_payload(&path, doc) {
            warn!(path = ?path, error = %source, "Failed to write cache payload");
            let _ = fs::remove_file(&path);
            return Err(CacheError::Storage { path, source });
        }

        let key = entry.key.clone();
        if entry.expires.is_some() {
            self.expiring.push(key.clone());
        }
        self.size += size;
        self.lru.touch(&key);
        let record = LogRecord::Add(entry.clone());
        self.entries.insert(key.clone(), entry);
        self.record(record);

        debug!(store = %self.id, key = %key, size, "Added cache entry");
        Ok(room)
    }

    /// Replace the entry for `doc.key`. Same as [`DiskStore::add`], which
    /// already evicts a present key.
    pub fn update(
        &mut self,
        doc: &Document,
        expires_override: Option<i64>,
        now: i64,
    ) -> CacheResult<MakeRoom> {
        self.add(doc, expires_override, now)
    }

    /// Remove `key` and unlink its payload. A payload that is already gone is
    /// not an error; an unknown key is [`CacheError::NotFound`].
    pub fn evict(&mut self, key: &CacheKey) -> CacheResult<()> {
        let entry = self
            .entries
            .remove(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;
        self.lru.remove(key);
        if entry.expires.is_some() {
            self.expiring.retain(|k| k != key);
        }

        let path = self.dir.join(&entry.filename);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "Payload already gone");
            }
            Err(e) => warn!(path = ?path, error = %e, "Failed to remove cache payload"),
        }

        self.size -= entry.size;
        self.record(LogRecord::Delete(key.clone()));
        debug!(store = %self.id, key = %key, size = entry.size, "Evicted cache entry");
        Ok(())
    }

    /// Free space until `amount` more bytes fit: expired entries first, then
    /// least recently used. If the store empties first the report is marked
    /// exhausted and the caller proceeds over budget.
    pub fn make_room(&mut self, amount: u64, now: i64) -> MakeRoom {
        let mut room = MakeRoom::default();
        if self.size + amount <= self.max_size {
            return room;
        }

        room.evicted = self.evict_expired(now);

        while self.size + amount > self.max_size {
            let Some(key) = self.lru.least_recent().cloned() else {
                let exhausted = CacheError::CacheExhausted {
                    requested: amount,
                    max_size: self.max_size,
                };
                warn!(store = %self.id, error = %exhausted, "Proceeding over budget");
                room.exhausted = true;
                break;
            };
            if let Err(e) = self.evict(&key) {
                warn!(store = %self.id, key = %key, error = %e, "LRU order out of sync with entries");
                self.lru.remove(&key);
                continue;
            }
            room.evicted.push(key);
        }
        room
    }

    /// Evict entries whose expiry is at or before `now`, earliest first,
    /// stopping at the first one still in the future.
    pub fn evict_expired(&mut self, now: i64) -> Vec<CacheKey> {
        let mut expiring: Vec<(i64, CacheKey)> = self
            .expiring
            .iter()
            .filter_map(|key| {
                let expires = self.entries.get(key)?.expires.as_ref()?;
                Some((expires.to_seconds(), key.clone()))
            })
            .collect();
        expiring.sort();

        let mut evicted = Vec::new();
        for (expires, key) in expiring {
            if expires > now {
                break;
            }
            if self.evict(&key).is_ok() {
                evicted.push(key);
            }
        }
        evicted
    }

    /// Open a read handle for `key`, marking it used. Expired entries and
    /// missing payloads come back as [`ReadOutcome::NeedsEviction`].
    pub fn get_read_handle(&mut self, key: &CacheKey, now: i64) -> CacheResult<ReadOutcome> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::NotFound(key.to_string()))?;

        if entry.is_expired_at(now) {
            return Ok(ReadOutcome::NeedsEviction(CacheError::Expired));
        }

        self.mark_used(key);
        match DiskCacheAccess::open(&self.dir, &self.entries[key]) {
            Ok(access) => Ok(ReadOutcome::Hit(access)),
            Err(e) if e.needs_eviction() => Ok(ReadOutcome::NeedsEviction(e)),
            Err(e) => Err(e),
        }
    }

    /// Record a fresh validation of `key` at `now`. With `refresh` the new
    /// date is journaled; otherwise it only lives until the next checkpoint.
    pub fn touch(&mut self, key: &CacheKey, refresh: bool, now: i64) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        entry.touch(now);
        if refresh {
            let record = LogRecord::Add(entry.clone());
            self.record(record);
        }
        true
    }

    /// Compact the log down to the live entries.
    pub fn checkpoint(&mut self) -> CacheResult<()> {
        let entries: Vec<&CacheEntry> = self
            .lru
            .iter()
            .filter_map(|key| self.entries.get(key))
            .collect();
        self.log.checkpoint(entries)
    }

    /// Close the store and return the keys it held. With `flush_log` the log
    /// is rewritten empty; otherwise it is left as is for a later reopen.
    pub fn close(mut self, flush_log: bool) -> Vec<CacheKey> {
        let keys: Vec<CacheKey> = self.lru.iter().cloned().collect();
        if flush_log {
            if let Err(e) = self.log.checkpoint(std::iter::empty()) {
                warn!(store = %self.id, error = %e, "Failed to flush log on close");
            }
        }
        self.log.close();
        info!(store = %self.id, dir = ?self.dir, entries = keys.len(), "Closed disk store");
        keys
    }

    /// Unlink every payload file in the directory, indexed or not. The index
    /// is left untouched; the caller resets the store afterwards.
    pub fn erase_payloads(&self) -> usize {
        self.remove_payloads(|_| true)
    }

    /// Unlink payload files that no live entry references.
    pub fn erase_unlogged_files(&self) -> usize {
        let known: std::collections::HashSet<&str> = self
            .entries
            .values()
            .map(|entry| entry.filename.as_str())
            .collect();
        self.remove_payloads(|name| name != LOG_FILE && !known.contains(name))
    }

    fn remove_payloads(&self, mut wanted: impl FnMut(&str) -> bool) -> usize {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(dir = ?self.dir, error = %e, "Failed to list cache directory");
                return 0;
            }
        };

        let mut removed = 0;
        for dirent in dir.flatten() {
            let name = dirent.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_payload_name(name) || !wanted(name) {
                continue;
            }
            match fs::remove_file(dirent.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = ?dirent.path(), error = %e, "Failed to remove payload"),
            }
        }
        debug!(dir = ?self.dir, removed, "Removed payload files");
        removed
    }
}

fn write_payload(path: &Path, doc: &Document) -> io::Result<()> {
    let mut file = File::create(path)?;
    for chunk in &doc.body {
        file.write_all(chunk)?;
    }
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResponseMeta;
    use bytes::Bytes;
    use reqwest::header::{EXPIRES, HeaderMap, HeaderValue};
    use tempfile::{TempDir, tempdir};

    const NOW: i64 = 1_700_000_000;

    fn open(dir: &TempDir, max_size: u64) -> DiskStore {
        DiskStore::open(StoreId(1), dir.path(), max_size).unwrap()
    }

    fn doc(url: &str, size: usize) -> Document {
        doc_with_headers(url, size, HeaderMap::new())
    }

    fn doc_with_headers(url: &str, size: usize, headers: HeaderMap) -> Document {
        Document {
            key: CacheKey::normalize(url).unwrap(),
            url: url.to_string(),
            meta: ResponseMeta::new(200, "OK", headers),
            body: vec![Bytes::from(vec![b'x'; size])],
        }
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::normalize(url).unwrap()
    }

    fn assert_consistent(store: &DiskStore) {
        let total: u64 = store.entries.values().map(|e| e.size).sum();
        assert_eq!(store.size, total);
        assert_eq!(store.lru.len(), store.entries.len());
        assert!(store.lru.iter().all(|k| store.entries.contains_key(k)));
    }

    #[test]
    fn second_add_evicts_least_recent() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);

        store.add(&doc("http://x.test/x", 600), None, NOW).unwrap();
        assert_eq!(store.size(), 600);

        let room = store.add(&doc("http://x.test/y", 500), None, NOW).unwrap();
        assert_eq!(room.evicted, vec![key("http://x.test/x")]);
        assert!(!room.exhausted);
        assert_eq!(store.size(), 500);
        assert_eq!(store.len(), 1);
        assert!(store.contains(&key("http://x.test/y")));
        assert_consistent(&store);
    }

    #[test]
    fn lru_eviction_skips_recently_used() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 300);
        for name in ["a", "b", "c"] {
            store.add(&doc(&format!("http://x.test/{name}"), 100), None, NOW).unwrap();
        }
        store.mark_used(&key("http://x.test/b"));
        store.mark_used(&key("http://x.test/c"));

        let room = store.add(&doc("http://x.test/d", 100), None, NOW).unwrap();
        assert_eq!(room.evicted, vec![key("http://x.test/a")]);
        assert_consistent(&store);
    }

    #[test]
    fn expired_entries_go_first() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 10_000);
        store.add(&doc("http://x.test/t1", 10), Some(NOW - 20), NOW).unwrap();
        store.add(&doc("http://x.test/t2", 10), Some(NOW - 10), NOW).unwrap();
        store.add(&doc("http://x.test/t3", 10), Some(NOW + 60), NOW).unwrap();
        store.add(&doc("http://x.test/plain", 10), None, NOW).unwrap();

        let evicted = store.evict_expired(NOW);
        assert_eq!(evicted, vec![key("http://x.test/t1"), key("http://x.test/t2")]);
        assert!(store.contains(&key("http://x.test/t3")));
        assert!(store.contains(&key("http://x.test/plain")));
        assert_consistent(&store);
    }

    #[test]
    fn expiry_equal_to_now_is_swept() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 10_000);
        store.add(&doc("http://x.test/edge", 10), Some(NOW), NOW).unwrap();
        assert_eq!(store.evict_expired(NOW).len(), 1);
    }

    #[test]
    fn expires_header_is_used_without_override() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 10_000);
        let mut headers = HeaderMap::new();
        headers.insert(EXPIRES, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        store
            .add(&doc_with_headers("http://x.test/old", 10, headers), None, NOW)
            .unwrap();
        assert_eq!(store.evict_expired(NOW), vec![key("http://x.test/old")]);
    }

    #[test]
    fn exhausted_store_goes_over_budget() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 100);
        store.add(&doc("http://x.test/small", 50), None, NOW).unwrap();

        let room = store.add(&doc("http://x.test/huge", 500), None, NOW).unwrap();
        assert!(room.exhausted);
        assert_eq!(room.evicted, vec![key("http://x.test/small")]);
        assert_eq!(store.size(), 500);
        assert_consistent(&store);
    }

    #[test]
    fn double_evict_is_not_found() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();

        store.evict(&key("http://x.test/a")).unwrap();
        let err = store.evict(&key("http://x.test/a")).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
        assert_consistent(&store);
    }

    #[test]
    fn evict_tolerates_missing_payload() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();
        let file = store.lookup(&key("http://x.test/a")).unwrap().filename.clone();
        fs::remove_file(dir.path().join(file)).unwrap();

        store.evict(&key("http://x.test/a")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn expired_read_needs_eviction() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/stale", 10), Some(NOW - 10), NOW - 100).unwrap();

        let outcome = store.get_read_handle(&key("http://x.test/stale"), NOW).unwrap();
        assert!(matches!(outcome, ReadOutcome::NeedsEviction(CacheError::Expired)));
    }

    #[test]
    fn missing_payload_read_needs_eviction() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/gone", 10), None, NOW).unwrap();
        let file = store.lookup(&key("http://x.test/gone")).unwrap().filename.clone();
        fs::remove_file(dir.path().join(file)).unwrap();

        let outcome = store.get_read_handle(&key("http://x.test/gone"), NOW).unwrap();
        assert!(matches!(
            outcome,
            ReadOutcome::NeedsEviction(CacheError::MissingPayload { .. })
        ));
    }

    #[test]
    fn read_hit_marks_used() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();
        store.add(&doc("http://x.test/b", 10), None, NOW).unwrap();

        let outcome = store.get_read_handle(&key("http://x.test/a"), NOW).unwrap();
        assert!(matches!(outcome, ReadOutcome::Hit(_)));
        assert_eq!(store.lru.least_recent(), Some(&key("http://x.test/b")));
    }

    #[test]
    fn reopen_replays_to_identical_state() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 250);
        for name in ["a", "b", "c", "d"] {
            store.add(&doc(&format!("http://x.test/{name}"), 60), None, NOW).unwrap();
        }
        store.mark_used(&key("http://x.test/b"));
        store.evict(&key("http://x.test/c")).unwrap();
        store.add(&doc("http://x.test/e", 100), Some(NOW + 100), NOW).unwrap();
        store.touch(&key("http://x.test/d"), true, NOW + 5);

        let live_order: Vec<CacheKey> = store.keys().cloned().collect();
        let live_entries = store.entries.clone();
        let live_size = store.size();
        drop(store.close(false));

        let reopened = open(&dir, 250);
        let order: Vec<CacheKey> = reopened.keys().cloned().collect();
        assert_eq!(order, live_order);
        assert_eq!(reopened.entries, live_entries);
        assert_eq!(reopened.size(), live_size);
        assert_eq!(reopened.expiring.len(), 1);
        assert_consistent(&reopened);
    }

    #[test]
    fn close_with_flush_empties_log() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();
        let keys = store.close(true);
        assert_eq!(keys, vec![key("http://x.test/a")]);

        let reopened = open(&dir, 1000);
        assert!(reopened.is_empty());
    }

    #[test]
    fn update_replaces_entry() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();
        let old = store.lookup(&key("http://x.test/a")).unwrap().filename.clone();

        let room = store.update(&doc("http://x.test/a", 20), None, NOW).unwrap();
        assert_eq!(room.evicted, vec![key("http://x.test/a")]);
        assert_eq!(store.size(), 20);
        assert!(!dir.path().join(old).exists());
        assert_consistent(&store);
    }

    #[test]
    fn add_on_present_key_replaces_entry() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 4), Some(NOW + 60), NOW).unwrap();
        let old = store.lookup(&key("http://x.test/a")).unwrap().filename.clone();

        let room = store.add(&doc("http://x.test/a", 2), Some(NOW + 60), NOW).unwrap();
        assert_eq!(room.evicted, vec![key("http://x.test/a")]);
        assert_eq!(store.size(), 2);
        assert_eq!(store.expiring.len(), 1);
        assert!(!dir.path().join(old).exists());
        assert_consistent(&store);

        drop(store.close(false));
        let reopened = open(&dir, 1000);
        assert_eq!(reopened.size(), 2);
        assert_consistent(&reopened);
    }

    #[test]
    fn non_http_dates_survive_replay() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        let mut headers = HeaderMap::new();
        headers.insert(EXPIRES, HeaderValue::from_static("2030-01-01T00:00:00Z"));
        store
            .add(&doc_with_headers("http://x.test/iso", 10, headers), None, NOW)
            .unwrap();
        drop(store.close(false));

        let reopened = open(&dir, 1000);
        assert_eq!(reopened.len(), 1);
        let entry = reopened.lookup(&key("http://x.test/iso")).unwrap();
        assert_eq!(entry.expires.as_ref().unwrap().to_seconds(), 0);
    }

    #[test]
    fn failed_payload_write_indexes_nothing() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let mut store = DiskStore::open(StoreId(1), &store_dir, 1000).unwrap();
        store.add(&doc("http://x.test/kept", 10), None, NOW).unwrap();

        // Payload creation fails once the directory is replaced by a file.
        fs::remove_dir_all(&store_dir).unwrap();
        fs::write(&store_dir, b"").unwrap();

        let err = store.add(&doc("http://x.test/new", 10), None, NOW).unwrap_err();
        assert!(matches!(err, CacheError::Storage { .. }));
        assert!(!store.contains(&key("http://x.test/new")));
        assert!(store.contains(&key("http://x.test/kept")));
        assert_eq!(store.size(), 10);
        assert_consistent(&store);
    }

    #[test]
    fn prune_removes_only_unlogged_payloads() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        store.add(&doc("http://x.test/a", 10), None, NOW).unwrap();
        fs::write(dir.path().join("doc1-99.html"), b"orphan").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep").unwrap();

        assert_eq!(store.erase_unlogged_files(), 1);
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(store.erase_payloads(), 1);
        assert!(dir.path().join(LOG_FILE).exists());
    }

    #[test]
    fn budget_holds_across_many_adds() {
        let dir = tempdir().unwrap();
        let mut store = open(&dir, 1000);
        for i in 0..40u64 {
            let size = 50 + (i * 37) % 200;
            let room = store
                .add(&doc(&format!("http://x.test/{i}"), size as usize), None, NOW)
                .unwrap();
            assert!(!room.exhausted);
            assert!(store.size() <= store.max_size());
            assert_consistent(&store);
        }
    }
}
