//! Disk Tier
//!
//! Element store backed by a flat data file and an in-memory index.
//!
//! # Design
//!
//! - Puts land in a [`SpoolBuffer`] and return immediately
//! - A single worker thread drains the spool, allocating blocks with a
//!   first-fit [`BlockAllocator`] and recording them in the [`DiskIndex`]
//! - Reads check the spool, then the batch being drained, then the index
//! - Removes are applied eagerly to all three
//! - A persistent store writes the index on flush and trusts it on the next
//!   start only when it is fresh and intact; anything else starts empty

mod allocator;
mod file;
mod index;
mod spool;
mod worker;

pub use allocator::{BlockAllocator, BlockDescriptor, FreeRange};
pub use file::StripedFile;
pub use index::{DiskIndex, CLOCK_SKEW, INDEX_MAGIC, INDEX_VERSION};
pub use spool::SpoolBuffer;
pub use worker::{Command, WorkerHandle, DEFAULT_SHUTDOWN_TIMEOUT};

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument, warn};

use super::codec;
use super::config::DiskConfig;
use super::element::{now_millis, Element, ElementKey};
use super::events::{CacheWriter, EventNotifier};
use super::policy::EvictionPolicy;
use super::stats::{StatsSnapshot, TierStats};
use super::{Status, Store, MAX_EVICTIONS_PER_PUT};
use crate::error::{Error, Result};

/// Pause before the second serialization attempt
const SERIALIZATION_RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Index and in-flight batch, guarded together
#[derive(Debug, Default)]
struct DiskState {
    index: DiskIndex,
    /// Elements taken from the spool and not yet written
    draining: HashMap<ElementKey, Element>,
}

/// State shared between the store handle and its worker
pub(crate) struct DiskInner {
    config: DiskConfig,
    spool: SpoolBuffer,
    state: RwLock<DiskState>,
    file: StripedFile,
    notifier: Arc<EventNotifier>,
    stats: TierStats,
    rng: Mutex<SmallRng>,
    /// Element cap (0 = unbounded)
    capacity: AtomicUsize,
    /// Size of the most recent record written, for `buffer_full`
    last_record_len: AtomicU64,
    /// Index changed since it was last saved
    dirty: AtomicBool,
    active: AtomicBool,
}

impl DiskInner {
    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn spool_interval(&self) -> Duration {
        self.config.spool_interval()
    }

    /// Expiry sweep interval; `None` when nothing can expire by default
    pub(crate) fn expiry_interval(&self) -> Option<Duration> {
        if self.config.lifespan.eternal {
            None
        } else {
            Some(self.config.expiry_interval())
        }
    }

    /// Write every staged element to the data file
    #[instrument(level = "debug", skip(self), fields(store = %self.config.name))]
    pub(crate) fn drain_spool(&self) {
        let keys: Vec<ElementKey> = {
            // State before spool, the same order removes use
            let mut state = self.state.write();
            let batch = self.spool.swap();
            let mut keys = Vec::with_capacity(batch.len());
            for (key, element) in batch {
                keys.push(key.clone());
                state.draining.insert(key, element);
            }
            keys
        };
        if keys.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        let mut written = 0usize;
        for key in &keys {
            if self.write_staged(key, &mut evicted) {
                written += 1;
            }
        }
        self.stats.record_spool_flush();

        for element in &evicted {
            self.notifier.notify_evicted(element);
        }

        debug!(
            staged = keys.len(),
            written,
            evicted = evicted.len(),
            "Spool drained"
        );
    }

    /// Serialize and write one drained element; `false` if it was dropped
    fn write_staged(&self, key: &ElementKey, evicted: &mut Vec<Element>) -> bool {
        let element = match self.state.read().draining.get(key) {
            Some(element) => element.clone(),
            None => return false,
        };

        let record = match self.serialize(&element) {
            Ok(record) => record,
            Err(e) => {
                warn!(store = %self.config.name, key = %key, error = %e, "Dropping element that failed to serialize");
                self.state.write().draining.remove(key);
                self.stats.record_write_failure();
                return false;
            }
        };
        let len = record.len() as u32;

        let mut state = self.state.write();
        if state.draining.remove(key).is_none() {
            // Removed while serializing
            return false;
        }

        state.index.remove(key);
        self.evict_for_admission(&mut state, evicted);

        let (offset, block_size) = state.index.allocate(len);
        state.index.insert(BlockDescriptor {
            key: key.clone(),
            offset,
            block_size,
            payload_size: len,
            expiry_time: element.expiration_time(),
            creation_time: element.creation_time(),
            last_access_time: AtomicU64::new(element.last_access_time()),
            hit_count: AtomicU64::new(element.hit_count()),
        });
        self.dirty.store(true, Ordering::Release);

        if let Err(e) = self.file.write_at(key, offset, &record) {
            error!(store = %self.config.name, key = %key, offset, error = %e, "Failed to write element");
            state.index.remove(key);
            self.stats.record_write_failure();
            return false;
        }

        self.last_record_len.store(len as u64, Ordering::Relaxed);
        self.stats.record_write(len as u64);
        true
    }

    /// Encode, retrying once if the element changed underneath
    fn serialize(&self, element: &Element) -> Result<Bytes> {
        self.serialize_with(element, codec::encode)
    }

    fn serialize_with<F>(&self, element: &Element, mut encode: F) -> Result<Bytes>
    where
        F: FnMut(&Element) -> Result<Bytes>,
    {
        match encode(element) {
            Err(e) if e.is_transient() => {
                debug!(store = %self.config.name, key = %element.key(), "Retrying serialization");
                std::thread::sleep(SERIALIZATION_RETRY_BACKOFF);
                encode(element)
            }
            other => other,
        }
    }

    /// Make room for one more element by LFU sampling
    fn evict_for_admission(&self, state: &mut DiskState, evicted: &mut Vec<Element>) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        if capacity == 0 {
            return;
        }

        let overflow = (state.index.len() + 1).saturating_sub(capacity);
        let listening = self.notifier.has_listeners();

        for _ in 0..overflow.min(MAX_EVICTIONS_PER_PUT) {
            let victim = {
                let mut rng = self.rng.lock();
                let sample = state.index.sample(&mut *rng);
                EvictionPolicy::Lfu
                    .select_victim(&sample, None)
                    .map(|d| d.key.clone())
            };
            let Some(victim) = victim else { break };

            if listening {
                if let Some(descriptor) = state.index.get(&victim) {
                    match self.read_record(descriptor) {
                        Ok(element) => evicted.push(element),
                        Err(e) => {
                            warn!(store = %self.config.name, key = %victim, error = %e, "Evicting unreadable element")
                        }
                    }
                }
            }

            state.index.remove(&victim);
            self.stats.record_eviction();
        }
    }

    /// Read and decode the record a descriptor points at
    fn read_record(&self, descriptor: &BlockDescriptor) -> Result<Element> {
        let bytes = self.file.read_at(
            &descriptor.key,
            descriptor.offset,
            descriptor.payload_size as usize,
        )?;
        let element = codec::decode(&bytes)?;
        if element.key() != &descriptor.key {
            return Err(Error::Decode(format!(
                "block at offset {} holds {} instead of {}",
                descriptor.offset,
                element.key(),
                descriptor.key
            )));
        }
        Ok(element)
    }

    /// Find an element in the spool, the draining batch or on disk
    fn lookup(&self, key: &ElementKey, touch: bool) -> Option<Element> {
        let staged = if touch {
            self.spool.touch(key)
        } else {
            self.spool.get(key)
        };
        if staged.is_some() {
            return staged;
        }

        let state = self.state.read();
        if let Some(element) = state.draining.get(key) {
            if touch {
                element.record_access();
            }
            return Some(element.clone());
        }

        let descriptor = state.index.get(key)?;
        match self.read_record(descriptor) {
            Ok(element) => {
                if touch {
                    descriptor.record_hit(now_millis());
                    element.record_access();
                }
                Some(element)
            }
            Err(e) => {
                warn!(store = %self.config.name, key = %key, error = %e, "Failed to read element");
                None
            }
        }
    }

    /// Remove a key from every stage, returning the newest copy
    fn remove_entry(&self, key: &ElementKey) -> Option<Element> {
        let mut state = self.state.write();
        let staged = self.spool.remove(key);
        let draining = state.draining.remove(key);

        let on_disk = match state.index.get(key) {
            Some(descriptor) if staged.is_none() && draining.is_none() => {
                match self.read_record(descriptor) {
                    Ok(element) => Some(element),
                    Err(e) => {
                        warn!(store = %self.config.name, key = %key, error = %e, "Removing unreadable element");
                        None
                    }
                }
            }
            _ => None,
        };
        if state.index.remove(key).is_some() {
            self.dirty.store(true, Ordering::Release);
        }

        staged.or(draining).or(on_disk)
    }

    /// Sweep expired elements from every stage
    #[instrument(level = "debug", skip(self), fields(store = %self.config.name))]
    pub(crate) fn expire_now(&self) {
        let now = now_millis();
        let listening = self.notifier.has_listeners();
        let mut expired = Vec::new();
        let mut count = 0usize;

        {
            let mut state = self.state.write();

            let staged = self.spool.take_expired(now);
            count += staged.len();
            expired.extend(staged);

            let stale: Vec<ElementKey> = state
                .draining
                .iter()
                .filter(|(_, e)| e.is_expired_at(now))
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                if let Some(element) = state.draining.remove(&key) {
                    count += 1;
                    expired.push(element);
                }
            }

            for key in state.index.expired_keys(now) {
                if listening {
                    if let Some(descriptor) = state.index.get(&key) {
                        match self.read_record(descriptor) {
                            Ok(element) => expired.push(element),
                            Err(e) => {
                                warn!(key = %key, error = %e, "Expiring unreadable element")
                            }
                        }
                    }
                }
                state.index.remove(&key);
                self.dirty.store(true, Ordering::Release);
                count += 1;
            }
        }

        for _ in 0..count {
            self.stats.record_expiration();
        }
        if listening {
            for element in &expired {
                self.notifier.notify_expired(element);
            }
        }
        if count > 0 {
            debug!(expired = count, "Expiry sweep finished");
        }
    }

    /// Drain the spool and persist the index if it changed
    pub(crate) fn flush_now(&self) -> Result<()> {
        self.drain_spool();

        if !self.config.persistent || !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.file.sync().and_then(|()| {
            let state = self.state.read();
            state.index.save(&self.config.index_file())
        });
        if let Err(e) = &result {
            error!(store = %self.config.name, error = %e, "Failed to write disk index");
        }
        result
    }
}

/// Spooled, block-allocated disk tier
pub struct DiskStore {
    inner: Arc<DiskInner>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl DiskStore {
    /// Open (or create) the store described by `config`
    ///
    /// Only failure to create the directory or open the data file is an
    /// error; an unusable index degrades to an empty store.
    pub fn open(config: DiskConfig, notifier: Arc<EventNotifier>) -> Result<Self> {
        config.validate()?;
        let construction = |reason: String| Error::Construction {
            store: config.name.clone(),
            reason,
        };

        fs::create_dir_all(&config.directory).map_err(|e| {
            construction(format!(
                "cannot create directory {}: {}",
                config.directory.display(),
                e
            ))
        })?;

        let data_path = config.data_file();
        let index_path = config.index_file();

        if !config.persistent {
            remove_if_exists(&data_path).map_err(|e| construction(e.to_string()))?;
            remove_if_exists(&index_path).map_err(|e| construction(e.to_string()))?;
        } else if !data_path.exists() && index_path.exists() {
            debug!(store = %config.name, "Deleting index without a data file");
            remove_if_exists(&index_path).map_err(|e| construction(e.to_string()))?;
        }

        let file = StripedFile::open(&data_path, config.effective_stripes()).map_err(|e| {
            construction(format!("cannot open {}: {}", data_path.display(), e))
        })?;

        let (index, recovered) = if config.persistent {
            recover_index(&config, &file)
        } else {
            (DiskIndex::new(), false)
        };

        let rng = match config.sample_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        info!(
            store = %config.name,
            path = %data_path.display(),
            persistent = config.persistent,
            entries = index.len(),
            "Disk store opened"
        );

        let inner = Arc::new(DiskInner {
            capacity: AtomicUsize::new(config.capacity),
            spool: SpoolBuffer::new(),
            state: RwLock::new(DiskState {
                index,
                draining: HashMap::new(),
            }),
            file,
            notifier,
            stats: TierStats::new(),
            rng: Mutex::new(rng),
            last_record_len: AtomicU64::new(0),
            // The index file was truncated on load and must be rewritten
            dirty: AtomicBool::new(recovered),
            active: AtomicBool::new(true),
            config,
        });

        let worker = WorkerHandle::spawn(inner.clone())?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Open with a fresh notifier and no listeners
    pub fn open_default(config: DiskConfig) -> Result<Self> {
        Self::open(config, Arc::new(EventNotifier::new()))
    }

    pub fn config(&self) -> &DiskConfig {
        &self.inner.config
    }

    /// Notifier used for eviction and expiry events
    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.inner.notifier
    }

    /// Change the element cap; existing elements are evicted lazily
    pub fn set_disk_capacity(&self, capacity: usize) {
        self.inner.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn disk_capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Current data file length
    pub fn data_file_size(&self) -> u64 {
        self.inner.file.len().unwrap_or(0)
    }

    /// Current index file length
    pub fn index_file_size(&self) -> u64 {
        fs::metadata(self.inner.config.index_file())
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Fraction of the data file not occupied by live records
    pub fn sparseness(&self) -> f64 {
        let size = self.data_file_size();
        if size == 0 {
            return 0.0;
        }
        let used = self.inner.state.read().index.used_bytes();
        1.0 - (used as f64 / size as f64)
    }

    pub fn is_worker_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|w| w.is_alive())
            .unwrap_or(false)
    }

    fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::NotActive(self.inner.config.name.clone()))
        }
    }
}

impl Store for DiskStore {
    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn put(&self, mut element: Element) -> Result<bool> {
        self.ensure_active()?;
        element.apply_default_lifespan(self.inner.config.lifespan.lifespan());

        if codec::record_len(&element) > u32::MAX as usize {
            warn!(
                store = %self.inner.config.name,
                key = %element.key(),
                size = element.size(),
                "Element too large for the disk tier, ignoring put"
            );
            return Ok(false);
        }

        let key = element.key().clone();
        let replaced_staged = self.inner.spool.insert(element).is_some();
        self.inner.stats.record_put();
        if replaced_staged {
            return Ok(false);
        }

        let state = self.inner.state.read();
        Ok(!state.draining.contains_key(&key) && !state.index.contains_key(&key))
    }

    fn put_with_writer(&self, _element: Element, _writer: &dyn CacheWriter) -> Result<bool> {
        Err(Error::Unsupported(format!(
            "disk store {} does not support writers",
            self.inner.config.name
        )))
    }

    fn get(&self, key: &ElementKey) -> Option<Element> {
        if !self.is_active() {
            return None;
        }

        match self.inner.lookup(key, true) {
            Some(element) if element.is_expired() => {
                if let Some(removed) = self.inner.remove_entry(key) {
                    self.inner.stats.record_expiration();
                    self.inner.notifier.notify_expired(&removed);
                }
                self.inner.stats.record_miss();
                None
            }
            Some(element) => {
                self.inner.stats.record_hit();
                Some(element)
            }
            None => {
                self.inner.stats.record_miss();
                None
            }
        }
    }

    fn get_quiet(&self, key: &ElementKey) -> Option<Element> {
        if !self.is_active() {
            return None;
        }
        self.inner.lookup(key, false).filter(|e| !e.is_expired())
    }

    fn remove(&self, key: &ElementKey) -> Result<Option<Element>> {
        self.ensure_active()?;
        let removed = self.inner.remove_entry(key);
        if removed.is_some() {
            self.inner.stats.record_removal();
        }
        Ok(removed)
    }

    fn remove_all(&self) -> Result<()> {
        self.ensure_active()?;

        let mut state = self.inner.state.write();
        self.inner.spool.clear();
        state.draining.clear();
        state.index.clear();
        self.inner.file.set_len(0)?;
        truncate_if_exists(&self.inner.config.index_file())?;
        self.inner.dirty.store(true, Ordering::Release);

        debug!(store = %self.inner.config.name, "Disk store cleared");
        Ok(())
    }

    fn contains_key(&self, key: &ElementKey) -> bool {
        if !self.is_active() {
            return false;
        }
        if self.inner.spool.contains_key(key) {
            return true;
        }
        let state = self.inner.state.read();
        state.draining.contains_key(key) || state.index.contains_key(key)
    }

    fn keys(&self) -> Vec<ElementKey> {
        if !self.is_active() {
            return Vec::new();
        }
        let state = self.inner.state.read();
        let mut keys: Vec<ElementKey> = state.index.keys().cloned().collect();
        keys.extend(
            state
                .draining
                .keys()
                .filter(|k| !state.index.contains_key(k))
                .cloned(),
        );
        keys.extend(
            self.inner
                .spool
                .keys()
                .into_iter()
                .filter(|k| !state.index.contains_key(k) && !state.draining.contains_key(k)),
        );
        keys
    }

    fn len(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        let state = self.inner.state.read();
        let draining_only = state
            .draining
            .keys()
            .filter(|k| !state.index.contains_key(k))
            .count();
        let spool_only = self
            .inner
            .spool
            .keys()
            .iter()
            .filter(|k| !state.index.contains_key(k) && !state.draining.contains_key(k))
            .count();
        state.index.len() + draining_only + spool_only
    }

    fn in_memory_len(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.inner.spool.len() + self.inner.state.read().draining.len()
    }

    fn on_disk_len(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.inner.state.read().index.len()
    }

    fn on_disk_size_in_bytes(&self) -> u64 {
        if !self.is_active() {
            return 0;
        }
        self.inner.state.read().index.used_bytes()
    }

    fn buffer_full(&self) -> bool {
        let staged = self.inner.spool.len() as u64;
        staged * self.inner.last_record_len.load(Ordering::Relaxed)
            > self.inner.config.spool_buffer_bytes
    }

    fn expire_elements(&self) {
        if self.is_active() {
            self.inner.expire_now();
        }
    }

    fn flush(&self) -> Result<()> {
        self.ensure_active()?;
        let worker = self.worker.lock();
        match worker.as_ref() {
            Some(worker) => worker.flush(DEFAULT_SHUTDOWN_TIMEOUT),
            None => Err(Error::WorkerUnavailable(self.inner.config.name.clone())),
        }
    }

    fn dispose(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let name = &self.inner.config.name;

        if let Some(worker) = self.worker.lock().take() {
            if let Err(e) = worker.flush(DEFAULT_SHUTDOWN_TIMEOUT) {
                warn!(store = %name, error = %e, "Final flush failed");
            }
            if let Err(e) = worker.stop(DEFAULT_SHUTDOWN_TIMEOUT) {
                warn!(store = %name, error = %e, "Disk worker did not stop cleanly");
            }
        }

        if !self.inner.config.persistent {
            for path in [self.inner.config.data_file(), self.inner.config.index_file()] {
                if let Err(e) = remove_if_exists(&path) {
                    warn!(store = %name, path = %path.display(), error = %e, "Failed to delete store file");
                }
            }
        }

        info!(store = %name, "Disk store disposed");
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        EvictionPolicy::Lfu
    }

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()> {
        Err(Error::Unsupported(format!(
            "disk store {} always evicts by LFU, cannot switch to {}",
            self.inner.config.name, policy
        )))
    }

    fn is_persistent(&self) -> bool {
        self.inner.config.persistent
    }

    fn status(&self) -> Status {
        if self.is_active() {
            Status::Alive
        } else {
            Status::Shutdown
        }
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("name", &self.inner.config.name)
            .field("persistent", &self.inner.config.persistent)
            .field("status", &self.status())
            .finish()
    }
}

/// Load the persisted index, or start empty with a truncated data file
///
/// Returns the index and whether it came from disk.
fn recover_index(config: &DiskConfig, file: &StripedFile) -> (DiskIndex, bool) {
    let index_path = config.index_file();

    let outcome = if index_path.exists() {
        DiskIndex::load(&index_path, file.path())
    } else {
        match file.len() {
            Ok(0) => return (DiskIndex::new(), false),
            Ok(_) => Err(Error::CorruptIndex("index file is missing".into())),
            Err(e) => Err(e),
        }
    };

    match outcome {
        Ok(index) => {
            info!(store = %config.name, entries = index.len(), "Recovered disk index");
            (index, true)
        }
        Err(e) => {
            warn!(store = %config.name, error = %e, "Discarding disk contents");
            if let Err(e) = file.set_len(0) {
                warn!(store = %config.name, error = %e, "Failed to truncate data file");
            }
            (DiskIndex::new(), false)
        }
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn truncate_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::OpenOptions::new().write(true).open(path) {
        Ok(file) => file.set_len(0),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::events::RecordingListener;
    use assert_matches::assert_matches;

    fn config(dir: &Path, name: &str) -> DiskConfig {
        DiskConfig {
            name: name.to_string(),
            directory: dir.to_path_buf(),
            spool_interval_ms: 10,
            sample_seed: Some(42),
            ..Default::default()
        }
    }

    fn element(key: &str, value: &[u8]) -> Element {
        Element::new(key, Bytes::copy_from_slice(value))
    }

    #[test]
    fn test_put_visible_before_and_after_drain() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();

        assert!(store.put(element("a", b"one")).unwrap());
        assert!(!store.put(element("a", b"two")).unwrap());
        assert_eq!(store.get(&ElementKey::from("a")).unwrap().value().as_ref(), b"two");

        store.flush().unwrap();
        assert_eq!(store.on_disk_len(), 1);
        assert_eq!(store.in_memory_len(), 0);
        assert_eq!(store.get(&ElementKey::from("a")).unwrap().value().as_ref(), b"two");
        assert!(!store.put(element("a", b"three")).unwrap());
    }

    #[test]
    fn test_serialization_retried_once_on_concurrent_modification() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();
        let e = element("racy", b"value");
        let modified = || {
            Err(Error::ConcurrentModification {
                key: "racy".to_string(),
            })
        };

        let mut attempts = 0;
        let record = store
            .inner
            .serialize_with(&e, |element| {
                attempts += 1;
                if attempts == 1 {
                    modified()
                } else {
                    codec::encode(element)
                }
            })
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(codec::decode(&record).unwrap().key(), e.key());

        let mut attempts = 0;
        let result = store.inner.serialize_with(&e, |_| {
            attempts += 1;
            modified()
        });
        assert_matches!(result, Err(Error::ConcurrentModification { .. }));
        assert_eq!(attempts, 2);

        let mut attempts = 0;
        let result = store.inner.serialize_with(&e, |_| {
            attempts += 1;
            Err(Error::Encode("broken".to_string()))
        });
        assert_matches!(result, Err(Error::Encode(_)));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_remove_is_eager() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();

        store.put(element("staged", b"1")).unwrap();
        store.put(element("written", b"2")).unwrap();
        store.flush().unwrap();
        store.put(element("staged", b"3")).unwrap();

        let removed = store.remove(&ElementKey::from("staged")).unwrap().unwrap();
        assert_eq!(removed.value().as_ref(), b"3");
        let removed = store.remove(&ElementKey::from("written")).unwrap().unwrap();
        assert_eq!(removed.value().as_ref(), b"2");

        store.flush().unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.get(&ElementKey::from("staged")).is_none());
        assert_eq!(store.on_disk_size_in_bytes(), 0);
    }

    #[test]
    fn test_unsupported_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();

        assert_matches!(
            store.set_eviction_policy(EvictionPolicy::Lru),
            Err(Error::Unsupported(_))
        );
        struct NoopWriter;
        impl CacheWriter for NoopWriter {
            fn write(&self, _element: &Element) -> Result<()> {
                Ok(())
            }
        }
        assert_matches!(
            store.put_with_writer(element("a", b"v"), &NoopWriter),
            Err(Error::Unsupported(_))
        );
        assert_eq!(store.eviction_policy(), EvictionPolicy::Lfu);
    }

    #[test]
    fn test_capacity_evicts_with_notification() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "t");
        cfg.capacity = 10;
        let notifier = Arc::new(EventNotifier::new());
        let listener = Arc::new(RecordingListener::new());
        notifier.register(listener.clone());
        let store = DiskStore::open(cfg, notifier).unwrap();

        for i in 0..10 {
            store.put(element(&format!("k{}", i), b"value")).unwrap();
        }
        store.flush().unwrap();
        assert_eq!(store.on_disk_len(), 10);

        store.put(element("extra", b"value")).unwrap();
        store.flush().unwrap();
        assert_eq!(store.on_disk_len(), 10);
        assert_eq!(listener.evicted().len(), 1);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_expired_elements_are_swept() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(EventNotifier::new());
        let listener = Arc::new(RecordingListener::new());
        notifier.register(listener.clone());
        let store = DiskStore::open(config(dir.path(), "t"), notifier).unwrap();

        let stale = element("stale", b"v")
            .with_time_to_live(1)
            .with_creation_time(now_millis() - 10_000);
        store.put(stale).unwrap();
        store.put(element("fresh", b"v")).unwrap();
        store.flush().unwrap();

        store.expire_elements();
        assert_eq!(listener.expired(), vec![ElementKey::from("stale")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_get_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();
        let stale = element("stale", b"v")
            .with_time_to_live(1)
            .with_creation_time(now_millis() - 10_000);
        store.put(stale).unwrap();

        assert!(store.get(&ElementKey::from("stale")).is_none());
        assert!(!store.contains_key(&ElementKey::from("stale")));
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_default_lifespan_applied() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "t");
        cfg.lifespan.time_to_live_secs = 60;
        let store = DiskStore::open_default(cfg).unwrap();

        store.put(element("a", b"v")).unwrap();
        let got = store.get_quiet(&ElementKey::from("a")).unwrap();
        assert_eq!(got.lifespan().time_to_live_secs, 60);
        assert_eq!(got.hit_count(), 0);
    }

    #[test]
    fn test_remove_all_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open_default(config(dir.path(), "t")).unwrap();
        for i in 0..20 {
            store.put(element(&format!("k{}", i), &[0u8; 128])).unwrap();
        }
        store.flush().unwrap();
        assert!(store.data_file_size() > 0);

        store.remove_all().unwrap();
        assert_eq!(store.len(), 0);
        assert_eq!(store.data_file_size(), 0);
        assert_eq!(store.sparseness(), 0.0);
    }

    #[test]
    fn test_dispose_deletes_non_persistent_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), "t");
        let data = cfg.data_file();
        let store = DiskStore::open_default(cfg).unwrap();
        store.put(element("a", b"v")).unwrap();
        assert!(store.is_worker_alive());

        store.dispose();
        assert_eq!(store.status(), Status::Shutdown);
        assert!(!store.is_worker_alive());
        assert!(!data.exists());
        assert_matches!(store.put(element("b", b"v")), Err(Error::NotActive(_)));
        assert!(store.get(&ElementKey::from("a")).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_buffer_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "t");
        cfg.spool_buffer_bytes = 100;
        // Keep the worker from draining on its own
        cfg.spool_interval_ms = 60_000;
        let store = DiskStore::open_default(cfg).unwrap();

        store.put(element("a", &[0u8; 200])).unwrap();
        store.flush().unwrap();
        assert!(!store.buffer_full());

        store.put(element("b", &[0u8; 200])).unwrap();
        assert!(store.buffer_full());
    }
}
