//! Tiered Store - Cache in Front of an Authority
//!
//! Composes two [`Store`]s: a fast cache tier and an authority tier that
//! holds every element.
//!
//! # Read Path
//!
//! ```text
//! get(key) → stripe read lock → cache hit? ──yes──▶ read copy
//!                                   │no
//!                                   ▼
//!                         authority hit? ──yes──▶ fill cache ─▶ read copy
//!                                   │no
//!                                   ▼
//!                                  None
//! ```
//!
//! Writes go through to the authority under the key's stripe write lock and
//! then fill the cache. Pinned elements stay in the cache only when the
//! authority cannot honour pinning itself.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::config::{StoreConfig, TieredConfig};
use super::copy::{CopyPolicy, SerializationCopyStrategy};
use super::disk::DiskStore;
use super::element::{Element, ElementKey};
use super::events::{CacheWriter, EventNotifier};
use super::memory::MemoryStore;
use super::policy::EvictionPolicy;
use super::stats::{StatsSnapshot, TierStats};
use super::striped::StripedRwLock;
use super::{Status, Store};
use crate::error::Result;

/// Cache tier plus authority tier behind striped key locks
pub struct TieredStore {
    cache: Arc<dyn Store>,
    authority: Arc<dyn Store>,
    locks: StripedRwLock,
    copy: CopyPolicy,
    notifier: Arc<EventNotifier>,
    stats: TierStats,
}

impl TieredStore {
    /// Compose two existing tiers
    pub fn new(
        cache: Arc<dyn Store>,
        authority: Arc<dyn Store>,
        config: &TieredConfig,
        notifier: Arc<EventNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let copy = CopyPolicy::new(
            config.copy_on_read,
            config.copy_on_write,
            Arc::new(SerializationCopyStrategy),
        );

        info!(
            cache = %cache.name(),
            authority = %authority.name(),
            stripes = config.lock_stripes,
            copy_on_read = config.copy_on_read,
            copy_on_write = config.copy_on_write,
            "Tiered store created"
        );

        Ok(Self {
            cache,
            authority,
            locks: StripedRwLock::new(config.lock_stripes),
            copy,
            notifier,
            stats: TierStats::new(),
        })
    }

    /// Build a memory cache over a disk authority from one configuration
    ///
    /// Listeners registered on the returned store's notifier hear about
    /// evictions and expiries in the authority. The cache tier reports to a
    /// private notifier, since its victims remain in the authority.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::open_with_notifier(config, Arc::new(EventNotifier::new()))
    }

    /// Like [`open`](Self::open), reporting authority events to `notifier`
    pub fn open_with_notifier(config: StoreConfig, notifier: Arc<EventNotifier>) -> Result<Self> {
        config.validate()?;

        let StoreConfig {
            mut memory,
            disk,
            tiered,
        } = config;

        // Victims of the cache tier are still held by the authority
        memory.overflow_to_disk = false;

        let authority: Arc<dyn Store> = Arc::new(DiskStore::open(disk, notifier.clone())?);
        let cache: Arc<dyn Store> = Arc::new(MemoryStore::new(memory, Arc::new(EventNotifier::new()))?);

        Self::new(cache, authority, &tiered, notifier)
    }

    /// Replace the copy policy
    pub fn with_copy_policy(mut self, copy: CopyPolicy) -> Self {
        self.copy = copy;
        self
    }

    pub fn cache(&self) -> &Arc<dyn Store> {
        &self.cache
    }

    pub fn authority(&self) -> &Arc<dyn Store> {
        &self.authority
    }

    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    pub fn copy_policy(&self) -> &CopyPolicy {
        &self.copy
    }

    /// Get the key lock stripe count
    pub fn lock_stripes(&self) -> usize {
        self.locks.stripe_count()
    }

    /// Write an element while the caller holds its stripe lock
    fn put_locked(&self, element: Element) -> Result<bool> {
        let copy = self.copy.for_write(element)?;
        let key = copy.key().clone();

        if copy.is_pinned() && !self.authority.supports_pinning() {
            let cached = self.cache.contains_key(&key);
            self.cache.fill(copy)?;
            let previous = self.authority.remove(&key)?;
            debug!(key = %key, "Pinned element kept in cache tier only");
            return Ok(!cached && previous.is_none());
        }

        let is_new = self.authority.put(copy.clone())?;
        if let Err(e) = self.cache.fill(copy) {
            warn!(key = %key, error = %e, "Cache fill failed, rolling back authority write");
            self.authority.remove(&key)?;
            return Err(e);
        }
        Ok(is_new)
    }

    /// Read copy for the caller, or `None` if copying fails
    fn hand_out(&self, element: Element) -> Option<Element> {
        let key = element.key().clone();
        match self.copy.for_read(element) {
            Ok(copy) => Some(copy),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to copy element for read");
                None
            }
        }
    }
}

impl Store for TieredStore {
    fn name(&self) -> &str {
        self.authority.name()
    }

    fn put(&self, element: Element) -> Result<bool> {
        let _guard = self.locks.write(element.key());
        let is_new = self.put_locked(element)?;
        self.stats.record_put();
        Ok(is_new)
    }

    fn put_with_writer(&self, element: Element, writer: &dyn CacheWriter) -> Result<bool> {
        let _guard = self.locks.write(element.key());
        writer.write(&element)?;
        let is_new = self.put_locked(element)?;
        self.stats.record_put();
        Ok(is_new)
    }

    fn get(&self, key: &ElementKey) -> Option<Element> {
        let _guard = self.locks.read(key);

        if let Some(element) = self.cache.get(key) {
            self.stats.record_hit();
            return self.hand_out(element);
        }

        match self.authority.get(key) {
            Some(element) => {
                if let Err(e) = self.cache.fill(element.clone()) {
                    warn!(key = %key, error = %e, "Failed to promote element into cache");
                }
                self.stats.record_hit();
                self.hand_out(element)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    fn get_quiet(&self, key: &ElementKey) -> Option<Element> {
        let _guard = self.locks.read(key);
        let element = self
            .cache
            .get_quiet(key)
            .or_else(|| self.authority.get_quiet(key))?;
        self.hand_out(element)
    }

    fn remove(&self, key: &ElementKey) -> Result<Option<Element>> {
        let _guard = self.locks.write(key);
        let cached = self.cache.remove(key)?;
        let removed = self.authority.remove(key)?.or(cached);

        match removed {
            Some(element) => {
                self.stats.record_removal();
                Ok(self.hand_out(element))
            }
            None => Ok(None),
        }
    }

    fn remove_all(&self) -> Result<()> {
        let _guards = self.locks.write_all();
        self.cache.remove_all()?;
        self.authority.remove_all()
    }

    fn contains_key(&self, key: &ElementKey) -> bool {
        self.cache.contains_key(key) || self.authority.contains_key(key)
    }

    fn keys(&self) -> Vec<ElementKey> {
        let mut keys = self.authority.keys();
        let mut seen: HashSet<ElementKey> = keys.iter().cloned().collect();
        for key in self.cache.keys() {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
        keys
    }

    fn len(&self) -> usize {
        self.cache.len().max(self.authority.len())
    }

    fn in_memory_len(&self) -> usize {
        self.cache.in_memory_len() + self.authority.in_memory_len()
    }

    fn on_disk_len(&self) -> usize {
        self.cache.on_disk_len() + self.authority.on_disk_len()
    }

    fn on_disk_size_in_bytes(&self) -> u64 {
        self.cache.on_disk_size_in_bytes() + self.authority.on_disk_size_in_bytes()
    }

    fn buffer_full(&self) -> bool {
        self.cache.buffer_full() || self.authority.buffer_full()
    }

    fn expire_elements(&self) {
        let _guards = self.locks.write_all();
        self.authority.expire_elements();
        self.cache.expire_elements();
    }

    fn flush(&self) -> Result<()> {
        self.cache.flush()?;
        self.authority.flush()
    }

    fn dispose(&self) {
        self.cache.dispose();
        self.authority.dispose();
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        self.cache.eviction_policy()
    }

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()> {
        self.cache.set_eviction_policy(policy)
    }

    fn supports_pinning(&self) -> bool {
        true
    }

    fn is_persistent(&self) -> bool {
        self.authority.is_persistent()
    }

    fn status(&self) -> Status {
        self.authority.status()
    }

    /// Lookups and writes as seen by callers; evictions and expiries summed
    /// over both tiers
    fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        let cache = self.cache.stats();
        let authority = self.authority.stats();

        snapshot.evictions = cache.evictions + authority.evictions;
        snapshot.expirations = cache.expirations + authority.expirations;
        snapshot.spool_flushes = authority.spool_flushes;
        snapshot.bytes_written = authority.bytes_written;
        snapshot.write_failures = authority.write_failures;
        snapshot
    }
}

impl std::fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("cache", &self.cache.name())
            .field("authority", &self.authority.name())
            .field("locks", &self.locks)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
