//! Bounded Memory Tier
//!
//! Fixed-capacity in-memory store with sampled eviction.
//!
//! # Design
//!
//! - HashMap from key to a slot in an arena of doubly-linked nodes kept in
//!   insertion order; samples are materialized by walking the list once
//! - Reads take the shared lock only; hit counts and access times are atomics
//! - Capacity is enforced after insertion, at most five victims per put;
//!   an expired eldest entry is dropped on every insert whatever the load
//! - Victims overflow to a disk tier when one is attached, otherwise they are
//!   reported as evicted and dropped; pinned elements are never victims and
//!   survive `clear_on_flush`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::config::MemoryConfig;
use super::element::{Element, ElementKey};
use super::events::{CacheWriter, EventNotifier};
use super::policy::{collect_sample, sample_positions, EvictionPolicy};
use super::stats::{StatsSnapshot, TierStats};
use super::{Status, Store, MAX_EVICTIONS_PER_PUT};
use crate::error::{Error, Result};

struct Node {
    element: Element,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Slab of list nodes in insertion order
#[derive(Default)]
struct LinkedArena {
    slots: Vec<Option<Node>>,
    vacant: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl LinkedArena {
    fn len(&self) -> usize {
        self.len
    }

    /// Append at the tail, returning the slot
    fn push_back(&mut self, element: Element) -> usize {
        let node = Node {
            element,
            prev: self.tail,
            next: None,
        };
        let idx = match self.vacant.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };

        match self.tail.and_then(|t| self.slots[t].as_mut()) {
            Some(tail) => tail.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
        idx
    }

    /// Unlink a slot and return its element
    fn remove(&mut self, idx: usize) -> Option<Element> {
        let node = self.slots.get_mut(idx)?.take()?;

        match node.prev.and_then(|p| self.slots[p].as_mut()) {
            Some(prev) => prev.next = node.next,
            None => self.head = node.next,
        }
        match node.next.and_then(|n| self.slots[n].as_mut()) {
            Some(next) => next.prev = node.prev,
            None => self.tail = node.prev,
        }

        self.vacant.push(idx);
        self.len -= 1;
        Some(node.element)
    }

    fn get(&self, idx: usize) -> Option<&Element> {
        self.slots.get(idx)?.as_ref().map(|n| &n.element)
    }

    fn iter(&self) -> ArenaIter<'_> {
        ArenaIter {
            arena: self,
            cursor: self.head,
        }
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.vacant.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }
}

struct ArenaIter<'a> {
    arena: &'a LinkedArena,
    cursor: Option<usize>,
}

impl<'a> Iterator for ArenaIter<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.arena.slots.get(self.cursor?)?.as_ref()?;
        self.cursor = node.next;
        Some(&node.element)
    }
}

#[derive(Default)]
struct MemoryState {
    map: HashMap<ElementKey, usize>,
    arena: LinkedArena,
}

impl MemoryState {
    /// Insert or replace; a replaced element moves to the tail
    fn insert(&mut self, element: Element) -> Option<Element> {
        let key = element.key().clone();
        let old = self
            .map
            .get(&key)
            .copied()
            .and_then(|idx| self.arena.remove(idx));
        let idx = self.arena.push_back(element);
        self.map.insert(key, idx);
        old
    }

    fn get(&self, key: &ElementKey) -> Option<&Element> {
        self.arena.get(*self.map.get(key)?)
    }

    fn remove(&mut self, key: &ElementKey) -> Option<Element> {
        let idx = self.map.remove(key)?;
        self.arena.remove(idx)
    }

    fn clear(&mut self) {
        self.map.clear();
        self.arena.clear();
    }

    /// Drop everything except pinned elements
    fn clear_unpinned(&mut self) {
        let unpinned: Vec<ElementKey> = self
            .arena
            .iter()
            .filter(|e| !e.is_pinned())
            .map(|e| e.key().clone())
            .collect();
        for key in &unpinned {
            self.remove(key);
        }
    }

    /// Key of the oldest insertion, if it has expired
    fn expired_eldest(&self, just_added: &ElementKey) -> Option<ElementKey> {
        self.arena
            .iter()
            .next()
            .filter(|e| e.key() != just_added && e.is_expired())
            .map(|e| e.key().clone())
    }
}

/// What happens to victims of a capacity eviction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictionMode {
    /// Overflow or notify
    Put,
    /// Drop silently; the composing store still holds the data
    Fill,
}

/// Bounded in-memory element store
pub struct MemoryStore {
    config: MemoryConfig,
    state: RwLock<MemoryState>,
    /// Element cap (0 = unbounded)
    capacity: AtomicUsize,
    policy: RwLock<EvictionPolicy>,
    rng: Mutex<SmallRng>,
    overflow: Option<Arc<dyn Store>>,
    notifier: Arc<EventNotifier>,
    stats: TierStats,
    active: AtomicBool,
}

impl MemoryStore {
    /// Create a standalone memory tier
    pub fn new(config: MemoryConfig, notifier: Arc<EventNotifier>) -> Result<Self> {
        Self::build(config, notifier, None)
    }

    /// Create a memory tier that spills victims into `overflow`
    pub fn with_overflow(
        config: MemoryConfig,
        notifier: Arc<EventNotifier>,
        overflow: Arc<dyn Store>,
    ) -> Result<Self> {
        Self::build(config, notifier, Some(overflow))
    }

    fn build(
        config: MemoryConfig,
        notifier: Arc<EventNotifier>,
        overflow: Option<Arc<dyn Store>>,
    ) -> Result<Self> {
        config.validate()?;

        let rng = match config.sample_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        info!(
            store = %config.name,
            capacity = config.capacity,
            policy = %config.eviction_policy,
            overflow = overflow.is_some(),
            "Memory store created"
        );

        Ok(Self {
            capacity: AtomicUsize::new(config.capacity),
            policy: RwLock::new(config.eviction_policy),
            state: RwLock::new(MemoryState::default()),
            rng: Mutex::new(rng),
            overflow,
            notifier,
            stats: TierStats::new(),
            active: AtomicBool::new(true),
            config,
        })
    }

    /// Change the element cap; takes effect on the next put
    pub fn set_memory_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    pub fn memory_capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Notifier used for eviction and expiry events
    pub fn notifier(&self) -> &Arc<EventNotifier> {
        &self.notifier
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(Error::NotActive(self.config.name.clone()))
        }
    }

    fn insert(&self, mut element: Element, mode: EvictionMode) -> bool {
        element.apply_default_lifespan(self.config.lifespan.lifespan());
        let key = element.key().clone();

        let is_new = self.state.write().insert(element).is_none();
        self.evict(&key, mode);
        is_new
    }

    /// Drop an expired eldest entry, then bring the element count back
    /// under capacity
    fn evict(&self, just_added: &ElementKey, mode: EvictionMode) {
        let capacity = self.capacity.load(Ordering::Relaxed);
        let policy = *self.policy.read();
        let mut victims = Vec::new();
        {
            let mut state = self.state.write();

            if let Some(eldest) = state.expired_eldest(just_added) {
                victims.extend(state.remove(&eldest));
            }

            let overflow = match capacity {
                0 => 0,
                cap => state.map.len().saturating_sub(cap),
            };

            for _ in 0..overflow.min(MAX_EVICTIONS_PER_PUT) {
                let victim = {
                    let positions = sample_positions(state.arena.len(), &mut *self.rng.lock());
                    let sample: Vec<&Element> = collect_sample(state.arena.iter(), &positions)
                        .into_iter()
                        .filter(|e| !e.is_pinned())
                        .collect();
                    policy
                        .select_victim(&sample, Some(just_added))
                        .map(|e| e.key().clone())
                };
                let Some(victim) = victim else { break };

                if let Some(element) = state.remove(&victim) {
                    victims.push(element);
                }
            }
        }

        for victim in victims {
            self.dispose_victim(victim, mode);
        }
    }

    fn dispose_victim(&self, victim: Element, mode: EvictionMode) {
        if mode == EvictionMode::Fill {
            if victim.is_expired() {
                self.stats.record_expiration();
            } else {
                self.stats.record_eviction();
            }
            return;
        }

        if victim.is_expired() {
            self.stats.record_expiration();
            self.notifier.notify_expired(&victim);
            return;
        }

        if let Some(overflow) = &self.overflow {
            let key = victim.key().clone();
            if let Err(e) = overflow.put(victim) {
                warn!(store = %self.config.name, key = %key, error = %e, "Failed to overflow element to disk");
            }
            return;
        }

        self.stats.record_eviction();
        self.notifier.notify_evicted(&victim);
    }

    /// Remove an element found expired on read
    fn expire_key(&self, key: &ElementKey) {
        let removed = self.state.write().remove(key);
        if let Some(element) = removed {
            self.stats.record_expiration();
            self.notifier.notify_expired(&element);
        }
    }

    /// Move an element from the overflow tier back into memory
    fn promote(&self, key: &ElementKey) -> Option<Element> {
        let overflow = self.overflow.as_ref()?;
        let element = overflow.get(key)?;
        if let Err(e) = overflow.remove(key) {
            warn!(store = %self.config.name, key = %key, error = %e, "Failed to remove promoted element");
        }
        self.insert(element.clone(), EvictionMode::Put);
        debug!(store = %self.config.name, key = %key, "Promoted element from disk");
        Some(element)
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn put(&self, element: Element) -> Result<bool> {
        self.ensure_active()?;
        self.stats.record_put();
        Ok(self.insert(element, EvictionMode::Put))
    }

    fn put_with_writer(&self, element: Element, writer: &dyn CacheWriter) -> Result<bool> {
        self.ensure_active()?;
        writer.write(&element)?;
        self.put(element)
    }

    fn fill(&self, element: Element) -> Result<()> {
        self.ensure_active()?;
        self.insert(element, EvictionMode::Fill);
        Ok(())
    }

    fn get(&self, key: &ElementKey) -> Option<Element> {
        if !self.is_active() {
            return None;
        }

        let found = {
            let state = self.state.read();
            let found = state.get(key).map(|element| {
                if element.is_expired() {
                    None
                } else {
                    element.record_access();
                    Some(element.clone())
                }
            });
            found
        };

        match found {
            Some(Some(element)) => {
                self.stats.record_hit();
                Some(element)
            }
            Some(None) => {
                self.expire_key(key);
                self.stats.record_miss();
                None
            }
            None => {
                let promoted = self.promote(key);
                if promoted.is_some() {
                    self.stats.record_hit();
                } else {
                    self.stats.record_miss();
                }
                promoted
            }
        }
    }

    fn get_quiet(&self, key: &ElementKey) -> Option<Element> {
        if !self.is_active() {
            return None;
        }
        let found = self
            .state
            .read()
            .get(key)
            .filter(|e| !e.is_expired())
            .cloned();
        found.or_else(|| self.overflow.as_ref()?.get_quiet(key))
    }

    fn remove(&self, key: &ElementKey) -> Result<Option<Element>> {
        self.ensure_active()?;
        let removed = self.state.write().remove(key);
        let spilled = match &self.overflow {
            Some(overflow) => overflow.remove(key)?,
            None => None,
        };

        let removed = removed.or(spilled);
        if removed.is_some() {
            self.stats.record_removal();
        }
        Ok(removed)
    }

    fn remove_all(&self) -> Result<()> {
        self.ensure_active()?;
        self.state.write().clear();
        if let Some(overflow) = &self.overflow {
            overflow.remove_all()?;
        }
        Ok(())
    }

    fn contains_key(&self, key: &ElementKey) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state.read().map.contains_key(key)
            || self
                .overflow
                .as_ref()
                .map(|o| o.contains_key(key))
                .unwrap_or(false)
    }

    fn keys(&self) -> Vec<ElementKey> {
        if !self.is_active() {
            return Vec::new();
        }
        let state = self.state.read();
        let mut keys: Vec<ElementKey> = state.arena.iter().map(|e| e.key().clone()).collect();
        if let Some(overflow) = &self.overflow {
            keys.extend(
                overflow
                    .keys()
                    .into_iter()
                    .filter(|k| !state.map.contains_key(k)),
            );
        }
        keys
    }

    fn len(&self) -> usize {
        self.in_memory_len() + self.overflow.as_ref().map(|o| o.len()).unwrap_or(0)
    }

    fn in_memory_len(&self) -> usize {
        if !self.is_active() {
            return 0;
        }
        self.state.read().map.len()
    }

    fn on_disk_len(&self) -> usize {
        self.overflow.as_ref().map(|o| o.on_disk_len()).unwrap_or(0)
    }

    fn on_disk_size_in_bytes(&self) -> u64 {
        self.overflow
            .as_ref()
            .map(|o| o.on_disk_size_in_bytes())
            .unwrap_or(0)
    }

    fn buffer_full(&self) -> bool {
        self.overflow
            .as_ref()
            .map(|o| o.buffer_full())
            .unwrap_or(false)
    }

    fn expire_elements(&self) {
        if !self.is_active() {
            return;
        }

        let expired: Vec<Element> = {
            let mut state = self.state.write();
            let keys: Vec<ElementKey> = state
                .arena
                .iter()
                .filter(|e| e.is_expired())
                .map(|e| e.key().clone())
                .collect();
            keys.iter().filter_map(|k| state.remove(k)).collect()
        };

        for element in &expired {
            self.stats.record_expiration();
            self.notifier.notify_expired(element);
        }

        if let Some(overflow) = &self.overflow {
            overflow.expire_elements();
        }
    }

    fn flush(&self) -> Result<()> {
        self.ensure_active()?;

        if let Some(overflow) = self.overflow.as_ref().filter(|o| o.is_persistent()) {
            // Pinned elements stay resident and are not duplicated on disk
            let elements: Vec<Element> = self
                .state
                .read()
                .arena
                .iter()
                .filter(|e| !e.is_pinned())
                .cloned()
                .collect();
            let spooled = elements.len();
            for element in elements {
                overflow.put(element)?;
            }
            debug!(store = %self.config.name, spooled, "Spooled memory tier to disk");
        }

        if self.config.clear_on_flush {
            self.state.write().clear_unpinned();
        }

        match &self.overflow {
            Some(overflow) => overflow.flush(),
            None => Ok(()),
        }
    }

    fn dispose(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        self.state.write().clear();
        if let Some(overflow) = &self.overflow {
            overflow.dispose();
        }
        info!(store = %self.config.name, "Memory store disposed");
    }

    fn eviction_policy(&self) -> EvictionPolicy {
        *self.policy.read()
    }

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()> {
        *self.policy.write() = policy;
        debug!(store = %self.config.name, policy = %policy, "Eviction policy changed");
        Ok(())
    }

    fn supports_pinning(&self) -> bool {
        true
    }

    fn is_persistent(&self) -> bool {
        self.overflow
            .as_ref()
            .map(|o| o.is_persistent())
            .unwrap_or(false)
    }

    fn status(&self) -> Status {
        if self.is_active() {
            Status::Alive
        } else {
            Status::Shutdown
        }
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.config.name)
            .field("capacity", &self.memory_capacity())
            .field("policy", &self.eviction_policy())
            .field("overflow", &self.overflow.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::config::DiskConfig;
    use crate::store::disk::DiskStore;
    use crate::store::element::now_millis;
    use crate::store::events::RecordingListener;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    fn store(capacity: usize, policy: EvictionPolicy) -> (MemoryStore, Arc<RecordingListener>) {
        let notifier = Arc::new(EventNotifier::new());
        let listener = Arc::new(RecordingListener::new());
        notifier.register(listener.clone());
        let config = MemoryConfig {
            name: "mem".to_string(),
            capacity,
            eviction_policy: policy,
            sample_seed: Some(7),
            ..Default::default()
        };
        (MemoryStore::new(config, notifier).unwrap(), listener)
    }

    fn element(key: &str) -> Element {
        Element::new(key, Bytes::from_static(b"value"))
    }

    fn key(k: &str) -> ElementKey {
        ElementKey::from(k)
    }

    #[test]
    fn test_arena_keeps_insertion_order() {
        let mut state = MemoryState::default();
        for k in ["a", "b", "c"] {
            state.insert(element(k));
        }
        state.insert(element("a"));
        state.remove(&key("b"));
        state.insert(element("d"));

        let order: Vec<String> = state.arena.iter().map(|e| e.key().to_string()).collect();
        assert_eq!(order, vec!["c", "a", "d"]);
        assert_eq!(state.arena.len(), 3);
        // Vacated slots were reused
        assert_eq!(state.arena.slots.len(), 3);
    }

    #[test]
    fn test_put_get_replace() {
        let (store, _) = store(0, EvictionPolicy::Lru);
        assert!(store.put(element("a")).unwrap());
        assert!(!store.put(Element::new("a", Bytes::from_static(b"new"))).unwrap());
        assert_eq!(store.len(), 1);

        let got = store.get(&key("a")).unwrap();
        assert_eq!(got.value().as_ref(), b"new");
        assert_eq!(got.hit_count(), 1);

        assert!(store.get(&key("missing")).is_none());
        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_get_quiet_leaves_statistics() {
        let (store, _) = store(0, EvictionPolicy::Lru);
        store.put(element("a")).unwrap();
        assert_eq!(store.get_quiet(&key("a")).unwrap().hit_count(), 0);
        assert_eq!(store.get(&key("a")).unwrap().hit_count(), 1);
        assert_eq!(store.stats().hits, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let (store, listener) = store(3, EvictionPolicy::Lru);
        let base = now_millis() - 60_000;
        store.put(element("a").with_creation_time(base)).unwrap();
        store.put(element("b").with_creation_time(base + 1_000)).unwrap();
        store.put(element("c").with_creation_time(base + 2_000)).unwrap();
        store.get(&key("a"));
        store.get(&key("b"));

        store.put(element("d")).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(listener.evicted(), vec![key("c")]);
    }

    #[test]
    fn test_lfu_evicts_least_hit() {
        let (store, listener) = store(3, EvictionPolicy::Lfu);
        for k in ["a", "b", "c"] {
            store.put(element(k)).unwrap();
        }
        store.get(&key("a"));
        store.get(&key("c"));
        store.get(&key("c"));

        store.put(element("d")).unwrap();
        assert_eq!(listener.evicted(), vec![key("b")]);
        assert!(store.contains_key(&key("d")));
    }

    #[test]
    fn test_fifo_evicts_oldest() {
        let (store, listener) = store(2, EvictionPolicy::Fifo);
        store.put(element("old").with_creation_time(1_000)).unwrap();
        store.put(element("new").with_creation_time(2_000)).unwrap();
        store.get(&key("old"));

        store.put(element("newest")).unwrap();
        assert_eq!(listener.evicted(), vec![key("old")]);
    }

    #[test]
    fn test_pinned_elements_survive() {
        let (store, _) = store(2, EvictionPolicy::Lru);
        store.put(element("p1").with_pinned(true)).unwrap();
        store.put(element("p2").with_pinned(true)).unwrap();
        store.put(element("x")).unwrap();

        assert!(store.contains_key(&key("p1")));
        assert!(store.contains_key(&key("p2")));
        assert!(!store.contains_key(&key("x")));
    }

    #[test]
    fn test_expired_victim_reported_as_expiry() {
        let (store, listener) = store(1, EvictionPolicy::Fifo);
        let stale = element("stale")
            .with_time_to_live(1)
            .with_creation_time(now_millis() - 10_000);
        store.put(stale).unwrap();
        store.put(element("fresh")).unwrap();

        assert_eq!(listener.expired(), vec![key("stale")]);
        assert!(listener.evicted().is_empty());
    }

    #[test]
    fn test_expired_eldest_dropped_below_capacity() {
        let (store, listener) = store(10, EvictionPolicy::Lru);
        let stale = element("stale")
            .with_time_to_live(1)
            .with_creation_time(now_millis() - 10_000);
        store.put(stale).unwrap();
        for i in 0..5 {
            store.put(element(&format!("fresh-{}", i))).unwrap();
        }

        assert_eq!(store.len(), 5);
        assert_eq!(listener.expired(), vec![key("stale")]);
        assert!(listener.evicted().is_empty());
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_unexpired_eldest_stays_below_capacity() {
        let (store, listener) = store(10, EvictionPolicy::Lru);
        store.put(element("old").with_time_to_live(3_600)).unwrap();
        store.put(element("new")).unwrap();

        assert_eq!(store.len(), 2);
        assert!(listener.is_empty());
    }

    #[test]
    fn test_flush_keeps_pinned_elements() {
        let (store, _) = store(0, EvictionPolicy::Lru);
        store.put(element("pinned").with_pinned(true)).unwrap();
        store.put(element("plain")).unwrap();

        store.flush().unwrap();
        assert!(store.contains_key(&key("pinned")));
        assert!(!store.contains_key(&key("plain")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_fill_is_silent() {
        let (store, listener) = store(1, EvictionPolicy::Lru);
        store.fill(element("a")).unwrap();
        store.fill(element("b")).unwrap();
        assert_eq!(store.len(), 1);
        assert!(listener.is_empty());
    }

    #[test]
    fn test_eviction_capped_per_put() {
        let (store, listener) = store(0, EvictionPolicy::Lru);
        for i in 0..20 {
            store.put(element(&format!("k{}", i))).unwrap();
        }
        store.set_memory_capacity(5);

        store.put(element("trigger")).unwrap();
        assert_eq!(listener.evicted().len(), MAX_EVICTIONS_PER_PUT);
        assert_eq!(store.len(), 21 - MAX_EVICTIONS_PER_PUT);
    }

    #[test]
    fn test_set_eviction_policy() {
        let (store, _) = store(10, EvictionPolicy::Lru);
        store.set_eviction_policy(EvictionPolicy::Lfu).unwrap();
        assert_eq!(store.eviction_policy(), EvictionPolicy::Lfu);
    }

    #[test]
    fn test_expire_elements() {
        let (store, listener) = store(0, EvictionPolicy::Lru);
        store
            .put(element("stale").with_time_to_live(1).with_creation_time(1_000))
            .unwrap();
        store.put(element("fresh")).unwrap();

        store.expire_elements();
        assert_eq!(listener.expired(), vec![key("stale")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_with_writer() {
        struct Recording(parking_lot::Mutex<Vec<ElementKey>>);
        impl CacheWriter for Recording {
            fn write(&self, element: &Element) -> Result<()> {
                self.0.lock().push(element.key().clone());
                Ok(())
            }
        }
        struct Failing;
        impl CacheWriter for Failing {
            fn write(&self, _element: &Element) -> Result<()> {
                Err(Error::Unsupported("read-only backend".into()))
            }
        }

        let (store, _) = store(0, EvictionPolicy::Lru);
        let writer = Recording(parking_lot::Mutex::new(Vec::new()));
        store.put_with_writer(element("a"), &writer).unwrap();
        assert_eq!(*writer.0.lock(), vec![key("a")]);

        assert_matches!(
            store.put_with_writer(element("b"), &Failing),
            Err(Error::Unsupported(_))
        );
        assert!(!store.contains_key(&key("b")));
    }

    #[test]
    fn test_overflow_and_promotion() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(EventNotifier::new());
        let disk = DiskStore::open(
            DiskConfig {
                name: "overflow".to_string(),
                directory: dir.path().to_path_buf(),
                spool_interval_ms: 10,
                ..Default::default()
            },
            notifier.clone(),
        )
        .unwrap();
        let config = MemoryConfig {
            name: "mem".to_string(),
            capacity: 2,
            eviction_policy: EvictionPolicy::Fifo,
            overflow_to_disk: true,
            ..Default::default()
        };
        let store = MemoryStore::with_overflow(config, notifier, Arc::new(disk)).unwrap();

        store.put(element("a").with_creation_time(1_000)).unwrap();
        store.put(element("b").with_creation_time(2_000)).unwrap();
        store.put(element("c")).unwrap();

        assert_eq!(store.in_memory_len(), 2);
        assert_eq!(store.len(), 3);
        assert!(store.contains_key(&key("a")));

        let promoted = store.get(&key("a")).unwrap();
        assert_eq!(promoted.value().as_ref(), b"value");
        assert_eq!(store.len(), 3);
        assert_eq!(store.in_memory_len(), 2);

        store.dispose();
        assert_eq!(store.status(), Status::Shutdown);
    }

    #[test]
    fn test_disposed_store_rejects_mutation() {
        let (store, _) = store(0, EvictionPolicy::Lru);
        store.put(element("a")).unwrap();
        store.dispose();

        assert_matches!(store.put(element("b")), Err(Error::NotActive(_)));
        assert!(store.get(&key("a")).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let (store, _) = store(0, EvictionPolicy::Lru);
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let k = format!("obj-{}-{}", t, i);
                        store.put(element(&k)).unwrap();
                        store.get(&key(&k));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(), 8000);
    }
}
