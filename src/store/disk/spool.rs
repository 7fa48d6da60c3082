//! Spool Buffer
//!
//! Staging area for disk-tier puts. Writers insert into a concurrent map
//! while holding a shared lock; the worker takes the exclusive lock only for
//! the instant it swaps the map for an empty one, so a put can never land in
//! a batch that is already being drained.

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::store::element::{Element, ElementKey};

/// Concurrent map of elements awaiting their first write
#[derive(Debug, Default)]
pub struct SpoolBuffer {
    active: RwLock<DashMap<ElementKey, Element>>,
}

impl SpoolBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an element, returning the one it replaces
    pub fn insert(&self, element: Element) -> Option<Element> {
        let active = self.active.read();
        active.insert(element.key().clone(), element)
    }

    /// Clone of a staged element
    pub fn get(&self, key: &ElementKey) -> Option<Element> {
        let active = self.active.read();
        let staged = active.get(key).map(|e| e.value().clone());
        staged
    }

    /// Record a read against a staged element and return a clone of it
    pub fn touch(&self, key: &ElementKey) -> Option<Element> {
        let active = self.active.read();
        let staged = active.get(key).map(|e| {
            e.value().record_access();
            e.value().clone()
        });
        staged
    }

    pub fn remove(&self, key: &ElementKey) -> Option<Element> {
        let active = self.active.read();
        let removed = active.remove(key).map(|(_, e)| e);
        removed
    }

    pub fn contains_key(&self, key: &ElementKey) -> bool {
        self.active.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    pub fn keys(&self) -> Vec<ElementKey> {
        self.active
            .read()
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Drop every staged element
    pub fn clear(&self) {
        self.active.read().clear();
    }

    /// Remove and return staged elements that have expired at `now_millis`
    pub fn take_expired(&self, now_millis: u64) -> Vec<Element> {
        let active = self.active.read();
        let expired: Vec<ElementKey> = active
            .iter()
            .filter(|entry| entry.value().is_expired_at(now_millis))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| active.remove(&key).map(|(_, e)| e))
            .collect()
    }

    /// Swap in an empty buffer and hand back everything staged so far
    pub fn swap(&self) -> DashMap<ElementKey, Element> {
        let mut active = self.active.write();
        std::mem::take(&mut *active)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;

    fn element(key: &str) -> Element {
        Element::new(key, Bytes::from_static(b"v"))
    }

    #[test]
    fn test_insert_replace_remove() {
        let spool = SpoolBuffer::new();
        assert!(spool.insert(element("a")).is_none());
        assert!(spool.insert(element("a")).is_some());
        assert_eq!(spool.len(), 1);

        assert!(spool.remove(&ElementKey::from("a")).is_some());
        assert!(spool.is_empty());
    }

    #[test]
    fn test_touch_records_access() {
        let spool = SpoolBuffer::new();
        spool.insert(element("a"));
        let key = ElementKey::from("a");

        assert_eq!(spool.touch(&key).unwrap().hit_count(), 1);
        assert_eq!(spool.get(&key).unwrap().hit_count(), 1);
    }

    #[test]
    fn test_swap_empties_buffer() {
        let spool = SpoolBuffer::new();
        spool.insert(element("a"));
        spool.insert(element("b"));

        let batch = spool.swap();
        assert_eq!(batch.len(), 2);
        assert!(spool.is_empty());

        spool.insert(element("c"));
        assert_eq!(batch.len(), 2);
        assert_eq!(spool.len(), 1);
    }

    #[test]
    fn test_take_expired() {
        let spool = SpoolBuffer::new();
        spool.insert(element("live"));
        spool.insert(
            element("stale")
                .with_time_to_live(1)
                .with_creation_time(1_000),
        );

        let expired = spool.take_expired(1_000_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key(), &ElementKey::from("stale"));
        assert!(spool.contains_key(&ElementKey::from("live")));
    }

    #[test]
    fn test_no_put_lost_across_swaps() {
        let spool = Arc::new(SpoolBuffer::new());
        let writers: Vec<_> = (0..4)
            .map(|t| {
                let spool = spool.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        spool.insert(element(&format!("{}-{}", t, i)));
                    }
                })
            })
            .collect();

        let mut drained = 0;
        while writers.iter().any(|w| !w.is_finished()) {
            drained += spool.swap().len();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        drained += spool.swap().len();
        assert_eq!(drained, 4000);
    }
}
