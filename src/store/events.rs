//! Store Event Notification
//!
//! Narrow callback surface through which the tiers report elements they
//! drop on their own: capacity evictions and lifespan expiries. Client
//! removals are never reported.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::element::{Element, ElementKey};
use crate::error::Result;

/// Receiver of eviction and expiry notifications
///
/// Callbacks run on the thread that performed the removal (a client thread
/// for memory evictions, the disk worker for spool evictions and expiry
/// sweeps), so implementations should return quickly.
pub trait StoreEventListener: Send + Sync {
    /// An element was removed to make room
    fn element_evicted(&self, _element: &Element) {}

    /// An element was removed because its lifespan ran out
    fn element_expired(&self, _element: &Element) {}
}

/// Write-behind hook invoked before an element is stored
pub trait CacheWriter: Send + Sync {
    /// Persist the element to the system of record
    fn write(&self, element: &Element) -> Result<()>;
}

/// Fan-out of notifications to every registered listener
#[derive(Default)]
pub struct EventNotifier {
    listeners: RwLock<Vec<Arc<dyn StoreEventListener>>>,
}

impl EventNotifier {
    /// Create a notifier with no listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener
    pub fn register(&self, listener: Arc<dyn StoreEventListener>) {
        self.listeners.write().push(listener);
    }

    /// Whether anyone is listening
    ///
    /// Tiers check this before materializing an evicted element's value.
    #[inline]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    /// Report an eviction
    pub fn notify_evicted(&self, element: &Element) {
        for listener in self.listeners.read().iter() {
            listener.element_evicted(element);
        }
    }

    /// Report an expiry
    pub fn notify_expired(&self, element: &Element) {
        for listener in self.listeners.read().iter() {
            listener.element_expired(element);
        }
    }
}

impl std::fmt::Debug for EventNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventNotifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Listener that reports notifications to the tracing system
#[derive(Debug, Clone, Default)]
pub struct LoggingListener {
    /// Log at info level (true) or debug level (false)
    info_level: bool,
}

impl LoggingListener {
    /// Listener logging at debug level
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener logging at info level
    pub fn info_level() -> Self {
        Self { info_level: true }
    }
}

impl StoreEventListener for LoggingListener {
    fn element_evicted(&self, element: &Element) {
        if self.info_level {
            info!(key = %element.key(), hits = element.hit_count(), "Element evicted");
        } else {
            debug!(key = %element.key(), hits = element.hit_count(), "Element evicted");
        }
    }

    fn element_expired(&self, element: &Element) {
        if self.info_level {
            info!(key = %element.key(), "Element expired");
        } else {
            debug!(key = %element.key(), "Element expired");
        }
    }
}

/// Kind of notification captured by [`RecordingListener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Evicted,
    Expired,
}

/// In-memory notification collector for tests and diagnostics
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: RwLock<Vec<(EventKind, ElementKey)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured notifications, oldest first
    pub fn events(&self) -> Vec<(EventKind, ElementKey)> {
        self.events.read().clone()
    }

    /// Keys reported as evicted
    pub fn evicted(&self) -> Vec<ElementKey> {
        self.keys_of(EventKind::Evicted)
    }

    /// Keys reported as expired
    pub fn expired(&self) -> Vec<ElementKey> {
        self.keys_of(EventKind::Expired)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn keys_of(&self, kind: EventKind) -> Vec<ElementKey> {
        self.events
            .read()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, key)| key.clone())
            .collect()
    }
}

impl StoreEventListener for RecordingListener {
    fn element_evicted(&self, element: &Element) {
        self.events
            .write()
            .push((EventKind::Evicted, element.key().clone()));
    }

    fn element_expired(&self, element: &Element) {
        self.events
            .write()
            .push((EventKind::Expired, element.key().clone()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_notifier_without_listeners() {
        let notifier = EventNotifier::new();
        assert!(!notifier.has_listeners());
        // Must be a no-op
        notifier.notify_evicted(&Element::new("k", Bytes::from_static(b"v")));
    }

    #[test]
    fn test_fan_out_to_all_listeners() {
        let notifier = EventNotifier::new();
        let first = Arc::new(RecordingListener::new());
        let second = Arc::new(RecordingListener::new());
        notifier.register(first.clone());
        notifier.register(second.clone());
        assert!(notifier.has_listeners());

        let element = Element::new("k", Bytes::from_static(b"v"));
        notifier.notify_evicted(&element);
        notifier.notify_expired(&element);

        for listener in [&first, &second] {
            assert_eq!(
                listener.events(),
                vec![
                    (EventKind::Evicted, ElementKey::from("k")),
                    (EventKind::Expired, ElementKey::from("k")),
                ]
            );
        }
    }

    #[test]
    fn test_recording_listener_filters() {
        let listener = RecordingListener::new();
        listener.element_evicted(&Element::new("a", Bytes::new()));
        listener.element_expired(&Element::new("b", Bytes::new()));

        assert_eq!(listener.evicted(), vec![ElementKey::from("a")]);
        assert_eq!(listener.expired(), vec![ElementKey::from("b")]);

        listener.clear();
        assert!(listener.is_empty());
    }
}
