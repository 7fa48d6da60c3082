//! Element Types
//!
//! The unit of caching shared by every tier: an opaque key, an opaque value
//! payload, and the access/lifespan metadata the eviction and expiry logic
//! reads.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Milliseconds since the Unix epoch
#[inline]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fast non-cryptographic hash (FxHash algorithm)
#[inline]
pub(crate) fn fx_hash(bytes: &[u8]) -> u64 {
    const SEED: u64 = 0x517cc1b727220a95;
    let mut hash = SEED;
    for &byte in bytes {
        hash = hash.rotate_left(5) ^ (byte as u64);
        hash = hash.wrapping_mul(SEED);
    }
    hash
}

/// Element key - opaque bytes with a pre-computed hash
#[derive(Clone, Eq)]
pub struct ElementKey {
    hash: u64,
    bytes: Bytes,
}

impl ElementKey {
    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            hash: fx_hash(&bytes),
            bytes,
        }
    }

    /// Raw key bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key bytes (zero-copy)
    #[inline]
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Pre-computed hash
    #[inline]
    pub fn hash_code(&self) -> u64 {
        self.hash
    }

    /// Stripe index for this key (`stripes` must be a power of two)
    #[inline]
    pub fn stripe_index(&self, stripes: usize) -> usize {
        debug_assert!(stripes.is_power_of_two());
        // Fold the high bits in; fx_hash is weak in the low bits for short keys
        ((self.hash ^ (self.hash >> 32)) as usize) & (stripes - 1)
    }

    /// Key length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for ElementKey {
    fn eq(&self, other: &Self) -> bool {
        // Fast path: compare hashes first
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Hash for ElementKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl std::fmt::Debug for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ElementKey({})", self)
    }
}

impl std::fmt::Display for ElementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.bytes))
    }
}

impl From<&str> for ElementKey {
    fn from(s: &str) -> Self {
        Self::new(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for ElementKey {
    fn from(s: String) -> Self {
        Self::new(Bytes::from(s))
    }
}

impl From<Vec<u8>> for ElementKey {
    fn from(v: Vec<u8>) -> Self {
        Self::new(Bytes::from(v))
    }
}

impl From<Bytes> for ElementKey {
    fn from(b: Bytes) -> Self {
        Self::new(b)
    }
}

/// Lifespan settings of an element
///
/// Zero in either component means "no limit from that component".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifespan {
    /// Time to live in seconds, measured from creation
    pub time_to_live_secs: u32,
    /// Time to idle in seconds, measured from the latest access
    pub time_to_idle_secs: u32,
    /// Never expires when set
    pub eternal: bool,
}

/// Cache element: key, value and metadata
pub struct Element {
    key: ElementKey,
    value: Bytes,
    /// Creation timestamp (epoch millis)
    creation_time: u64,
    /// Last access timestamp (epoch millis, 0 = never read)
    last_access_time: AtomicU64,
    /// Successful reads
    hit_count: AtomicU64,
    lifespan: Lifespan,
    /// Whether any lifespan setting was given explicitly
    lifespan_set: bool,
    pinned: bool,
}

impl Element {
    /// Create a new element with no explicit lifespan
    pub fn new(key: impl Into<ElementKey>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            creation_time: now_millis(),
            last_access_time: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            lifespan: Lifespan::default(),
            lifespan_set: false,
            pinned: false,
        }
    }

    /// Rebuild an element from its stored parts (used by the record codec)
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        key: ElementKey,
        value: Bytes,
        creation_time: u64,
        last_access_time: u64,
        hit_count: u64,
        lifespan: Lifespan,
        lifespan_set: bool,
        pinned: bool,
    ) -> Self {
        Self {
            key,
            value,
            creation_time,
            last_access_time: AtomicU64::new(last_access_time),
            hit_count: AtomicU64::new(hit_count),
            lifespan,
            lifespan_set,
            pinned,
        }
    }

    /// Set the time to live
    pub fn with_time_to_live(mut self, secs: u32) -> Self {
        self.lifespan.time_to_live_secs = secs;
        self.lifespan.eternal = false;
        self.lifespan_set = true;
        self
    }

    /// Set the time to idle
    pub fn with_time_to_idle(mut self, secs: u32) -> Self {
        self.lifespan.time_to_idle_secs = secs;
        self.lifespan.eternal = false;
        self.lifespan_set = true;
        self
    }

    /// Mark the element eternal (or clear the flag)
    pub fn with_eternal(mut self, eternal: bool) -> Self {
        self.lifespan.eternal = eternal;
        if eternal {
            self.lifespan.time_to_live_secs = 0;
            self.lifespan.time_to_idle_secs = 0;
        }
        self.lifespan_set = true;
        self
    }

    /// Pin the element
    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Override the creation time (epoch millis)
    pub fn with_creation_time(mut self, millis: u64) -> Self {
        self.creation_time = millis;
        self
    }

    /// Apply store-level lifespan defaults when the element has none of its own
    pub fn apply_default_lifespan(&mut self, defaults: Lifespan) {
        if !self.lifespan_set {
            self.lifespan = defaults;
        }
    }

    #[inline]
    pub fn key(&self) -> &ElementKey {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    #[inline]
    pub fn last_access_time(&self) -> u64 {
        self.last_access_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lifespan(&self) -> Lifespan {
        self.lifespan
    }

    #[inline]
    pub fn is_lifespan_set(&self) -> bool {
        self.lifespan_set
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Eternal elements never expire
    #[inline]
    pub fn is_eternal(&self) -> bool {
        self.lifespan.eternal
            || (self.lifespan.time_to_live_secs == 0 && self.lifespan.time_to_idle_secs == 0)
    }

    /// Record a read and return the new hit count
    #[inline]
    pub fn record_access(&self) -> u64 {
        self.last_access_time.store(now_millis(), Ordering::Relaxed);
        self.hit_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Most recent of creation and last access (epoch millis)
    #[inline]
    pub fn latest_touch(&self) -> u64 {
        self.creation_time.max(self.last_access_time())
    }

    /// Expiration time (epoch millis); `u64::MAX` when the element cannot expire
    pub fn expiration_time(&self) -> u64 {
        if self.is_eternal() {
            return u64::MAX;
        }

        let ttl = self.lifespan.time_to_live_secs as u64 * 1000;
        let tti = self.lifespan.time_to_idle_secs as u64 * 1000;
        let ttl_expiry = self.creation_time.saturating_add(ttl);
        let tti_expiry = self.latest_touch().saturating_add(tti);

        match (ttl, tti) {
            (0, _) => tti_expiry,
            (_, 0) => ttl_expiry,
            _ => ttl_expiry.min(tti_expiry),
        }
    }

    /// Check whether the element has expired
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    /// Check expiry against a given clock reading
    #[inline]
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis > self.expiration_time()
    }

    /// Payload size in bytes (key + value)
    #[inline]
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

impl Clone for Element {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            value: self.value.clone(),
            creation_time: self.creation_time,
            last_access_time: AtomicU64::new(self.last_access_time()),
            hit_count: AtomicU64::new(self.hit_count()),
            lifespan: self.lifespan,
            lifespan_set: self.lifespan_set,
            pinned: self.pinned,
        }
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .field("hit_count", &self.hit_count())
            .field("pinned", &self.pinned)
            .field("is_expired", &self.is_expired())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
