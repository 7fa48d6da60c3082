//! Striped Key Locks
//!
//! A fixed array of reader/writer locks selected by key hash. The locks
//! guard no data of their own; they serialize operations on the same key
//! across the two tiers of a [`TieredStore`](super::TieredStore).
//!
//! - Power-of-2 stripe count enables fast modulo via bitwise AND
//! - Whole-store operations take every stripe in index order, so two of them
//!   can never deadlock each other

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::element::ElementKey;

/// Array of per-stripe reader/writer locks
pub struct StripedRwLock {
    stripes: Box<[RwLock<()>]>,
}

impl StripedRwLock {
    /// Create `count` stripes, rounded up to a power of two
    pub fn new(count: usize) -> Self {
        let count = count.max(1).next_power_of_two();
        let stripes: Vec<RwLock<()>> = (0..count).map(|_| RwLock::new(())).collect();
        Self {
            stripes: stripes.into_boxed_slice(),
        }
    }

    /// Get the stripe count
    #[inline]
    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    #[inline]
    fn stripe_for(&self, key: &ElementKey) -> &RwLock<()> {
        &self.stripes[key.stripe_index(self.stripes.len())]
    }

    /// Shared lock on the key's stripe
    pub fn read(&self, key: &ElementKey) -> RwLockReadGuard<'_, ()> {
        self.stripe_for(key).read()
    }

    /// Exclusive lock on the key's stripe
    pub fn write(&self, key: &ElementKey) -> RwLockWriteGuard<'_, ()> {
        self.stripe_for(key).write()
    }

    /// Exclusive lock on every stripe, acquired in index order
    pub fn write_all(&self) -> Vec<RwLockWriteGuard<'_, ()>> {
        self.stripes.iter().map(|s| s.write()).collect()
    }
}

impl std::fmt::Debug for StripedRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripedRwLock")
            .field("stripes", &self.stripes.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
