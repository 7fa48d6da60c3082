//! Two-Tier Element Stores
//!
//! A bounded memory tier in front of a spooled, block-allocated disk tier.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          TieredStore                                  │
//! │              128 striped key locks · copy on read/write               │
//! ├───────────────────────────────┬──────────────────────────────────────┤
//! │  MemoryStore (cache)          │  DiskStore (authority)               │
//! │  ┌─────────────────────────┐  │  ┌──────────┐   ┌─────────────────┐  │
//! │  │ HashMap → arena list    │  │  │ Spool    │──▶│ Disk worker     │  │
//! │  │ sampled LRU/LFU/FIFO    │  │  │ buffer   │   │ (200ms tick)    │  │
//! │  └─────────────────────────┘  │  └──────────┘   └────────┬────────┘  │
//! │                               │                          ▼           │
//! │                               │  ┌─────────────────────────────────┐ │
//! │                               │  │ DiskIndex + BlockAllocator      │ │
//! │                               │  │ <name>.data   <name>.index      │ │
//! │                               │  └─────────────────────────────────┘ │
//! └───────────────────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Every tier implements [`Store`]; the [`TieredStore`] composes any two.

mod copy;
mod memory;
mod stats;
mod striped;
mod tiered;
pub mod codec;
pub mod config;
pub mod disk;
pub mod element;
pub mod events;
pub mod policy;

pub use config::{DiskConfig, LifespanConfig, MemoryConfig, StoreConfig, TieredConfig};
pub use copy::{CopyPolicy, CopyStrategy, SerializationCopyStrategy};
pub use disk::DiskStore;
pub use element::{Element, ElementKey, Lifespan};
pub use events::{CacheWriter, EventNotifier, LoggingListener, RecordingListener, StoreEventListener};
pub use memory::MemoryStore;
pub use policy::EvictionPolicy;
pub use stats::{StatsSnapshot, TierStats};
pub use striped::StripedRwLock;
pub use tiered::TieredStore;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Most victims removed by a single put
pub const MAX_EVICTIONS_PER_PUT: usize = 5;

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Alive,
    Shutdown,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Alive => write!(f, "ALIVE"),
            Status::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// Contract shared by every tier
///
/// Mutators on a disposed store return [`Error::NotActive`](crate::Error::NotActive);
/// queries on a disposed store return empty results.
pub trait Store: Send + Sync {
    /// Store name
    fn name(&self) -> &str;

    /// Insert or replace an element; `true` when the key was not present
    fn put(&self, element: Element) -> Result<bool>;

    /// Hand the element to `writer`, then store it
    fn put_with_writer(&self, element: Element, writer: &dyn CacheWriter) -> Result<bool>;

    /// Insert on behalf of a composing store, without eviction notifications
    fn fill(&self, element: Element) -> Result<()> {
        self.put(element).map(|_| ())
    }

    /// Look up an element, recording the access
    fn get(&self, key: &ElementKey) -> Option<Element>;

    /// Look up an element without touching its statistics
    fn get_quiet(&self, key: &ElementKey) -> Option<Element>;

    /// Remove an element, returning it
    fn remove(&self, key: &ElementKey) -> Result<Option<Element>>;

    /// Remove everything
    fn remove_all(&self) -> Result<()>;

    fn contains_key(&self, key: &ElementKey) -> bool;

    /// Every key currently held
    fn keys(&self) -> Vec<ElementKey>;

    /// Number of elements
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements held in memory
    fn in_memory_len(&self) -> usize;

    /// Elements written to disk
    fn on_disk_len(&self) -> usize;

    /// Bytes occupied by on-disk records
    fn on_disk_size_in_bytes(&self) -> u64;

    /// Whether writes are outpacing the store's buffering
    fn buffer_full(&self) -> bool {
        false
    }

    /// Remove expired elements, notifying listeners
    fn expire_elements(&self);

    /// Push pending state towards durable storage
    fn flush(&self) -> Result<()>;

    /// Release resources; the store is unusable afterwards
    fn dispose(&self);

    fn eviction_policy(&self) -> EvictionPolicy;

    fn set_eviction_policy(&self, policy: EvictionPolicy) -> Result<()>;

    /// Whether the store honours the pinned flag itself
    fn supports_pinning(&self) -> bool {
        false
    }

    /// Whether contents survive a restart
    fn is_persistent(&self) -> bool {
        false
    }

    fn status(&self) -> Status;

    /// Counter snapshot
    fn stats(&self) -> StatsSnapshot;
}

// =============================================================================
// Tests
// =============================================================================
