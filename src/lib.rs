//! spoolcache - Embeddable Two-Tier Key/Value Cache
//!
//! A bounded in-memory tier in front of a disk tier that stages writes in a
//! spool buffer and lets a background worker lay them out in a
//! block-allocated data file.
//!
//! # Architecture
//!
//! ```text
//! put ──▶ TieredStore ──▶ MemoryStore (cache, sampled LRU/LFU/FIFO)
//!              │
//!              └────────▶ DiskStore (authority)
//!                            SpoolBuffer ─▶ worker ─▶ BlockAllocator
//!                                                    DiskIndex
//!                                                    <name>.data / .index
//! ```
//!
//! # Example
//!
//! ```no_run
//! use spoolcache::{Element, ElementKey, Store, StoreConfig, TieredStore};
//!
//! # fn main() -> spoolcache::Result<()> {
//! let store = TieredStore::open(StoreConfig::default())?;
//! store.put(Element::new("greeting", "hello"))?;
//! assert!(store.get(&ElementKey::from("greeting")).is_some());
//! store.dispose();
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`error`] - Error types
//! - [`store`] - Tiers, eviction, persistence and composition

pub mod error;
pub mod store;

// Re-export commonly used types
pub use error::{Error, Result};
pub use store::{
    CacheWriter, DiskConfig, DiskStore, Element, ElementKey, EventNotifier, EvictionPolicy,
    LoggingListener, MemoryConfig, MemoryStore, StatsSnapshot, Status, Store, StoreConfig,
    StoreEventListener, TieredConfig, TieredStore,
};
