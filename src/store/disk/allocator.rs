//! Block Allocator
//!
//! Hands out byte ranges of the data file. Reclaimed ranges are reused
//! first-fit, whole: a record placed into a larger free range keeps the
//! entire range as its block, and ranges are never split or coalesced.
//! When no free range fits, the record is appended at the end of the file.
//! The file never shrinks.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::element::ElementKey;
use crate::store::policy::Evictable;

/// Location and bookkeeping of one record in the data file
#[derive(Debug)]
pub struct BlockDescriptor {
    /// Owning key
    pub key: ElementKey,
    /// Start of the block
    pub offset: u64,
    /// Allocated capacity
    pub block_size: u32,
    /// Bytes actually occupied by the record
    pub payload_size: u32,
    /// Expiration time (epoch millis, `u64::MAX` = never)
    pub expiry_time: u64,
    /// Element creation time (epoch millis)
    pub creation_time: u64,
    /// Last read (epoch millis, 0 = never)
    pub last_access_time: AtomicU64,
    /// Reads served from disk, seeded from the element
    pub hit_count: AtomicU64,
}

impl BlockDescriptor {
    /// Record a read
    pub fn record_hit(&self, now_millis: u64) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
        self.last_access_time.store(now_millis, Ordering::Relaxed);
    }

    /// End of the block (exclusive)
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.block_size as u64
    }

    #[inline]
    pub fn is_expired_at(&self, now_millis: u64) -> bool {
        now_millis > self.expiry_time
    }
}

impl Clone for BlockDescriptor {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            offset: self.offset,
            block_size: self.block_size,
            payload_size: self.payload_size,
            expiry_time: self.expiry_time,
            creation_time: self.creation_time,
            last_access_time: AtomicU64::new(self.last_access_time.load(Ordering::Relaxed)),
            hit_count: AtomicU64::new(self.hit_count.load(Ordering::Relaxed)),
        }
    }
}

impl Evictable for BlockDescriptor {
    fn key(&self) -> &ElementKey {
        &self.key
    }

    fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    fn latest_touch(&self) -> u64 {
        self.creation_time
            .max(self.last_access_time.load(Ordering::Relaxed))
    }

    fn creation_time(&self) -> u64 {
        self.creation_time
    }
}

/// A reclaimed byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRange {
    pub offset: u64,
    pub size: u32,
}

impl FreeRange {
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// Free-range list plus the end-of-file mark
#[derive(Debug, Default, Clone)]
pub struct BlockAllocator {
    free: Vec<FreeRange>,
    /// Next append offset
    end: u64,
    /// Sum of live payload sizes
    used_bytes: u64,
}

impl BlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild allocator state from a persisted snapshot
    pub fn restore(free: Vec<FreeRange>, end: u64, used_bytes: u64) -> Self {
        Self {
            free,
            end,
            used_bytes,
        }
    }

    /// Find room for a record of `len` bytes
    ///
    /// Returns `(offset, block_size)`; `block_size >= len`.
    pub fn allocate(&mut self, len: u32) -> (u64, u32) {
        self.used_bytes += len as u64;

        if let Some(pos) = self.free.iter().position(|range| range.size >= len) {
            let range = self.free.remove(pos);
            return (range.offset, range.size);
        }

        let offset = self.end;
        self.end += len as u64;
        (offset, len)
    }

    /// Return a descriptor's block to the free list
    pub fn free(&mut self, descriptor: &BlockDescriptor) {
        self.used_bytes = self.used_bytes.saturating_sub(descriptor.payload_size as u64);
        self.free.push(FreeRange {
            offset: descriptor.offset,
            size: descriptor.block_size,
        });
    }

    /// Forget all allocations (the data file is being truncated)
    pub fn reset(&mut self) {
        self.free.clear();
        self.end = 0;
        self.used_bytes = 0;
    }

    pub fn free_ranges(&self) -> &[FreeRange] {
        &self.free
    }

    /// Bytes reclaimable from the free list
    pub fn free_bytes(&self) -> u64 {
        self.free.iter().map(|r| r.size as u64).sum()
    }

    /// Offset past the last allocated block
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }
}

// =============================================================================
// Tests
// =============================================================================
