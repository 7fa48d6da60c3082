//! Disk Index
//!
//! Authoritative key → block map of a disk tier, together with the
//! allocator's free-range list.
//!
//! # Snapshot format
//!
//! ```text
//! [8]  magic "SPOOLIDX"
//! u32  version
//! u64  allocator end, u64 used bytes
//! u32  descriptor count, then per descriptor:
//!        u32 key length, key bytes,
//!        u64 offset, u32 block size, u32 payload size,
//!        u64 expiry, u64 creation, u64 last access, u64 hits
//! u32  free range count, then per range: u64 offset, u32 size
//! u64  FxHash of everything above
//! ```
//!
//! Little-endian throughout. A snapshot is only trusted when it is at least
//! as recent as the data file, its checksum matches and every range it names
//! lies inside the data file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use tracing::debug;

use super::allocator::{BlockAllocator, BlockDescriptor, FreeRange};
use crate::error::{Error, Result};
use crate::store::element::{fx_hash, ElementKey};
use crate::store::policy::{collect_sample, sample_positions};

/// Snapshot magic
pub const INDEX_MAGIC: &[u8; 8] = b"SPOOLIDX";

/// Snapshot format version
pub const INDEX_VERSION: u32 = 1;

/// Tolerated lag of the index behind the data file
pub const CLOCK_SKEW: Duration = Duration::from_secs(1);

const DESCRIPTOR_FIXED_LEN: usize = 4 + 8 + 4 + 4 + 8 + 8 + 8 + 8;
const FREE_RANGE_LEN: usize = 8 + 4;

/// Key → descriptor map plus free-space bookkeeping
#[derive(Debug, Default)]
pub struct DiskIndex {
    entries: HashMap<ElementKey, BlockDescriptor>,
    allocator: BlockAllocator,
}

impl DiskIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ElementKey) -> Option<&BlockDescriptor> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &ElementKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ElementKey> {
        self.entries.keys()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &BlockDescriptor> {
        self.entries.values()
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    /// Reserve a block for a record of `len` bytes
    pub fn allocate(&mut self, len: u32) -> (u64, u32) {
        self.allocator.allocate(len)
    }

    /// Record a written block, freeing any block it replaces
    pub fn insert(&mut self, descriptor: BlockDescriptor) {
        if let Some(old) = self.entries.insert(descriptor.key.clone(), descriptor) {
            self.allocator.free(&old);
        }
    }

    /// Drop a key and return its block to the free list
    pub fn remove(&mut self, key: &ElementKey) -> Option<BlockDescriptor> {
        let removed = self.entries.remove(key)?;
        self.allocator.free(&removed);
        Some(removed)
    }

    /// Forget everything (the data file is being truncated)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.allocator.reset();
    }

    /// Keys whose descriptors have expired at `now_millis`
    pub fn expired_keys(&self, now_millis: u64) -> Vec<ElementKey> {
        self.entries
            .values()
            .filter(|d| d.is_expired_at(now_millis))
            .map(|d| d.key.clone())
            .collect()
    }

    /// Random sample of live descriptors for victim selection
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<&BlockDescriptor> {
        let positions = sample_positions(self.entries.len(), rng);
        collect_sample(self.entries.values(), &positions)
    }

    /// Sum of live payload sizes
    pub fn used_bytes(&self) -> u64 {
        self.allocator.used_bytes()
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Serialize a snapshot
    pub fn encode(&self) -> Bytes {
        let descriptors_len: usize = self
            .entries
            .values()
            .map(|d| DESCRIPTOR_FIXED_LEN + d.key.len())
            .sum();
        let capacity = 8 + 4 + 16 + 4 + descriptors_len + 4
            + self.allocator.free_ranges().len() * FREE_RANGE_LEN
            + 8;
        let mut buf = BytesMut::with_capacity(capacity);

        buf.put_slice(INDEX_MAGIC);
        buf.put_u32_le(INDEX_VERSION);
        buf.put_u64_le(self.allocator.end());
        buf.put_u64_le(self.allocator.used_bytes());

        buf.put_u32_le(self.entries.len() as u32);
        for d in self.entries.values() {
            buf.put_u32_le(d.key.len() as u32);
            buf.put_slice(d.key.as_bytes());
            buf.put_u64_le(d.offset);
            buf.put_u32_le(d.block_size);
            buf.put_u32_le(d.payload_size);
            buf.put_u64_le(d.expiry_time);
            buf.put_u64_le(d.creation_time);
            buf.put_u64_le(d.last_access_time.load(Ordering::Relaxed));
            buf.put_u64_le(d.hit_count.load(Ordering::Relaxed));
        }

        let free = self.allocator.free_ranges();
        buf.put_u32_le(free.len() as u32);
        for range in free {
            buf.put_u64_le(range.offset);
            buf.put_u32_le(range.size);
        }

        let checksum = fx_hash(&buf);
        buf.put_u64_le(checksum);
        buf.freeze()
    }

    /// Parse a snapshot, validating it against a data file of `data_len` bytes
    pub fn decode(snapshot: &[u8], data_len: u64) -> Result<Self> {
        if snapshot.len() < INDEX_MAGIC.len() + 4 + 16 + 4 + 4 + 8 {
            return Err(corrupt(format!("snapshot of {} bytes is too short", snapshot.len())));
        }

        let (body, trailer) = snapshot.split_at(snapshot.len() - 8);
        let mut trailer = trailer;
        let expected = trailer.get_u64_le();
        if fx_hash(body) != expected {
            return Err(corrupt("checksum mismatch"));
        }

        let mut buf = body;
        if &buf[..INDEX_MAGIC.len()] != INDEX_MAGIC {
            return Err(corrupt("bad magic"));
        }
        buf.advance(INDEX_MAGIC.len());

        let version = buf.get_u32_le();
        if version != INDEX_VERSION {
            return Err(corrupt(format!(
                "unsupported version {} (expected {})",
                version, INDEX_VERSION
            )));
        }

        let end = buf.get_u64_le();
        let used_bytes = buf.get_u64_le();
        if end > data_len {
            return Err(corrupt(format!(
                "allocation end {} is beyond data file length {}",
                end, data_len
            )));
        }

        let count = buf.get_u32_le() as usize;
        let mut entries = HashMap::with_capacity(count.min(1 << 20));
        for _ in 0..count {
            need(&buf, 4)?;
            let key_len = buf.get_u32_le() as usize;
            need(&buf, key_len + DESCRIPTOR_FIXED_LEN - 4)?;
            let key = ElementKey::new(buf.copy_to_bytes(key_len));

            let descriptor = BlockDescriptor {
                key: key.clone(),
                offset: buf.get_u64_le(),
                block_size: buf.get_u32_le(),
                payload_size: buf.get_u32_le(),
                expiry_time: buf.get_u64_le(),
                creation_time: buf.get_u64_le(),
                last_access_time: AtomicU64::new(buf.get_u64_le()),
                hit_count: AtomicU64::new(buf.get_u64_le()),
            };

            if descriptor.payload_size > descriptor.block_size {
                return Err(corrupt(format!(
                    "descriptor for {} has payload larger than its block",
                    key
                )));
            }
            if descriptor.end() > end {
                return Err(corrupt(format!(
                    "descriptor for {} ends at {} beyond allocation end {}",
                    key,
                    descriptor.end(),
                    end
                )));
            }
            if entries.insert(key.clone(), descriptor).is_some() {
                return Err(corrupt(format!("duplicate descriptor for {}", key)));
            }
        }

        need(&buf, 4)?;
        let free_count = buf.get_u32_le() as usize;
        need(&buf, free_count * FREE_RANGE_LEN)?;
        let mut free = Vec::with_capacity(free_count);
        for _ in 0..free_count {
            let range = FreeRange {
                offset: buf.get_u64_le(),
                size: buf.get_u32_le(),
            };
            if range.end() > end {
                return Err(corrupt(format!(
                    "free range at {} ends beyond allocation end {}",
                    range.offset, end
                )));
            }
            free.push(range);
        }

        if buf.has_remaining() {
            return Err(corrupt(format!("{} trailing bytes", buf.remaining())));
        }

        Ok(Self {
            entries,
            allocator: BlockAllocator::restore(free, end, used_bytes),
        })
    }

    /// Write a snapshot to `path`, replacing any previous one
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.encode();
        let tmp = path.with_extension("index.tmp");
        fs::write(&tmp, &snapshot)?;
        fs::rename(&tmp, path)?;
        debug!(
            path = %path.display(),
            entries = self.entries.len(),
            bytes = snapshot.len(),
            "Index saved"
        );
        Ok(())
    }

    /// Load the snapshot at `index_path` for the data file at `data_path`
    ///
    /// On success the index file is truncated, so a later start that finds
    /// it empty knows no clean shutdown happened in between.
    pub fn load(index_path: &Path, data_path: &Path) -> Result<Self> {
        let index_meta = fs::metadata(index_path)?;
        let data_meta = fs::metadata(data_path)?;

        if let (Ok(index_modified), Ok(data_modified)) =
            (index_meta.modified(), data_meta.modified())
        {
            if data_is_newer(data_modified, index_modified) {
                return Err(corrupt("data file is newer than the index"));
            }
        }

        if index_meta.len() == 0 {
            return Err(corrupt("index file is empty"));
        }

        let snapshot = fs::read(index_path)?;
        let index = Self::decode(&snapshot, data_meta.len())?;

        fs::OpenOptions::new()
            .write(true)
            .open(index_path)?
            .set_len(0)?;

        debug!(
            path = %index_path.display(),
            entries = index.len(),
            "Index loaded"
        );
        Ok(index)
    }
}

fn data_is_newer(data_modified: SystemTime, index_modified: SystemTime) -> bool {
    match data_modified.duration_since(index_modified) {
        Ok(lag) => lag > CLOCK_SKEW,
        Err(_) => false,
    }
}

fn corrupt(reason: impl Into<String>) -> Error {
    Error::CorruptIndex(reason.into())
}

fn need(buf: &&[u8], len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(corrupt(format!(
            "truncated snapshot: need {} bytes, have {}",
            len,
            buf.remaining()
        )));
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn add(index: &mut DiskIndex, key: &str, len: u32) {
        let (offset, block_size) = index.allocate(len);
        index.insert(BlockDescriptor {
            key: ElementKey::from(key),
            offset,
            block_size,
            payload_size: len,
            expiry_time: u64::MAX,
            creation_time: 1,
            last_access_time: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
        });
    }

    fn populated() -> DiskIndex {
        let mut index = DiskIndex::new();
        add(&mut index, "a", 100);
        add(&mut index, "b", 200);
        add(&mut index, "c", 300);
        index.remove(&ElementKey::from("b"));
        index
    }

    #[test]
    fn test_remove_frees_block() {
        let index = populated();
        assert_eq!(index.len(), 2);
        assert_eq!(index.used_bytes(), 400);
        assert_eq!(
            index.allocator().free_ranges(),
            &[FreeRange {
                offset: 100,
                size: 200
            }]
        );
    }

    #[test]
    fn test_replacing_insert_frees_old_block() {
        let mut index = DiskIndex::new();
        add(&mut index, "a", 100);
        add(&mut index, "a", 50);
        assert_eq!(index.len(), 1);
        assert_eq!(index.used_bytes(), 50);
        assert_eq!(index.allocator().free_bytes(), 100);
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let index = populated();
        index
            .get(&ElementKey::from("c"))
            .unwrap()
            .hit_count
            .store(7, Ordering::Relaxed);

        let decoded = DiskIndex::decode(&index.encode(), 600).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.used_bytes(), 400);
        assert_eq!(decoded.allocator().end(), 600);
        assert_eq!(decoded.allocator().free_ranges(), index.allocator().free_ranges());

        let c = decoded.get(&ElementKey::from("c")).unwrap();
        assert_eq!(c.offset, 300);
        assert_eq!(c.payload_size, 300);
        assert_eq!(c.hit_count.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn test_decode_rejects_bad_checksum() {
        let mut snapshot = populated().encode().to_vec();
        snapshot[14] ^= 0xff;
        assert_matches!(DiskIndex::decode(&snapshot, 600), Err(Error::CorruptIndex(_)));
    }

    #[test]
    fn test_decode_rejects_out_of_bounds() {
        let snapshot = populated().encode();
        assert_matches!(DiskIndex::decode(&snapshot, 599), Err(Error::CorruptIndex(_)));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_matches!(DiskIndex::decode(b"", 0), Err(Error::CorruptIndex(_)));
        assert_matches!(
            DiskIndex::decode(&[0u8; 64], 1000),
            Err(Error::CorruptIndex(_))
        );
    }

    #[test]
    fn test_save_load_truncates_index() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("s.data");
        let idx = dir.path().join("s.index");
        fs::write(&data, vec![0u8; 600]).unwrap();

        populated().save(&idx).unwrap();
        let loaded = DiskIndex::load(&idx, &data).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(fs::metadata(&idx).unwrap().len(), 0);

        // A second start without a fresh save finds the empty index
        assert_matches!(DiskIndex::load(&idx, &data), Err(Error::CorruptIndex(_)));
    }

    #[test]
    fn test_data_newer_than_index() {
        let now = SystemTime::now();
        assert!(data_is_newer(now + Duration::from_secs(5), now));
        assert!(!data_is_newer(now + Duration::from_millis(500), now));
        assert!(!data_is_newer(now, now + Duration::from_secs(5)));
    }

    #[test]
    fn test_expired_keys_and_sample() {
        let mut index = DiskIndex::new();
        for i in 0..50 {
            add(&mut index, &format!("k{}", i), 10);
        }
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(index.sample(&mut rng).len(), 30);
        assert!(index.expired_keys(u64::MAX - 1).is_empty());
    }
}
