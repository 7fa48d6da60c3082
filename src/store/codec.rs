//! Element Record Codec
//!
//! Explicit, versioned binary encoding of an [`Element`]. The same record is
//! written to the disk tier's data file and used by the copy strategy for
//! deep copies.
//!
//! ```text
//! u8  version
//! u8  flags (eternal | pinned | lifespan_set)
//! u32 key length,   key bytes
//! u32 value length, value bytes
//! u64 creation time, u64 last access time, u64 hit count
//! u32 time to live, u32 time to idle
//! ```
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::element::{Element, ElementKey, Lifespan};
use crate::error::{Error, Result};

/// Current record format version
pub const RECORD_VERSION: u8 = 1;

/// Fixed bytes per record, excluding key and value
pub const RECORD_OVERHEAD: usize = 1 + 1 + 4 + 4 + 8 + 8 + 8 + 4 + 4;

const FLAG_ETERNAL: u8 = 0b001;
const FLAG_PINNED: u8 = 0b010;
const FLAG_LIFESPAN_SET: u8 = 0b100;

/// Encoded size of an element's record
#[inline]
pub fn record_len(element: &Element) -> usize {
    RECORD_OVERHEAD + element.key().len() + element.value().len()
}

/// Encode an element into a standalone record
pub fn encode(element: &Element) -> Result<Bytes> {
    let key = element.key().as_bytes();
    let value = element.value();

    let key_len = u32::try_from(key.len())
        .map_err(|_| Error::Encode(format!("key of {} bytes is too large", key.len())))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| Error::Encode(format!("value of {} bytes is too large", value.len())))?;
    if record_len(element) > u32::MAX as usize {
        return Err(Error::Encode(format!(
            "record of {} bytes does not fit a block",
            record_len(element)
        )));
    }

    let expected = record_len(element);
    let mut buf = BytesMut::with_capacity(expected);

    let lifespan = element.lifespan();
    let mut flags = 0u8;
    if lifespan.eternal {
        flags |= FLAG_ETERNAL;
    }
    if element.is_pinned() {
        flags |= FLAG_PINNED;
    }
    if element.is_lifespan_set() {
        flags |= FLAG_LIFESPAN_SET;
    }

    buf.put_u8(RECORD_VERSION);
    buf.put_u8(flags);
    buf.put_u32_le(key_len);
    buf.put_slice(key);
    buf.put_u32_le(value_len);
    buf.put_slice(value);
    buf.put_u64_le(element.creation_time());
    buf.put_u64_le(element.last_access_time());
    buf.put_u64_le(element.hit_count());
    buf.put_u32_le(lifespan.time_to_live_secs);
    buf.put_u32_le(lifespan.time_to_idle_secs);

    if buf.len() != expected {
        return Err(Error::ConcurrentModification {
            key: element.key().to_string(),
        });
    }

    Ok(buf.freeze())
}

/// Decode a record produced by [`encode`]
pub fn decode(record: &[u8]) -> Result<Element> {
    let mut buf = record;

    ensure(&buf, 2, "header")?;
    let version = buf.get_u8();
    if version != RECORD_VERSION {
        return Err(Error::Decode(format!(
            "unsupported record version {} (expected {})",
            version, RECORD_VERSION
        )));
    }
    let flags = buf.get_u8();

    let key = read_chunk(&mut buf, "key")?;
    let value = read_chunk(&mut buf, "value")?;

    ensure(&buf, 8 * 3 + 4 * 2, "metadata")?;
    let creation_time = buf.get_u64_le();
    let last_access_time = buf.get_u64_le();
    let hit_count = buf.get_u64_le();
    let time_to_live_secs = buf.get_u32_le();
    let time_to_idle_secs = buf.get_u32_le();

    if buf.has_remaining() {
        return Err(Error::Decode(format!(
            "{} trailing bytes after record",
            buf.remaining()
        )));
    }

    Ok(Element::from_parts(
        ElementKey::new(key),
        value,
        creation_time,
        last_access_time,
        hit_count,
        Lifespan {
            time_to_live_secs,
            time_to_idle_secs,
            eternal: flags & FLAG_ETERNAL != 0,
        },
        flags & FLAG_LIFESPAN_SET != 0,
        flags & FLAG_PINNED != 0,
    ))
}

fn ensure(buf: &&[u8], needed: usize, what: &str) -> Result<()> {
    if buf.remaining() < needed {
        return Err(Error::Decode(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            needed,
            buf.remaining()
        )));
    }
    Ok(())
}

fn read_chunk(buf: &mut &[u8], what: &str) -> Result<Bytes> {
    ensure(buf, 4, what)?;
    let len = buf.get_u32_le() as usize;
    ensure(buf, len, what)?;
    Ok(buf.copy_to_bytes(len))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_record_len_matches_encoding() {
        let element = Element::new("key", Bytes::from(vec![7u8; 1024]));
        let record = encode(&element).unwrap();
        assert_eq!(record.len(), record_len(&element));
        assert_eq!(record.len(), RECORD_OVERHEAD + 3 + 1024);
    }

    #[test]
    fn test_metadata_survives_encoding() {
        let element = Element::new("key", Bytes::from_static(b"payload"))
            .with_time_to_live(60)
            .with_time_to_idle(30)
            .with_pinned(true);
        element.record_access();
        element.record_access();

        let decoded = decode(&encode(&element).unwrap()).unwrap();

        assert_eq!(decoded.key(), element.key());
        assert_eq!(decoded.value(), element.value());
        assert_eq!(decoded.hit_count(), 2);
        assert_eq!(decoded.creation_time(), element.creation_time());
        assert_eq!(decoded.last_access_time(), element.last_access_time());
        assert_eq!(decoded.lifespan(), element.lifespan());
        assert!(decoded.is_pinned());
        assert!(decoded.is_lifespan_set());
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let element = Element::new("key", Bytes::from_static(b"v"));
        let mut record = encode(&element).unwrap().to_vec();
        record[0] = 99;
        assert_matches!(decode(&record), Err(Error::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let element = Element::new("key", Bytes::from_static(b"v"));
        let mut record = encode(&element).unwrap().to_vec();
        record.push(0);
        assert_matches!(decode(&record), Err(Error::Decode(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Any truncation of a valid record is rejected rather than misread
        #[test]
        fn prop_truncated_records_fail(
            key in prop::collection::vec(any::<u8>(), 0..64),
            value in prop::collection::vec(any::<u8>(), 0..256),
            cut in 0usize..1000,
        ) {
            let element = Element::new(key, value);
            let record = encode(&element).unwrap();
            let cut = cut % record.len();
            prop_assert!(decode(&record[..cut]).is_err());
        }
    }
}
