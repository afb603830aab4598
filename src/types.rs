//! Core types for manifestdb.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::cmp::Ordering;

use crate::util::coding::{decode_length_prefixed, encode_length_prefixed};

/// Monotonically increasing counter that orders all mutations.
pub type SequenceNumber = u64;

/// Value type indicator in internal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// Deletion marker (tombstone).
    Deletion = 0,
    /// Normal value.
    Value = 1,
}

impl ValueType {
    /// Create from byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Check if this is a deletion marker.
    pub fn is_deletion(&self) -> bool {
        matches!(self, ValueType::Deletion)
    }
}

/// Internal key used for file range boundaries.
///
/// An internal key combines the user key with the sequence number and value
/// type of the mutation that wrote it.
///
/// Encoded format:
/// ```text
/// [user_key][packed (8 bytes, little-endian)]
/// ```
///
/// The sequence and value_type are packed into 8 bytes with sequence
/// in the high 56 bits and value_type in the low 8 bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InternalKey {
    /// The user-provided key.
    user_key: Bytes,
    /// Sequence number (version).
    sequence: SequenceNumber,
    /// Value type.
    value_type: ValueType,
}

impl InternalKey {
    /// Maximum sequence number (56 bits).
    pub const MAX_SEQUENCE: SequenceNumber = (1 << 56) - 1;

    /// Create a new internal key.
    pub fn new(user_key: impl Into<Bytes>, sequence: SequenceNumber, value_type: ValueType) -> Self {
        debug_assert!(sequence <= Self::MAX_SEQUENCE);
        Self {
            user_key: user_key.into(),
            sequence,
            value_type,
        }
    }

    /// Create an internal key for a put operation.
    pub fn for_value(user_key: impl Into<Bytes>, sequence: SequenceNumber) -> Self {
        Self::new(user_key, sequence, ValueType::Value)
    }

    /// Get the user key.
    pub fn user_key(&self) -> &[u8] {
        &self.user_key
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Get the value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Encode the internal key to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Encode into an existing buffer.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.user_key);
        buf.put_u64_le(self.packed());
    }

    /// Decode an internal key from bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }

        let user_key_len = data.len() - 8;
        let mut packed_bytes = &data[user_key_len..];
        let packed = packed_bytes.get_u64_le();

        let value_type = ValueType::from_byte((packed & 0xFF) as u8)?;

        Some(Self {
            user_key: Bytes::copy_from_slice(&data[..user_key_len]),
            sequence: packed >> 8,
            value_type,
        })
    }

    /// Get the encoded length.
    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + 8
    }

    fn packed(&self) -> u64 {
        (self.sequence << 8) | self.value_type.to_byte() as u64
    }

    /// Order by the packed trailer: newer sequence first, then higher type.
    pub(crate) fn cmp_trailer(&self, other: &Self) -> Ordering {
        other.packed().cmp(&self.packed())
    }
}

impl std::fmt::Display for InternalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "'{}' @ {} : {}",
            String::from_utf8_lossy(&self.user_key),
            self.sequence,
            self.value_type.to_byte()
        )
    }
}

/// Size of the write batch header: sequence (8) + count (4).
pub const BATCH_HEADER_SIZE: usize = 12;

/// A batch of write operations appended to the WAL as one record.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    /// The entries in this batch.
    entries: Vec<BatchEntry>,
    /// Approximate size in bytes.
    approximate_size: usize,
}

/// A single entry in a write batch.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    /// The key to write.
    pub key: Bytes,
    /// The value (None for deletion).
    pub value: Option<Bytes>,
}

impl WriteBatch {
    /// Create a new empty write batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation to the batch.
    pub fn put(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        let value = value.into();
        self.approximate_size += key.len() + value.len() + 3;
        self.entries.push(BatchEntry {
            key,
            value: Some(value),
        });
    }

    /// Add a delete operation to the batch.
    pub fn delete(&mut self, key: impl Into<Bytes>) {
        let key = key.into();
        self.approximate_size += key.len() + 2;
        self.entries.push(BatchEntry { key, value: None });
    }

    /// Clear the batch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.approximate_size = 0;
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Get the entries.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Encode the batch for the WAL, stamped with its first sequence number.
    ///
    /// Format:
    /// ```text
    /// [sequence (8 bytes LE)][count (4 bytes LE)]
    /// [entry1: type (1) | key (length-prefixed) | value (length-prefixed, puts only)]
    /// [entry2: ...]
    /// ```
    pub fn encode(&self, sequence: SequenceNumber) -> Bytes {
        let mut buf = BytesMut::with_capacity(BATCH_HEADER_SIZE + self.approximate_size);

        buf.put_u64_le(sequence);
        buf.put_u32_le(self.entries.len() as u32);

        for entry in &self.entries {
            match entry.value {
                Some(ref value) => {
                    buf.put_u8(ValueType::Value.to_byte());
                    encode_length_prefixed(&mut buf, &entry.key);
                    encode_length_prefixed(&mut buf, value);
                }
                None => {
                    buf.put_u8(ValueType::Deletion.to_byte());
                    encode_length_prefixed(&mut buf, &entry.key);
                }
            }
        }

        buf.freeze()
    }

    /// Read the sequence number and entry count from an encoded batch.
    pub fn decode_header(data: &[u8]) -> crate::Result<(SequenceNumber, u32)> {
        if data.len() < BATCH_HEADER_SIZE {
            return Err(crate::Error::corruption("log record too small"));
        }
        let mut cursor = data;
        let sequence = cursor.get_u64_le();
        let count = cursor.get_u32_le();
        Ok((sequence, count))
    }

    /// Decode a batch from WAL data.
    pub fn decode(data: &[u8]) -> crate::Result<(SequenceNumber, Self)> {
        let (sequence, count) = Self::decode_header(data)?;
        let mut cursor = &data[BATCH_HEADER_SIZE..];
        let mut batch = WriteBatch::new();

        for _ in 0..count {
            if cursor.is_empty() {
                return Err(crate::Error::corruption("unexpected end of batch"));
            }

            let value_type = ValueType::from_byte(cursor.get_u8())
                .ok_or_else(|| crate::Error::corruption("unknown WriteBatch tag"))?;

            let key = decode_length_prefixed(&mut cursor)
                .ok_or_else(|| crate::Error::corruption("bad WriteBatch key"))?;

            match value_type {
                ValueType::Value => {
                    let value = decode_length_prefixed(&mut cursor)
                        .ok_or_else(|| crate::Error::corruption("bad WriteBatch value"))?;
                    batch.put(key, value);
                }
                ValueType::Deletion => batch.delete(key),
            }
        }

        if !cursor.is_empty() {
            return Err(crate::Error::corruption("WriteBatch has trailing bytes"));
        }

        Ok((sequence, batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type() {
        assert_eq!(ValueType::from_byte(0), Some(ValueType::Deletion));
        assert_eq!(ValueType::from_byte(1), Some(ValueType::Value));
        assert_eq!(ValueType::from_byte(2), None);
        assert!(ValueType::Deletion.is_deletion());
        assert!(!ValueType::Value.is_deletion());
    }

    #[test]
    fn test_internal_key_encode_decode() {
        let key = InternalKey::new(Bytes::from("hello"), 12345, ValueType::Value);
        let encoded = key.encode();
        assert_eq!(encoded.len(), key.encoded_len());

        let decoded = InternalKey::decode(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_internal_key_decode_rejects_short_input() {
        assert!(InternalKey::decode(b"short").is_none());
    }

    #[test]
    fn test_internal_key_trailer_order() {
        let newer = InternalKey::for_value(Bytes::from("k"), 200);
        let older = InternalKey::for_value(Bytes::from("k"), 100);
        assert_eq!(newer.cmp_trailer(&older), Ordering::Less);
        assert_eq!(older.cmp_trailer(&newer), Ordering::Greater);
    }

    #[test]
    fn test_internal_key_hash() {
        use std::collections::HashSet;

        let mut keys = HashSet::new();
        keys.insert(InternalKey::for_value(&b"k"[..], 1));
        keys.insert(InternalKey::for_value(&b"k"[..], 1));
        keys.insert(InternalKey::new(&b"k"[..], 1, ValueType::Deletion));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_write_batch() {
        let mut batch = WriteBatch::new();
        batch.put(b"key1".as_slice(), b"value1".as_slice());
        batch.put(b"key2".as_slice(), b"value2".as_slice());
        batch.delete(b"key3".as_slice());

        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());

        batch.clear();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_write_batch_header() {
        let mut batch = WriteBatch::new();
        batch.put(b"a".as_slice(), b"1".as_slice());
        batch.delete(b"b".as_slice());

        let encoded = batch.encode(77);
        let (sequence, count) = WriteBatch::decode_header(&encoded).unwrap();
        assert_eq!(sequence, 77);
        assert_eq!(count, 2);

        let (sequence, decoded) = WriteBatch::decode(&encoded).unwrap();
        assert_eq!(sequence, 77);
        assert_eq!(decoded.entries()[0].value, Some(Bytes::from("1")));
        assert_eq!(decoded.entries()[1].value, None);
    }

    #[test]
    fn test_write_batch_too_small() {
        let err = WriteBatch::decode_header(&[0u8; 5]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_write_batch_truncated_entry() {
        let mut batch = WriteBatch::new();
        batch.put(b"key".as_slice(), b"value".as_slice());
        let encoded = batch.encode(1);

        let err = WriteBatch::decode(&encoded[..encoded.len() - 2]).unwrap_err();
        assert!(err.is_corruption());
    }
}
