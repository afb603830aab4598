//! VersionEdit - describes changes between versions.

use bytes::{Bytes, BytesMut};
use std::collections::BTreeSet;
use std::fmt;

use crate::options::MAX_LEVELS;
use crate::types::{InternalKey, SequenceNumber};
use crate::util::coding::{
    decode_length_prefixed, decode_varint32, decode_varint64, encode_length_prefixed,
    encode_varint32, encode_varint64,
};
use crate::{Error, Result};

use super::{EditTag, FileMetadata};

/// A VersionEdit describes the changes between two Versions.
///
/// Scalar fields are optional; `None` means "unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    /// Name of the comparator that orders keys.
    pub comparator: Option<String>,
    /// WAL number; older logs are no longer needed.
    pub log_number: Option<u64>,
    /// WAL that was being compacted when the edit was written.
    pub prev_log_number: Option<u64>,
    /// Next file number to allocate.
    pub next_file_number: Option<u64>,
    /// Last sequence number used.
    pub last_sequence: Option<SequenceNumber>,
    /// Compaction pointers: (level, key).
    pub compact_pointers: Vec<(usize, InternalKey)>,
    /// Files to delete: (level, file_number).
    pub deleted_files: BTreeSet<(usize, u64)>,
    /// New files to add: (level, FileMetadata).
    pub new_files: Vec<(usize, FileMetadata)>,
}

impl VersionEdit {
    /// Create a new empty edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the comparator name.
    pub fn set_comparator(&mut self, name: impl Into<String>) {
        self.comparator = Some(name.into());
    }

    /// Set the log number.
    pub fn set_log_number(&mut self, num: u64) {
        self.log_number = Some(num);
    }

    /// Set the previous log number.
    pub fn set_prev_log_number(&mut self, num: u64) {
        self.prev_log_number = Some(num);
    }

    /// Set the next file number.
    pub fn set_next_file_number(&mut self, num: u64) {
        self.next_file_number = Some(num);
    }

    /// Set the last sequence number.
    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    /// Set a compaction pointer.
    pub fn set_compact_pointer(&mut self, level: usize, key: InternalKey) {
        self.compact_pointers.push((level, key));
    }

    /// Add a file to delete.
    pub fn delete_file(&mut self, level: usize, file_number: u64) {
        self.deleted_files.insert((level, file_number));
    }

    /// Add a new file.
    pub fn add_file(&mut self, level: usize, file: FileMetadata) {
        self.new_files.push((level, file));
    }

    /// Check if the edit is empty.
    pub fn is_empty(&self) -> bool {
        self.comparator.is_none()
            && self.log_number.is_none()
            && self.prev_log_number.is_none()
            && self.next_file_number.is_none()
            && self.last_sequence.is_none()
            && self.compact_pointers.is_empty()
            && self.deleted_files.is_empty()
            && self.new_files.is_empty()
    }

    /// Encode the edit to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);

        if let Some(ref name) = self.comparator {
            put_tag(&mut buf, EditTag::Comparator);
            encode_length_prefixed(&mut buf, name.as_bytes());
        }

        if let Some(num) = self.log_number {
            put_tag(&mut buf, EditTag::LogNumber);
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.prev_log_number {
            put_tag(&mut buf, EditTag::PrevLogNumber);
            encode_varint64(&mut buf, num);
        }

        if let Some(num) = self.next_file_number {
            put_tag(&mut buf, EditTag::NextFileNumber);
            encode_varint64(&mut buf, num);
        }

        if let Some(seq) = self.last_sequence {
            put_tag(&mut buf, EditTag::LastSequence);
            encode_varint64(&mut buf, seq);
        }

        for (level, key) in &self.compact_pointers {
            put_tag(&mut buf, EditTag::CompactPointer);
            encode_varint32(&mut buf, *level as u32);
            encode_length_prefixed(&mut buf, &key.encode());
        }

        for &(level, file_number) in &self.deleted_files {
            put_tag(&mut buf, EditTag::DeletedFile);
            encode_varint32(&mut buf, level as u32);
            encode_varint64(&mut buf, file_number);
        }

        for (level, file) in &self.new_files {
            put_tag(&mut buf, EditTag::NewFile);
            encode_varint32(&mut buf, *level as u32);
            encode_varint64(&mut buf, file.number());
            encode_varint64(&mut buf, file.file_size());
            encode_length_prefixed(&mut buf, &file.smallest().encode());
            encode_length_prefixed(&mut buf, &file.largest().encode());
        }

        buf.freeze()
    }

    /// Decode an edit from bytes.
    ///
    /// Unknown tags and bytes left over after the last field are corruption.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut edit = VersionEdit::new();
        let mut cursor = data;

        while !cursor.is_empty() {
            let raw_tag = decode_varint32(&mut cursor).ok_or_else(|| field_error("tag"))?;
            let tag = EditTag::from_u32(raw_tag).ok_or_else(|| {
                Error::corruption(format!("VersionEdit: unknown tag {}", raw_tag))
            })?;

            match tag {
                EditTag::Comparator => {
                    let name = decode_length_prefixed(&mut cursor)
                        .ok_or_else(|| field_error("comparator name"))?;
                    let name = String::from_utf8(name.to_vec())
                        .map_err(|_| field_error("comparator name"))?;
                    edit.comparator = Some(name);
                }
                EditTag::LogNumber => {
                    edit.log_number =
                        Some(decode_varint64(&mut cursor).ok_or_else(|| field_error("log number"))?);
                }
                EditTag::PrevLogNumber => {
                    edit.prev_log_number = Some(
                        decode_varint64(&mut cursor)
                            .ok_or_else(|| field_error("previous log number"))?,
                    );
                }
                EditTag::NextFileNumber => {
                    edit.next_file_number = Some(
                        decode_varint64(&mut cursor)
                            .ok_or_else(|| field_error("next file number"))?,
                    );
                }
                EditTag::LastSequence => {
                    edit.last_sequence = Some(
                        decode_varint64(&mut cursor)
                            .ok_or_else(|| field_error("last sequence number"))?,
                    );
                }
                EditTag::CompactPointer => {
                    let level = decode_level(&mut cursor)
                        .ok_or_else(|| field_error("compaction pointer"))?;
                    let key = decode_internal_key(&mut cursor)
                        .ok_or_else(|| field_error("compaction pointer"))?;
                    edit.compact_pointers.push((level, key));
                }
                EditTag::DeletedFile => {
                    let level =
                        decode_level(&mut cursor).ok_or_else(|| field_error("deleted file"))?;
                    let number =
                        decode_varint64(&mut cursor).ok_or_else(|| field_error("deleted file"))?;
                    edit.deleted_files.insert((level, number));
                }
                EditTag::NewFile => {
                    let file = decode_level(&mut cursor).and_then(|level| {
                        let number = decode_varint64(&mut cursor)?;
                        let size = decode_varint64(&mut cursor)?;
                        let smallest = decode_internal_key(&mut cursor)?;
                        let largest = decode_internal_key(&mut cursor)?;
                        Some((level, FileMetadata::new(number, size, smallest, largest)))
                    });
                    edit.new_files
                        .push(file.ok_or_else(|| field_error("new-file entry"))?);
                }
            }
        }

        Ok(edit)
    }
}

fn put_tag(buf: &mut BytesMut, tag: EditTag) {
    encode_varint32(buf, tag.to_u32());
}

fn field_error(field: &str) -> Error {
    Error::corruption(format!("VersionEdit: invalid {}", field))
}

fn decode_level(cursor: &mut &[u8]) -> Option<usize> {
    let level = decode_varint32(cursor)? as usize;
    (level < MAX_LEVELS).then_some(level)
}

fn decode_internal_key(cursor: &mut &[u8]) -> Option<InternalKey> {
    let encoded = decode_length_prefixed(cursor)?;
    InternalKey::decode(&encoded)
}

impl fmt::Display for VersionEdit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionEdit {{")?;
        if let Some(ref name) = self.comparator {
            write!(f, "\n  Comparator: {}", name)?;
        }
        if let Some(num) = self.log_number {
            write!(f, "\n  LogNumber: {}", num)?;
        }
        if let Some(num) = self.prev_log_number {
            write!(f, "\n  PrevLogNumber: {}", num)?;
        }
        if let Some(num) = self.next_file_number {
            write!(f, "\n  NextFile: {}", num)?;
        }
        if let Some(seq) = self.last_sequence {
            write!(f, "\n  LastSeq: {}", seq)?;
        }
        for (level, key) in &self.compact_pointers {
            write!(f, "\n  CompactPointer: {} {}", level, key)?;
        }
        for (level, number) in &self.deleted_files {
            write!(f, "\n  RemoveFile: {} {}", level, number)?;
        }
        for (level, file) in &self.new_files {
            write!(
                f,
                "\n  AddFile: {} {} {} {} .. {}",
                level,
                file.number(),
                file.file_size(),
                file.smallest(),
                file.largest()
            )?;
        }
        write!(f, "\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;
    use bytes::BufMut;

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::new(Bytes::copy_from_slice(user_key), seq, ValueType::Value)
    }

    fn full_edit() -> VersionEdit {
        let mut edit = VersionEdit::new();

        edit.set_comparator("leveldb.BytewiseComparator");
        edit.set_log_number(10);
        edit.set_prev_log_number(9);
        edit.set_next_file_number(100);
        edit.set_last_sequence(u64::MAX >> 8);

        edit.set_compact_pointer(1, make_key(b"compact", 50));
        edit.set_compact_pointer(3, make_key(b"pointer", 7));

        edit.delete_file(0, 1);
        edit.delete_file(4, 1 << 40);

        edit.add_file(0, FileMetadata::new(3, 2048, make_key(b"a", 1), make_key(b"z", 100)));
        edit.add_file(
            6,
            FileMetadata::new(
                u32::MAX as u64 + 1,
                1 << 33,
                InternalKey::new(Bytes::new(), 0, ValueType::Deletion),
                make_key(b"zz", 200),
            ),
        );
        edit
    }

    #[test]
    fn test_version_edit_empty() {
        let edit = VersionEdit::new();
        assert!(edit.is_empty());
        assert!(edit.encode().is_empty());

        let decoded = VersionEdit::decode(&[]).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_version_edit_encode_decode_full() {
        let edit = full_edit();
        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded, edit);

        // Decoding is idempotent.
        assert_eq!(decoded.encode(), edit.encode());
    }

    #[test]
    fn test_version_edit_absent_fields_stay_absent() {
        let mut edit = VersionEdit::new();
        edit.set_log_number(5);
        edit.delete_file(2, 8);

        let decoded = VersionEdit::decode(&edit.encode()).unwrap();
        assert_eq!(decoded.log_number, Some(5));
        assert!(decoded.comparator.is_none());
        assert!(decoded.prev_log_number.is_none());
        assert!(decoded.next_file_number.is_none());
        assert!(decoded.last_sequence.is_none());
        assert!(decoded.compact_pointers.is_empty());
        assert!(decoded.new_files.is_empty());
        assert!(decoded.deleted_files.contains(&(2, 8)));
    }

    #[test]
    fn test_version_edit_tags_are_varints() {
        let mut edit = VersionEdit::new();
        edit.set_prev_log_number(3);
        assert_eq!(&edit.encode()[..], &[9, 3]);
    }

    #[test]
    fn test_version_edit_unknown_tag() {
        // Tag 8 is retired.
        let err = VersionEdit::decode(&[8, 1]).unwrap_err();
        assert!(err.is_corruption());

        let err = VersionEdit::decode(&[42]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_version_edit_trailing_garbage() {
        let mut buf = BytesMut::from(&full_edit().encode()[..]);
        buf.put_u8(0xFF);
        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_version_edit_truncated() {
        let encoded = full_edit().encode();
        for len in [1, encoded.len() / 2, encoded.len() - 1] {
            assert!(
                VersionEdit::decode(&encoded[..len]).is_err(),
                "prefix of {} bytes decoded",
                len
            );
        }
    }

    #[test]
    fn test_version_edit_bad_level() {
        let mut buf = BytesMut::new();
        encode_varint32(&mut buf, EditTag::DeletedFile.to_u32());
        encode_varint32(&mut buf, MAX_LEVELS as u32);
        encode_varint64(&mut buf, 1);

        assert!(VersionEdit::decode(&buf).unwrap_err().is_corruption());
    }

    #[test]
    fn test_version_edit_display() {
        let rendered = full_edit().to_string();
        assert!(rendered.contains("Comparator: leveldb.BytewiseComparator"));
        assert!(rendered.contains("RemoveFile: 0 1"));
        assert!(rendered.contains("AddFile: 0 3 2048"));
    }
}
