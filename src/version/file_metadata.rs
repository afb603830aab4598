//! File metadata for table files.

use std::cmp::Ordering;

use crate::types::InternalKey;
use crate::util::comparator::{Comparator, InternalKeyComparator};

/// Metadata about a table file.
///
/// Shared as `Arc<FileMetadata>` by every Version that lists the file; the
/// metadata goes away with the last Version holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Unique file number.
    number: u64,
    /// File size in bytes.
    file_size: u64,
    /// Smallest key in the file.
    smallest: InternalKey,
    /// Largest key in the file.
    largest: InternalKey,
}

impl FileMetadata {
    /// Create new file metadata.
    pub fn new(number: u64, file_size: u64, smallest: InternalKey, largest: InternalKey) -> Self {
        Self {
            number,
            file_size,
            smallest,
            largest,
        }
    }

    /// Get the file number.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Get the file size.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Get the smallest key.
    pub fn smallest(&self) -> &InternalKey {
        &self.smallest
    }

    /// Get the largest key.
    pub fn largest(&self) -> &InternalKey {
        &self.largest
    }

    /// Check if the file's user-key range overlaps `[smallest, largest]`.
    ///
    /// A `None` bound is unbounded on that side.
    pub fn overlaps(
        &self,
        ucmp: &dyn Comparator,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> bool {
        let after = smallest
            .map(|s| ucmp.compare(self.largest.user_key(), s) == Ordering::Less)
            .unwrap_or(false);
        let before = largest
            .map(|l| ucmp.compare(self.smallest.user_key(), l) == Ordering::Greater)
            .unwrap_or(false);
        !after && !before
    }
}

/// Order files by smallest key, breaking ties by file number.
pub fn by_smallest_key(icmp: &InternalKeyComparator, a: &FileMetadata, b: &FileMetadata) -> Ordering {
    icmp.compare(a.smallest(), b.smallest())
        .then_with(|| a.number().cmp(&b.number()))
}
