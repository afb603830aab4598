//! Versioned file-set model and the MANIFEST journal.
//!
//! - **FileMetadata**: Information about each table file
//! - **VersionEdit**: Delta to apply to a Version, and its wire codec
//! - **Version**: Immutable snapshot of all files organized by level
//! - **Builder**: Applies edits to a base Version to produce a new one
//! - **VersionSet**: Owns the current Version, the version registry, global
//!   counters and the MANIFEST writer
//!
//! # LSM-Tree File Organization
//!
//! ```text
//! Level 0:  [T-1] [T-2] [T-3]        (overlapping keys)
//! Level 1:  [T-4][T-5][T-6]          (non-overlapping, sorted)
//! Level 2:  [T-7][T-8][T-9][T-10]    (non-overlapping, sorted)
//! ...
//! ```
//!
//! # Recovery
//!
//! On startup:
//! 1. Read CURRENT to find the active MANIFEST
//! 2. Replay every VersionEdit in it through one Builder
//! 3. Install the resulting Version as current

mod builder;
mod file_metadata;
mod version;
mod version_edit;
mod version_set;

pub use builder::Builder;
pub use file_metadata::{by_smallest_key, FileMetadata};
pub use version::Version;
pub use version_edit::VersionEdit;
pub use version_set::{PendingApply, VersionSet};

/// Tag values for encoding VersionEdit fields.
///
/// Tag 8 was used by an older format and is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EditTag {
    /// Comparator name.
    Comparator = 1,
    /// Log number.
    LogNumber = 2,
    /// Next file number.
    NextFileNumber = 3,
    /// Last sequence number.
    LastSequence = 4,
    /// Compaction pointer for a level.
    CompactPointer = 5,
    /// Deleted file (level, file_number).
    DeletedFile = 6,
    /// New file (level, file_number, size, smallest, largest).
    NewFile = 7,
    /// Previous log number.
    PrevLogNumber = 9,
}

impl EditTag {
    /// Create from the decoded varint.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(EditTag::Comparator),
            2 => Some(EditTag::LogNumber),
            3 => Some(EditTag::NextFileNumber),
            4 => Some(EditTag::LastSequence),
            5 => Some(EditTag::CompactPointer),
            6 => Some(EditTag::DeletedFile),
            7 => Some(EditTag::NewFile),
            9 => Some(EditTag::PrevLogNumber),
            _ => None,
        }
    }

    /// Convert to the value written as a varint.
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}
