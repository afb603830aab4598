//! Block-framed record log shared by the WAL and the MANIFEST.
//!
//! # Format
//!
//! The file is a sequence of 32KB blocks. Each physical record has:
//! - Masked CRC32 of type + payload (4 bytes, little-endian)
//! - Length (2 bytes, little-endian)
//! - Record type (1 byte): ZERO, FULL, FIRST, MIDDLE, LAST
//! - Payload (variable)
//!
//! A physical record never crosses a block boundary. Logical records that
//! don't fit in the remaining space are fragmented using FIRST, MIDDLE and
//! LAST records. A block tail shorter than a header is zero-filled.

mod reader;
mod writer;

pub use reader::{Corruption, FirstCorruption, LogReader, Reporter};
pub use writer::LogWriter;

/// Block size (32KB).
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: CRC (4) + Length (2) + Type (1) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Record types for physical records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Zero is reserved for pre-allocated files.
    Zero = 0,
    /// Complete record in a single fragment.
    Full = 1,
    /// First fragment of a record.
    First = 2,
    /// Middle fragment(s) of a record.
    Middle = 3,
    /// Last fragment of a record.
    Last = 4,
}

impl RecordType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
