//! Shared helpers: encoding, checksums, file naming, ordering, diagnostics.

pub mod coding;
pub mod comparator;
pub mod crc;
pub mod filename;
pub mod info_log;
