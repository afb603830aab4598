//! # manifestdb
//!
//! The durability and metadata core of a leveled LSM-tree store: the
//! write-ahead log, the MANIFEST of table files per level, crash recovery
//! and the background compaction driver.
//!
//! ## Features
//!
//! - **Record Log**: Block-framed, checksummed records shared by the WAL and the MANIFEST
//! - **Versioned File Sets**: Immutable Versions, kept alive while referenced
//! - **Crash Recovery**: MANIFEST replay followed by WAL replay
//! - **Background Compaction**: Log hand-off, trivial moves and pluggable merges
//! - **Durability**: Configurable WAL sync, atomic CURRENT updates
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use manifestdb::{Database, Options};
//!
//! // Open database
//! let db = Database::open("./my_data")?;
//!
//! // Log writes
//! db.put(b"hello", b"world")?;
//! db.delete(b"hello")?;
//!
//! // Rotate the WAL and record the rotation in the MANIFEST
//! db.flush()?;
//!
//! println!("{}", db.stats());
//! ```

// Public modules
pub mod compaction;
pub mod error;
pub mod log;
pub mod options;
pub mod types;
pub mod util;
pub mod version;

// Database module
mod db;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{Options, OptionsBuilder, SyncMode, MAX_LEVELS};
pub use types::{InternalKey, SequenceNumber, ValueType, WriteBatch};

// Database
pub use db::{Database, DatabaseStats, LevelStats};

// Compaction
pub use compaction::{Compaction, CompactionStats, MergeCompactor};

// Versions
pub use util::comparator::{BytewiseComparator, Comparator};
pub use version::{FileMetadata, Version, VersionEdit};
