//! Compaction - picking work and scheduling it in the background.
//!
//! The compaction module is responsible for:
//! - Picking the input files of one compaction step
//! - Tracking the background state machine (idle, scheduled, running)
//! - Handing non-trivial merges to a pluggable [`MergeCompactor`]
//!
//! # LSM-Tree Compaction Strategy
//!
//! - **Level 0**: Contains files flushed from the write buffer. Files may
//!   overlap. Compaction is due when the file count reaches the trigger.
//! - **Levels 1-6**: Files within a level don't overlap. Each level has a
//!   byte budget (exponentially increasing). Compaction is due when the
//!   level reaches its budget.
//!
//! # Compaction Step
//!
//! 1. Pick files at level N (and the overlapping files at level N+1)
//! 2. A single input with nothing below it is moved to N+1 as is
//! 3. Otherwise the [`MergeCompactor`] rewrites the inputs into new files
//! 4. The result is logged to the MANIFEST as one VersionEdit

pub mod background;
pub mod picker;

pub use background::{
    BackgroundScheduler, CompactionState, CompactionStats, LevelCompactionStats, ManualCompaction,
    ScheduleContext,
};
pub use picker::{Compaction, CompactionPicker, CompactionType};

use crate::version::FileMetadata;
use crate::Result;

/// External collaborator that merges the input tables of a compaction.
///
/// Runs on the background worker with the database lock released. Output
/// file numbers must come from `new_file_number`; those numbers are kept out
/// of obsolete-file deletion until the step finishes. The returned files are
/// installed at `compaction.output_level()`.
pub trait MergeCompactor: Send + Sync {
    /// Merge the inputs of `compaction` and describe the written tables.
    fn compact(
        &self,
        compaction: &Compaction,
        new_file_number: &mut dyn FnMut() -> u64,
    ) -> Result<Vec<FileMetadata>>;

    /// Name of the compactor (for logging).
    fn name(&self) -> &str {
        "MergeCompactor"
    }
}
