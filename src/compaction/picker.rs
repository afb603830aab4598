//! Compaction picker - decides what one compaction step works on.
//!
//! The picker analyzes a Version and determines:
//! - Which files of the source level to take
//! - Which files of the next level they overlap
//! - Whether the step is a trivial move

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::options::MAX_LEVELS;
use crate::types::InternalKey;
use crate::util::comparator::InternalKeyComparator;
use crate::version::{FileMetadata, Version, VersionEdit};

/// Why a compaction was picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionType {
    /// The Version's compaction score reached 1.0.
    Size,
    /// Requested through `Database::compact_level`.
    Manual,
}

/// A compaction to be executed.
#[derive(Debug, Clone)]
pub struct Compaction {
    compaction_type: CompactionType,
    level: usize,
    /// `inputs[0]` from `level`, `inputs[1]` from `level + 1`.
    inputs: [Vec<Arc<FileMetadata>>; 2],
    /// Keeps the input files live while the step runs.
    input_version: Arc<Version>,
    /// Range over all inputs.
    smallest: InternalKey,
    largest: InternalKey,
    /// Largest key of `inputs[0]`; the next compaction at `level` starts after it.
    level_largest: InternalKey,
}

impl Compaction {
    /// Create a compaction. Returns `None` if `level_files` is empty.
    pub fn new(
        icmp: &InternalKeyComparator,
        compaction_type: CompactionType,
        level: usize,
        level_files: Vec<Arc<FileMetadata>>,
        next_level_files: Vec<Arc<FileMetadata>>,
        input_version: Arc<Version>,
    ) -> Option<Self> {
        let (_, level_largest) = key_range(icmp, &level_files)?;
        let (smallest, largest) = key_range(icmp, level_files.iter().chain(&next_level_files))?;

        Some(Self {
            compaction_type,
            level,
            inputs: [level_files, next_level_files],
            input_version,
            smallest,
            largest,
            level_largest,
        })
    }

    /// Get the compaction type.
    pub fn compaction_type(&self) -> CompactionType {
        self.compaction_type
    }

    /// Get the source level.
    pub fn level(&self) -> usize {
        self.level
    }

    /// Get the target level.
    pub fn output_level(&self) -> usize {
        self.level + 1
    }

    /// Input files; `which` is 0 for the source level, 1 for the next.
    pub fn inputs(&self, which: usize) -> &[Arc<FileMetadata>] {
        &self.inputs[which]
    }

    /// Number of input files at `level + which`.
    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    /// The Version the inputs were picked from.
    pub fn input_version(&self) -> &Arc<Version> {
        &self.input_version
    }

    /// Smallest and largest internal key over all inputs.
    pub fn key_range(&self) -> (InternalKey, InternalKey) {
        (self.smallest.clone(), self.largest.clone())
    }

    /// Key the level's compaction pointer advances to.
    pub fn level_largest(&self) -> &InternalKey {
        &self.level_largest
    }

    /// Total size of all inputs.
    pub fn input_bytes(&self) -> u64 {
        self.inputs.iter().flatten().map(|f| f.file_size()).sum()
    }

    /// A single source file with nothing to merge against below it.
    ///
    /// Such a file can be moved to the next level by a MANIFEST edit alone.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1 && self.inputs[1].is_empty()
    }

    /// Add a deletion of every input file to `edit`.
    pub fn add_input_deletions(&self, edit: &mut VersionEdit) {
        for (which, files) in self.inputs.iter().enumerate() {
            for file in files {
                edit.delete_file(self.level + which, file.number());
            }
        }
    }
}

impl fmt::Display for Compaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} + {}@{} files",
            self.inputs[0].len(),
            self.level,
            self.inputs[1].len(),
            self.level + 1
        )
    }
}

/// Smallest and largest internal key over `files`.
fn key_range<'a>(
    icmp: &InternalKeyComparator,
    files: impl IntoIterator<Item = &'a Arc<FileMetadata>>,
) -> Option<(InternalKey, InternalKey)> {
    let mut files = files.into_iter();
    let first = files.next()?;

    let mut smallest = first.smallest();
    let mut largest = first.largest();
    for file in files {
        if icmp.compare(file.smallest(), smallest) == Ordering::Less {
            smallest = file.smallest();
        }
        if icmp.compare(file.largest(), largest) == Ordering::Greater {
            largest = file.largest();
        }
    }

    Some((smallest.clone(), largest.clone()))
}

/// Compaction picker that decides what to compact.
pub struct CompactionPicker {
    icmp: InternalKeyComparator,
}

impl CompactionPicker {
    /// Create a new compaction picker.
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self { icmp }
    }

    /// Pick a size-triggered compaction, if the Version is due for one.
    ///
    /// Starts at the first file of the candidate level that ends after the
    /// level's compaction pointer, wrapping around to the first file.
    pub fn pick_compaction(
        &self,
        version: &Arc<Version>,
        compact_pointer: Option<&InternalKey>,
    ) -> Option<Compaction> {
        if !version.needs_compaction() {
            return None;
        }

        let level = version.compaction_level();
        if level + 1 >= MAX_LEVELS {
            return None;
        }

        let files = version.files(level);
        let picked = files
            .iter()
            .find(|f| match compact_pointer {
                Some(pointer) => self.icmp.compare(f.largest(), pointer) == Ordering::Greater,
                None => true,
            })
            .or_else(|| files.first())?;

        let mut level_files = vec![Arc::clone(picked)];

        // Level-0 files may overlap each other, so take every file the pick
        // touches.
        if level == 0 {
            let (smallest, largest) = key_range(&self.icmp, &level_files)?;
            level_files = version.get_overlapping_files(
                0,
                self.icmp.user_comparator().as_ref(),
                Some(smallest.user_key()),
                Some(largest.user_key()),
            );
        }

        self.setup_other_inputs(CompactionType::Size, version, level, level_files)
    }

    /// Pick a manual compaction of `level` bounded by user keys.
    ///
    /// `None` bounds are open. Returns `None` if nothing at `level` overlaps.
    pub fn pick_manual_compaction(
        &self,
        version: &Arc<Version>,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Option<Compaction> {
        if level + 1 >= MAX_LEVELS {
            return None;
        }

        let level_files =
            version.get_overlapping_files(level, self.icmp.user_comparator().as_ref(), begin, end);

        self.setup_other_inputs(CompactionType::Manual, version, level, level_files)
    }

    fn setup_other_inputs(
        &self,
        compaction_type: CompactionType,
        version: &Arc<Version>,
        level: usize,
        level_files: Vec<Arc<FileMetadata>>,
    ) -> Option<Compaction> {
        let (smallest, largest) = key_range(&self.icmp, &level_files)?;
        let next_level_files = version.get_overlapping_files(
            level + 1,
            self.icmp.user_comparator().as_ref(),
            Some(smallest.user_key()),
            Some(largest.user_key()),
        );

        Compaction::new(
            &self.icmp,
            compaction_type,
            level,
            level_files,
            next_level_files,
            Arc::clone(version),
        )
    }
}
