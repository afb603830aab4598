//! Version - immutable snapshot of live table files.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::options::MAX_LEVELS;
use crate::util::comparator::Comparator;

use super::FileMetadata;

/// An immutable snapshot of all table files at a point in time.
///
/// Versions are shared as `Arc<Version>`. Holding one keeps its files out of
/// obsolete-file deletion even after a newer Version became current.
#[derive(Debug)]
pub struct Version {
    /// Registry id; increases with every Version a VersionSet creates.
    id: u64,

    /// Files at each level (0 to MAX_LEVELS-1).
    /// Level 0 files may overlap; higher levels are sorted and non-overlapping.
    files: [Vec<Arc<FileMetadata>>; MAX_LEVELS],

    /// Best compaction score; >= 1.0 means compaction is due.
    compaction_score: f64,

    /// Level that should be compacted next.
    compaction_level: usize,

    /// Total file size at each level.
    level_sizes: [u64; MAX_LEVELS],
}

impl Version {
    /// Create an empty version.
    pub fn new(id: u64) -> Self {
        Self::with_files(id, Default::default())
    }

    /// Create a version with the given files.
    pub fn with_files(id: u64, files: [Vec<Arc<FileMetadata>>; MAX_LEVELS]) -> Self {
        let mut level_sizes = [0u64; MAX_LEVELS];
        for (level, level_files) in files.iter().enumerate() {
            level_sizes[level] = level_files.iter().map(|f| f.file_size()).sum();
        }

        Self {
            id,
            files,
            compaction_score: -1.0,
            compaction_level: 0,
            level_sizes,
        }
    }

    /// Registry id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get files at a specific level.
    pub fn files(&self, level: usize) -> &[Arc<FileMetadata>] {
        &self.files[level]
    }

    /// Get number of files at a level.
    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    /// Get total number of files across all levels.
    pub fn total_files(&self) -> usize {
        self.files.iter().map(|f| f.len()).sum()
    }

    /// Get total size at a level.
    pub fn level_size(&self, level: usize) -> u64 {
        self.level_sizes[level]
    }

    /// Get the compaction score.
    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    /// Get the level that should be compacted next.
    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    /// Check if compaction is due.
    pub fn needs_compaction(&self) -> bool {
        self.compaction_score >= 1.0
    }

    pub(crate) fn set_compaction_info(&mut self, score: f64, level: usize) {
        self.compaction_score = score;
        self.compaction_level = level;
    }

    /// Files at `level` whose user-key range overlaps `[smallest, largest]`.
    ///
    /// A `None` bound is unbounded. At level 0 the range grows to cover every
    /// file it picks up, so overlapping level-0 files are returned together.
    pub fn get_overlapping_files(
        &self,
        level: usize,
        ucmp: &dyn Comparator,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> Vec<Arc<FileMetadata>> {
        let mut begin = smallest.map(|k| k.to_vec());
        let mut end = largest.map(|k| k.to_vec());

        'restart: loop {
            let mut result = Vec::new();

            for file in &self.files[level] {
                if !file.overlaps(ucmp, begin.as_deref(), end.as_deref()) {
                    continue;
                }

                if level == 0 {
                    let file_start = file.smallest().user_key();
                    let file_limit = file.largest().user_key();

                    if let Some(b) = &begin {
                        if ucmp.compare(file_start, b) == Ordering::Less {
                            begin = Some(file_start.to_vec());
                            continue 'restart;
                        }
                    }
                    if let Some(e) = &end {
                        if ucmp.compare(file_limit, e) == Ordering::Greater {
                            end = Some(file_limit.to_vec());
                            continue 'restart;
                        }
                    }
                }

                result.push(Arc::clone(file));
            }

            return result;
        }
    }

    /// Whether any file at `level` overlaps `[smallest, largest]`.
    pub fn overlap_in_level(
        &self,
        level: usize,
        ucmp: &dyn Comparator,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> bool {
        if level == 0 {
            return self.files[0]
                .iter()
                .any(|f| f.overlaps(ucmp, smallest, largest));
        }

        // Sorted and disjoint: binary search for the first file that ends at
        // or after `smallest`.
        let files = &self.files[level];
        let index = match smallest {
            Some(s) => files
                .partition_point(|f| ucmp.compare(f.largest().user_key(), s) == Ordering::Less),
            None => 0,
        };

        files
            .get(index)
            .map(|f| f.overlaps(ucmp, smallest, largest))
            .unwrap_or(false)
    }

    /// Get an iterator over all files at all levels.
    pub fn all_files(&self) -> impl Iterator<Item = (usize, &Arc<FileMetadata>)> {
        self.files
            .iter()
            .enumerate()
            .flat_map(|(level, files)| files.iter().map(move |f| (level, f)))
    }

    /// Add the number of every file in this version to `live`.
    pub fn add_live_files(&self, live: &mut HashSet<u64>) {
        live.extend(self.all_files().map(|(_, f)| f.number()));
    }

    /// One-line file count summary, e.g. `files[ 3 1 0 0 0 0 0 ]`.
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.files.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (level, files) in self.files.iter().enumerate() {
            writeln!(f, "--- level {} ---", level)?;
            for file in files {
                writeln!(
                    f,
                    " {}:{}[{} .. {}]",
                    file.number(),
                    file.file_size(),
                    file.smallest(),
                    file.largest()
                )?;
            }
        }
        Ok(())
    }
}
