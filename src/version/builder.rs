//! Builder - applies VersionEdits to a base Version.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use crate::options::MAX_LEVELS;
use crate::util::comparator::InternalKeyComparator;
use crate::{Error, Result};

use super::{by_smallest_key, FileMetadata, Version, VersionEdit};

#[derive(Default)]
struct LevelState {
    deleted_files: HashSet<u64>,
    added_files: Vec<Arc<FileMetadata>>,
}

/// Accumulates edits on top of a base Version.
///
/// Applying several edits and saving once is equivalent to applying them one
/// by one; the base Version is never modified.
pub struct Builder {
    icmp: InternalKeyComparator,
    base: Arc<Version>,
    levels: [LevelState; MAX_LEVELS],
}

impl Builder {
    /// Start from `base`.
    pub fn new(icmp: InternalKeyComparator, base: Arc<Version>) -> Self {
        Self {
            icmp,
            base,
            levels: Default::default(),
        }
    }

    /// Apply the file additions and deletions of `edit`.
    pub fn apply(&mut self, edit: &VersionEdit) {
        for &(level, number) in &edit.deleted_files {
            self.levels[level].deleted_files.insert(number);
        }

        for (level, file) in &edit.new_files {
            let state = &mut self.levels[*level];
            state.deleted_files.remove(&file.number());
            state.added_files.push(Arc::new(file.clone()));
        }
    }

    /// Materialize a new Version with the given registry id.
    ///
    /// Each level is an ordered merge of the base files and the added files
    /// by smallest key, skipping deleted files. Overlapping files in a
    /// level > 0 are corruption.
    pub fn save_to(&self, id: u64) -> Result<Version> {
        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();

        for (level, state) in self.levels.iter().enumerate() {
            let base_files = self.base.files(level);

            let mut added = state.added_files.clone();
            added.sort_by(|a, b| by_smallest_key(&self.icmp, a, b));

            let out = &mut files[level];
            out.reserve(base_files.len() + added.len());

            let mut base_iter = base_files.iter().peekable();
            for added_file in &added {
                // Base files that sort before the added file go first.
                while let Some(base_file) = base_iter
                    .next_if(|f| by_smallest_key(&self.icmp, f, added_file) != Ordering::Greater)
                {
                    self.maybe_add_file(level, out, base_file)?;
                }
                self.maybe_add_file(level, out, added_file)?;
            }

            for base_file in base_iter {
                self.maybe_add_file(level, out, base_file)?;
            }
        }

        Ok(Version::with_files(id, files))
    }

    fn maybe_add_file(
        &self,
        level: usize,
        out: &mut Vec<Arc<FileMetadata>>,
        file: &Arc<FileMetadata>,
    ) -> Result<()> {
        if self.levels[level].deleted_files.contains(&file.number()) {
            return Ok(());
        }

        if level > 0 {
            if let Some(prev) = out.last() {
                if self.icmp.compare(prev.largest(), file.smallest()) != Ordering::Less {
                    return Err(Error::corruption(format!(
                        "overlapping ranges in level {}: #{} and #{}",
                        level,
                        prev.number(),
                        file.number()
                    )));
                }
            }
        }

        out.push(Arc::clone(file));
        Ok(())
    }
}
