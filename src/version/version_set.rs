//! VersionSet - owns the current Version and the MANIFEST.
//!
//! The VersionSet is responsible for:
//! - Tracking the current Version and every Version still referenced
//! - Logging VersionEdits to the MANIFEST and applying them
//! - Allocating file numbers
//! - Tracking sequence and log numbers
//! - Scoring levels for compaction
//!
//! All methods take `&mut self`; callers serialize access with the database
//! mutex. [`VersionSet::prepare_apply`] and [`VersionSet::finish_apply`]
//! bracket the MANIFEST write so the caller can drop its lock around
//! [`PendingApply::commit`].

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::log::{FirstCorruption, LogReader, LogWriter};
use crate::options::{Options, MAX_LEVELS};
use crate::types::{InternalKey, SequenceNumber};
use crate::util::comparator::InternalKeyComparator;
use crate::util::filename::{
    delete_file, manifest_file_name, manifest_file_path, parse_file_name, read_current_file,
    set_current_file, sync_dir, FileType,
};
use crate::util::info_log::{info_log, InfoLog};
use crate::{Error, Result};

use super::{Builder, Version, VersionEdit};

/// Manages the set of versions and file metadata.
pub struct VersionSet {
    /// Database directory path.
    db_path: PathBuf,
    /// Database options.
    options: Arc<Options>,
    /// Orders file boundaries.
    icmp: InternalKeyComparator,
    /// Diagnostic log.
    info_log: Arc<InfoLog>,

    /// Next file number to allocate.
    next_file_number: u64,
    /// Number of the MANIFEST being written (or to be created).
    manifest_file_number: u64,
    /// Last used sequence number.
    last_sequence: SequenceNumber,
    /// WALs older than this are not needed.
    log_number: u64,
    /// WAL being handed off when the last edit was written; 0 if none.
    prev_log_number: u64,

    /// Open MANIFEST writer. Taken out while an edit is being committed.
    descriptor_log: Option<LogWriter>,
    /// A [`PendingApply`] is outstanding.
    apply_in_progress: bool,

    /// Where the next compaction at each level starts.
    compact_pointers: [Option<InternalKey>; MAX_LEVELS],

    /// Every Version that may still be referenced, by id.
    versions: BTreeMap<u64, Arc<Version>>,
    /// The current Version.
    current: Arc<Version>,
    /// Id for the next Version.
    next_version_id: u64,
}

/// A MANIFEST write prepared under the lock.
///
/// Call [`commit`](Self::commit) (the lock may be released meanwhile), then
/// hand the result to [`VersionSet::finish_apply`].
pub struct PendingApply {
    db_path: PathBuf,
    writer: LogWriter,
    record: bytes::Bytes,
    new_manifest: Option<u64>,
    version: Version,
    log_number: u64,
    prev_log_number: u64,
}

impl PendingApply {
    /// Append the edit to the MANIFEST and make it durable.
    ///
    /// A freshly created MANIFEST becomes the target of CURRENT.
    pub fn commit(&mut self) -> Result<()> {
        self.writer.add_record(&self.record)?;
        self.writer.sync()?;

        if let Some(number) = self.new_manifest {
            set_current_file(&self.db_path, number)?;
            sync_dir(&self.db_path)?;
        }
        Ok(())
    }

    /// Whether committing creates a new MANIFEST.
    pub fn creates_manifest(&self) -> bool {
        self.new_manifest.is_some()
    }
}

impl VersionSet {
    /// Create a new VersionSet with an empty current Version.
    pub fn new(db_path: &Path, options: Arc<Options>, info_log: Arc<InfoLog>) -> Self {
        let icmp = InternalKeyComparator::new(Arc::clone(&options.comparator));
        let current = Arc::new(Version::new(0));
        let mut versions = BTreeMap::new();
        versions.insert(0, Arc::clone(&current));

        Self {
            db_path: db_path.to_path_buf(),
            options,
            icmp,
            info_log,
            next_file_number: 2,
            manifest_file_number: 0,
            last_sequence: 0,
            log_number: 0,
            prev_log_number: 0,
            descriptor_log: None,
            apply_in_progress: false,
            compact_pointers: Default::default(),
            versions,
            current,
            next_version_id: 1,
        }
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Get the options.
    pub fn options(&self) -> &Arc<Options> {
        &self.options
    }

    /// Get the internal key comparator.
    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Get the current version.
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current)
    }

    /// Allocate a new file number.
    pub fn new_file_number(&mut self) -> u64 {
        let number = self.next_file_number;
        self.next_file_number += 1;
        number
    }

    /// Give back a file number that was allocated but never used.
    pub fn reuse_file_number(&mut self, number: u64) {
        if self.next_file_number == number + 1 {
            self.next_file_number = number;
        }
    }

    /// Ensure `number` is never handed out.
    pub fn mark_file_number_used(&mut self, number: u64) {
        if self.next_file_number <= number {
            self.next_file_number = number + 1;
        }
    }

    /// Get the next file number without allocating it.
    pub fn next_file_number(&self) -> u64 {
        self.next_file_number
    }

    /// Number of the active MANIFEST.
    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence
    }

    /// Set the last sequence number. It never decreases.
    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence);
        self.last_sequence = self.last_sequence.max(seq);
    }

    /// Get the log number.
    pub fn log_number(&self) -> u64 {
        self.log_number
    }

    /// Get the previous log number.
    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number
    }

    /// Compaction pointer of a level.
    pub fn compact_pointer(&self, level: usize) -> Option<&InternalKey> {
        self.compact_pointers[level].as_ref()
    }

    /// Number of files at a level of the current version.
    pub fn num_level_files(&self, level: usize) -> usize {
        self.current.num_files(level)
    }

    /// Bytes at a level of the current version.
    pub fn num_level_bytes(&self, level: usize) -> u64 {
        self.current.level_size(level)
    }

    /// Whether the current version is due for compaction.
    pub fn needs_compaction(&self) -> bool {
        self.current.needs_compaction()
    }

    /// Number of Versions still referenced, the current one included.
    pub fn live_version_count(&self) -> usize {
        self.reachable_versions().count()
    }

    /// Add every file number referenced by any reachable Version to `live`.
    pub fn add_live_files(&self, live: &mut HashSet<u64>) {
        for version in self.reachable_versions() {
            version.add_live_files(live);
        }
    }

    /// Versions referenced from outside the registry, plus the current one.
    fn reachable_versions(&self) -> impl Iterator<Item = &Arc<Version>> {
        let current_id = self.current.id();
        self.versions
            .values()
            .filter(move |v| v.id() == current_id || Arc::strong_count(v) > 1)
    }

    /// Score every level and record the most urgent one in `version`.
    ///
    /// Level 0 is scored by file count against the trigger so a burst of
    /// small files is still compacted; other levels by bytes against their
    /// budget. The last level is never a compaction source.
    pub fn finalize(&self, version: &mut Version) {
        let mut best_level = 0;
        let mut best_score = -1.0;

        for level in 0..MAX_LEVELS - 1 {
            let score = if level == 0 {
                version.num_files(0) as f64 / self.options.l0_compaction_trigger as f64
            } else {
                version.level_size(level) as f64 / self.options.max_bytes_for_level(level)
            };

            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        version.set_compaction_info(best_score, best_level);
    }

    /// Log `edit` to the MANIFEST and install the resulting Version.
    ///
    /// Convenience for callers that hold no lock to release.
    pub fn log_and_apply(&mut self, edit: &mut VersionEdit) -> Result<()> {
        let mut pending = self.prepare_apply(edit)?;
        let result = pending.commit();
        self.finish_apply(pending, result)
    }

    /// First half of LogAndApply: fill in `edit`, build and score the new
    /// Version, and open a MANIFEST (with a snapshot) if none is open.
    pub fn prepare_apply(&mut self, edit: &mut VersionEdit) -> Result<PendingApply> {
        if self.apply_in_progress {
            return Err(Error::internal("concurrent MANIFEST update"));
        }

        match edit.log_number {
            Some(number) => {
                if number < self.log_number || number >= self.next_file_number {
                    return Err(Error::internal(format!(
                        "log number {} outside [{}, {})",
                        number, self.log_number, self.next_file_number
                    )));
                }
            }
            None => edit.set_log_number(self.log_number),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number);
        }
        edit.set_next_file_number(self.next_file_number);
        edit.set_last_sequence(self.last_sequence);

        let mut builder = Builder::new(self.icmp.clone(), self.current());
        builder.apply(edit);
        let mut version = builder.save_to(self.next_version_id)?;
        self.next_version_id += 1;
        self.apply_compact_pointers(edit);
        self.finalize(&mut version);

        let (writer, new_manifest) = match self.descriptor_log.take() {
            Some(writer) => (writer, None),
            None => (self.create_manifest()?, Some(self.manifest_file_number)),
        };

        self.apply_in_progress = true;
        Ok(PendingApply {
            db_path: self.db_path.clone(),
            writer,
            record: edit.encode(),
            new_manifest,
            version,
            log_number: edit.log_number.unwrap_or(self.log_number),
            prev_log_number: edit.prev_log_number.unwrap_or(self.prev_log_number),
        })
    }

    /// Second half of LogAndApply: install the Version if the commit
    /// succeeded, otherwise drop a MANIFEST that was created for it.
    pub fn finish_apply(&mut self, pending: PendingApply, result: Result<()>) -> Result<()> {
        self.apply_in_progress = false;

        let PendingApply {
            writer,
            new_manifest,
            version,
            log_number,
            prev_log_number,
            ..
        } = pending;

        if let Err(e) = result {
            info_log!(self.info_log, error: "MANIFEST write: {}", e);
            match new_manifest {
                Some(number) => {
                    drop(writer);
                    let path = manifest_file_path(&self.db_path, number);
                    if let Err(remove_err) = delete_file(&path) {
                        info_log!(self.info_log, warn: "Remove {} failed: {}", path.display(), remove_err);
                    }
                }
                None => self.descriptor_log = Some(writer),
            }
            return Err(e);
        }

        if let Some(number) = new_manifest {
            info_log!(self.info_log, "Created MANIFEST #{}", number);
        }

        self.descriptor_log = Some(writer);
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;
        self.append_version(version);
        Ok(())
    }

    /// Create the MANIFEST for `manifest_file_number` and write a snapshot
    /// of the current state as its first record.
    fn create_manifest(&mut self) -> Result<LogWriter> {
        let path = manifest_file_path(&self.db_path, self.manifest_file_number);
        let mut writer = LogWriter::create(&path, self.options.sync_mode)?;

        if let Err(e) = self.write_snapshot(&mut writer) {
            drop(writer);
            let _ = delete_file(&path);
            return Err(e);
        }
        Ok(writer)
    }

    fn write_snapshot(&self, writer: &mut LogWriter) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator(self.icmp.user_comparator().name());

        for (level, key) in self.compact_pointers.iter().enumerate() {
            if let Some(key) = key {
                edit.set_compact_pointer(level, key.clone());
            }
        }

        for (level, file) in self.current.all_files() {
            edit.add_file(level, file.as_ref().clone());
        }

        writer.add_record(&edit.encode())
    }

    fn apply_compact_pointers(&mut self, edit: &VersionEdit) {
        for (level, key) in &edit.compact_pointers {
            self.compact_pointers[*level] = Some(key.clone());
        }
    }

    /// Install `version` as current and drop unreferenced Versions.
    fn append_version(&mut self, version: Version) {
        let version = Arc::new(version);
        self.versions.insert(version.id(), Arc::clone(&version));
        self.current = version;

        let current_id = self.current.id();
        self.versions
            .retain(|&id, v| id == current_id || Arc::strong_count(v) > 1);

        tracing::debug!(
            version = current_id,
            summary = %self.current.level_summary(),
            score = self.current.compaction_score(),
            "installed version"
        );
    }

    /// Rebuild state from the MANIFEST named by CURRENT.
    ///
    /// Returns whether a new MANIFEST must be written (`save_manifest`).
    pub fn recover(&mut self) -> Result<bool> {
        let current_name = read_current_file(&self.db_path)?;
        let manifest_path = self.db_path.join(&current_name);

        let file = File::open(&manifest_path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::corruption(format!("CURRENT points to a non-existent file: {}", current_name))
            } else {
                e.into()
            }
        })?;

        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file = None;
        let mut last_sequence = None;

        let mut builder = Builder::new(self.icmp.clone(), self.current());
        let mut reader = LogReader::new(file, FirstCorruption::new());
        let mut read_records = 0usize;

        while let Some(record) = reader.read_record() {
            if reader.reporter().first().is_some() {
                break;
            }
            read_records += 1;

            let edit = VersionEdit::decode(&record)?;
            if let Some(name) = &edit.comparator {
                let ours = self.icmp.user_comparator().name();
                if name != ours {
                    return Err(Error::InvalidArgument(format!(
                        "{} does not match existing comparator {}",
                        name, ours
                    )));
                }
            }

            self.apply_compact_pointers(&edit);
            builder.apply(&edit);

            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file = edit.next_file_number.or(next_file);
            last_sequence = edit.last_sequence.or(last_sequence);
        }

        if let Some(corruption) = reader.reporter().first() {
            return Err(corruption.to_error());
        }

        let next_file = next_file
            .ok_or_else(|| Error::corruption("no meta-nextfile entry in descriptor"))?;
        let log_number = log_number
            .ok_or_else(|| Error::corruption("no meta-lognumber entry in descriptor"))?;
        let last_sequence = last_sequence
            .ok_or_else(|| Error::corruption("no last-sequence-number entry in descriptor"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = builder.save_to(self.next_version_id)?;
        self.next_version_id += 1;
        self.finalize(&mut version);

        self.manifest_file_number = next_file;
        self.next_file_number = next_file + 1;
        self.last_sequence = last_sequence;
        self.log_number = log_number;
        self.prev_log_number = prev_log_number;

        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        let max_table = version.all_files().map(|(_, f)| f.number()).max();
        if let Some(number) = max_table {
            self.mark_file_number_used(number);
        }

        self.append_version(version);

        info_log!(
            self.info_log,
            "Recovered {} from {} records: next_file={} log={} prev_log={} last_seq={}",
            current_name,
            read_records,
            self.next_file_number,
            self.log_number,
            self.prev_log_number,
            self.last_sequence
        );

        let save_manifest = !self.reuse_manifest(&manifest_path, &current_name);
        Ok(save_manifest)
    }

    /// Keep appending to the recovered MANIFEST if allowed and small enough.
    fn reuse_manifest(&mut self, manifest_path: &Path, name: &str) -> bool {
        if !self.options.reuse_manifest {
            return false;
        }

        let number = match parse_file_name(name) {
            Some((FileType::Manifest, number)) => number,
            _ => return false,
        };

        let size = match fs::metadata(manifest_path) {
            Ok(metadata) => metadata.len(),
            Err(_) => return false,
        };
        if size >= self.options.max_file_size {
            return false;
        }

        match LogWriter::open_for_append(manifest_path, self.options.sync_mode) {
            Ok(writer) => {
                info_log!(self.info_log, "Reusing MANIFEST {}", manifest_file_name(number));
                self.descriptor_log = Some(writer);
                self.manifest_file_number = number;
                true
            }
            Err(e) => {
                info_log!(self.info_log, warn: "Reuse MANIFEST: {}", e);
                false
            }
        }
    }

    /// Close the MANIFEST writer.
    pub fn close(&mut self) -> Result<()> {
        match self.descriptor_log.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InternalKey;
    use crate::util::comparator::ReverseBytewiseComparator;
    use crate::version::FileMetadata;
    use tempfile::{tempdir, TempDir};

    fn make_key(user_key: &[u8], seq: u64) -> InternalKey {
        InternalKey::for_value(user_key.to_vec(), seq)
    }

    fn make_file(number: u64, size: u64, smallest: &[u8], largest: &[u8]) -> FileMetadata {
        FileMetadata::new(number, size, make_key(smallest, 1), make_key(largest, 1))
    }

    fn new_version_set(dir: &TempDir, options: Options) -> VersionSet {
        VersionSet::new(dir.path(), Arc::new(options), Arc::new(InfoLog::disabled()))
    }

    /// Write MANIFEST-000001 the way a new database starts.
    fn bootstrap(dir: &TempDir) {
        let mut edit = VersionEdit::new();
        edit.set_comparator("leveldb.BytewiseComparator");
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let mut writer =
            LogWriter::create(&manifest_file_path(dir.path(), 1), Default::default()).unwrap();
        writer.add_record(&edit.encode()).unwrap();
        writer.close().unwrap();
        set_current_file(dir.path(), 1).unwrap();
    }

    fn recovered(dir: &TempDir, options: Options) -> (VersionSet, bool) {
        let mut vs = new_version_set(dir, options);
        let save_manifest = vs.recover().unwrap();
        (vs, save_manifest)
    }

    #[test]
    fn test_version_set_file_numbers() {
        let dir = tempdir().unwrap();
        let mut vs = new_version_set(&dir, Options::default());

        let n1 = vs.new_file_number();
        let n2 = vs.new_file_number();
        assert_eq!(n2, n1 + 1);

        vs.mark_file_number_used(100);
        assert_eq!(vs.new_file_number(), 101);

        let n = vs.new_file_number();
        vs.reuse_file_number(n);
        assert_eq!(vs.new_file_number(), n);
    }

    #[test]
    fn test_log_and_apply_writes_snapshot_then_edit() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);
        let (mut vs, save_manifest) = recovered(&dir, Options { reuse_manifest: false, ..Default::default() });
        assert!(save_manifest);

        let manifest_number = vs.manifest_file_number();
        let mut edit = VersionEdit::new();
        edit.add_file(0, make_file(vs.new_file_number(), 1024, b"a", b"z"));
        vs.log_and_apply(&mut edit).unwrap();

        assert_eq!(vs.num_level_files(0), 1);
        assert_eq!(
            read_current_file(dir.path()).unwrap(),
            manifest_file_name(manifest_number)
        );

        // The new MANIFEST holds the snapshot and the edit.
        let file = File::open(manifest_file_path(dir.path(), manifest_number)).unwrap();
        let mut reader = LogReader::new(file, FirstCorruption::new());
        let snapshot = VersionEdit::decode(&reader.read_record().unwrap()).unwrap();
        assert_eq!(snapshot.comparator.as_deref(), Some("leveldb.BytewiseComparator"));
        assert!(snapshot.new_files.is_empty());
        let logged = VersionEdit::decode(&reader.read_record().unwrap()).unwrap();
        assert_eq!(logged.new_files.len(), 1);
        assert!(logged.next_file_number.is_some());
        assert!(logged.last_sequence.is_some());
        assert!(reader.read_record().is_none());
    }

    #[test]
    fn test_recover_replays_edits() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);

        let (last_file, manifest) = {
            let (mut vs, _) = recovered(&dir, Options::default());

            let mut edit = VersionEdit::new();
            edit.add_file(0, make_file(vs.new_file_number(), 1024, b"a", b"m"));
            edit.add_file(0, make_file(vs.new_file_number(), 2048, b"b", b"y"));
            vs.log_and_apply(&mut edit).unwrap();

            vs.set_last_sequence(200);
            let mut edit = VersionEdit::new();
            let number = vs.new_file_number();
            edit.add_file(1, make_file(number, 4096, b"c", b"x"));
            edit.set_compact_pointer(1, make_key(b"c", 5));
            vs.log_and_apply(&mut edit).unwrap();
            vs.close().unwrap();
            (number, vs.manifest_file_number())
        };

        let (mut vs, save_manifest) = recovered(&dir, Options::default());
        assert!(!save_manifest);
        assert_eq!(vs.manifest_file_number(), manifest);
        assert_eq!(vs.num_level_files(0), 2);
        assert_eq!(vs.num_level_files(1), 1);
        assert_eq!(vs.last_sequence(), 200);
        assert_eq!(vs.compact_pointer(1).map(|k| k.user_key()), Some(&b"c"[..]));

        // File numbers are never reissued across recovery.
        assert!(vs.new_file_number() > last_file);
    }

    #[test]
    fn test_recover_reuse_disabled_starts_new_manifest() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);

        let options = Options {
            reuse_manifest: false,
            ..Default::default()
        };
        let (mut vs, save_manifest) = recovered(&dir, options.clone());
        assert!(save_manifest);
        assert_eq!(vs.manifest_file_number(), 2);

        let mut edit = VersionEdit::new();
        vs.log_and_apply(&mut edit).unwrap();
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000002");

        // The new MANIFEST alone is enough to recover.
        fs::remove_file(manifest_file_path(dir.path(), 1)).unwrap();
        let (vs, _) = recovered(&dir, options);
        assert_eq!(vs.manifest_file_number(), 3);
    }

    #[test]
    fn test_recover_large_manifest_not_reused() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);

        let options = Options {
            max_file_size: 1,
            ..Default::default()
        };
        let (_, save_manifest) = recovered(&dir, options);
        assert!(save_manifest);
    }

    #[test]
    fn test_recover_comparator_mismatch() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);

        let options = Options {
            comparator: Arc::new(ReverseBytewiseComparator),
            ..Default::default()
        };
        let mut vs = new_version_set(&dir, options);
        assert!(matches!(vs.recover(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_recover_corrupt_manifest_is_fatal() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);

        let path = manifest_file_path(dir.path(), 1);
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0x40;
        fs::write(&path, data).unwrap();

        let mut vs = new_version_set(&dir, Options::default());
        assert!(vs.recover().unwrap_err().is_corruption());
    }

    #[test]
    fn test_log_and_apply_rejects_overlap_above_level0() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);
        let (mut vs, _) = recovered(&dir, Options::default());

        let mut edit = VersionEdit::new();
        edit.add_file(1, make_file(vs.new_file_number(), 100, b"a", b"m"));
        edit.add_file(1, make_file(vs.new_file_number(), 100, b"c", b"z"));
        edit.set_compact_pointer(1, make_key(b"m", 1));
        assert!(vs.log_and_apply(&mut edit).unwrap_err().is_corruption());

        assert_eq!(vs.num_level_files(1), 0);
        assert!(vs.compact_pointer(1).is_none());

        // The set is still usable.
        let mut edit = VersionEdit::new();
        edit.add_file(1, make_file(vs.new_file_number(), 100, b"a", b"m"));
        vs.log_and_apply(&mut edit).unwrap();
        assert_eq!(vs.num_level_files(1), 1);
    }

    #[test]
    fn test_recover_overlapping_manifest_is_corruption() {
        let dir = tempdir().unwrap();

        let mut edit = VersionEdit::new();
        edit.set_comparator("leveldb.BytewiseComparator");
        edit.set_log_number(0);
        edit.set_next_file_number(10);
        edit.set_last_sequence(0);
        edit.add_file(2, make_file(4, 100, b"a", b"m"));
        edit.add_file(2, make_file(5, 100, b"k", b"z"));

        let mut writer =
            LogWriter::create(&manifest_file_path(dir.path(), 1), Default::default()).unwrap();
        writer.add_record(&edit.encode()).unwrap();
        writer.close().unwrap();
        set_current_file(dir.path(), 1).unwrap();

        let mut vs = new_version_set(&dir, Options::default());
        assert!(vs.recover().unwrap_err().is_corruption());
    }

    #[test]
    fn test_recover_missing_fields() {
        let dir = tempdir().unwrap();

        let mut edit = VersionEdit::new();
        edit.set_comparator("leveldb.BytewiseComparator");
        edit.set_log_number(0);
        let mut writer =
            LogWriter::create(&manifest_file_path(dir.path(), 1), Default::default()).unwrap();
        writer.add_record(&edit.encode()).unwrap();
        writer.close().unwrap();
        set_current_file(dir.path(), 1).unwrap();

        let mut vs = new_version_set(&dir, Options::default());
        let err = vs.recover().unwrap_err();
        assert!(err.to_string().contains("nextfile"));
    }

    #[test]
    fn test_recover_dangling_current() {
        let dir = tempdir().unwrap();
        set_current_file(dir.path(), 9).unwrap();

        let mut vs = new_version_set(&dir, Options::default());
        assert!(vs.recover().unwrap_err().is_corruption());
    }

    #[test]
    fn test_finalize_scores() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(&dir, Options::default());

        // Exactly four level-0 files score 1.0.
        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();
        for i in 0..4u64 {
            files[0].push(Arc::new(make_file(10 + i, 1, b"a", b"b")));
        }
        let mut version = Version::with_files(1, files);
        vs.finalize(&mut version);
        assert_eq!(version.compaction_score(), 1.0);
        assert_eq!(version.compaction_level(), 0);
        assert!(version.needs_compaction());

        // A level exactly at budget scores 1.0.
        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();
        files[2].push(Arc::new(make_file(20, 100 * 1024 * 1024, b"a", b"b")));
        let mut version = Version::with_files(2, files);
        vs.finalize(&mut version);
        assert_eq!(version.compaction_score(), 1.0);
        assert_eq!(version.compaction_level(), 2);
    }

    #[test]
    fn test_finalize_ties_keep_lower_level() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(&dir, Options::default());

        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();
        files[0].push(Arc::new(make_file(1, 1, b"a", b"b")));
        files[0].push(Arc::new(make_file(2, 1, b"c", b"d")));
        // Half of the 10MB L1 budget and half of the 100MB L2 budget.
        files[1].push(Arc::new(make_file(3, 5 * 1024 * 1024, b"a", b"b")));
        files[2].push(Arc::new(make_file(4, 50 * 1024 * 1024, b"a", b"b")));

        let mut version = Version::with_files(1, files);
        vs.finalize(&mut version);
        assert_eq!(version.compaction_score(), 0.5);
        assert_eq!(version.compaction_level(), 0);
        assert!(!version.needs_compaction());
    }

    #[test]
    fn test_finalize_ignores_last_level() {
        let dir = tempdir().unwrap();
        let vs = new_version_set(&dir, Options::default());

        let mut files: [Vec<Arc<FileMetadata>>; MAX_LEVELS] = Default::default();
        files[MAX_LEVELS - 1].push(Arc::new(make_file(1, u64::MAX / 2, b"a", b"b")));
        let mut version = Version::with_files(1, files);
        vs.finalize(&mut version);
        assert!(!version.needs_compaction());
    }

    #[test]
    fn test_add_live_files_includes_referenced_versions() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);
        let (mut vs, _) = recovered(&dir, Options::default());

        let mut edit = VersionEdit::new();
        edit.add_file(1, make_file(10, 100, b"a", b"b"));
        vs.mark_file_number_used(10);
        vs.log_and_apply(&mut edit).unwrap();

        let held = vs.current();

        let mut edit = VersionEdit::new();
        edit.delete_file(1, 10);
        edit.add_file(2, make_file(11, 100, b"a", b"b"));
        vs.mark_file_number_used(11);
        vs.log_and_apply(&mut edit).unwrap();

        let mut live = HashSet::new();
        vs.add_live_files(&mut live);
        assert_eq!(live, HashSet::from([10, 11]));
        assert_eq!(vs.live_version_count(), 2);

        drop(held);
        let mut live = HashSet::new();
        vs.add_live_files(&mut live);
        assert_eq!(live, HashSet::from([11]));
        assert_eq!(vs.live_version_count(), 1);
    }

    #[test]
    fn test_log_and_apply_rejects_stale_log_number() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);
        let (mut vs, _) = recovered(&dir, Options::default());

        let log = vs.new_file_number();
        let mut edit = VersionEdit::new();
        edit.set_log_number(log);
        vs.log_and_apply(&mut edit).unwrap();
        assert_eq!(vs.log_number(), log);

        let mut edit = VersionEdit::new();
        edit.set_log_number(log - 1);
        assert!(vs.log_and_apply(&mut edit).is_err());
    }

    #[test]
    fn test_failed_new_manifest_is_removed() {
        let dir = tempdir().unwrap();
        bootstrap(&dir);
        let (mut vs, save_manifest) = recovered(
            &dir,
            Options {
                reuse_manifest: false,
                ..Default::default()
            },
        );
        assert!(save_manifest);

        let mut edit = VersionEdit::new();
        let pending = vs.prepare_apply(&mut edit).unwrap();
        assert!(pending.creates_manifest());
        let manifest = manifest_file_path(dir.path(), vs.manifest_file_number());
        assert!(manifest.exists());

        let err = vs
            .finish_apply(pending, Err(Error::Io("disk full".into())))
            .unwrap_err();
        assert!(err.is_io());
        assert!(!manifest.exists());
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000001");
    }
}
