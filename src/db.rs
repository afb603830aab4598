//! Database - the driver around the VersionSet.
//!
//! The Database struct is the main entry point. It coordinates:
//! - Open and crash recovery (MANIFEST replay, then WAL replay)
//! - The active WAL and its rotation
//! - Obsolete file deletion
//! - The background compaction worker
//!
//! # Thread Safety
//!
//! The Database is thread-safe and can be shared across threads using Arc.
//! Writers are serialized by the WAL mutex. All metadata lives behind one
//! database mutex, which LogAndApply releases only while the MANIFEST record
//! is written and synced. Lock order is WAL mutex, then database mutex.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::compaction::{
    BackgroundScheduler, Compaction, CompactionPicker, CompactionState, CompactionStats,
    ManualCompaction, ScheduleContext,
};
use crate::log::{Corruption, LogReader, LogWriter, Reporter};
use crate::options::{Options, MAX_LEVELS};
use crate::types::{SequenceNumber, WriteBatch, BATCH_HEADER_SIZE};
use crate::util::filename::{
    create_dir_if_missing, current_file_path, delete_file, list_db_files, lock_file_path,
    log_file_path, manifest_file_path, set_current_file, table_file_path, FileType,
};
use crate::util::info_log::{info_log, InfoLog};
use crate::version::{Builder, FileMetadata, Version, VersionEdit, VersionSet};
use crate::{Error, Result};

/// The core database struct.
///
/// Dropping the handle closes it: the background worker is stopped and the
/// WAL and MANIFEST are synced.
pub struct Database {
    inner: Arc<DbInner>,
    /// Background compaction thread.
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// State shared with the background worker.
struct DbInner {
    /// Database directory path.
    db_path: PathBuf,
    /// Database options.
    options: Arc<Options>,
    /// Diagnostic log.
    info_log: Arc<InfoLog>,
    /// Active WAL writer. Holding this mutex serializes writers.
    wal: Mutex<Option<LogWriter>>,
    /// Everything guarded by the database mutex.
    state: Mutex<DbState>,
    /// Signaled when a step is scheduled or shutdown begins.
    bg_work_cv: Condvar,
    /// Signaled at the end of every background cycle.
    bg_done_cv: Condvar,
    /// Whether the database is shutting down.
    shutting_down: AtomicBool,
    /// First background error; sticky until reopen.
    bg_error: ArcSwapOption<Error>,
    /// Lock file handle (kept open to hold the lock).
    _lock_file: File,
}

struct DbState {
    versions: VersionSet,
    scheduler: BackgroundScheduler,
    /// Number of the active WAL.
    log_file_number: u64,
    /// Rotated WAL whose hand-off has not been recorded in the MANIFEST.
    imm_log_number: Option<u64>,
    /// Allocated table numbers not yet referenced by any Version.
    pending_outputs: HashSet<u64>,
}

impl Database {
    /// Open a database at the given path.
    ///
    /// If the database doesn't exist and `create_if_missing` is true,
    /// a new database will be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open a database with custom options.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let db_path = path.as_ref().to_path_buf();
        let options = Arc::new(options);

        if !db_path.exists() {
            if options.create_if_missing {
                create_dir_if_missing(&db_path)?;
            } else {
                return Err(Error::NotFound(format!(
                    "{}: does not exist (create_if_missing is false)",
                    db_path.display()
                )));
            }
        }

        let lock_file = Self::acquire_lock(&db_path)?;

        let info_log = Arc::new(if options.info_log {
            InfoLog::open(&db_path)?
        } else {
            InfoLog::disabled()
        });

        let mut versions = VersionSet::new(&db_path, Arc::clone(&options), Arc::clone(&info_log));
        let save_manifest = Self::recover(&db_path, &options, &info_log, &mut versions)?;

        let log_file_number = versions.new_file_number();
        let wal = LogWriter::create(&log_file_path(&db_path, log_file_number), options.sync_mode)?;

        let inner = Arc::new(DbInner {
            db_path,
            options,
            info_log,
            wal: Mutex::new(Some(wal)),
            state: Mutex::new(DbState {
                versions,
                scheduler: BackgroundScheduler::new(),
                log_file_number,
                imm_log_number: None,
                pending_outputs: HashSet::new(),
            }),
            bg_work_cv: Condvar::new(),
            bg_done_cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            bg_error: ArcSwapOption::empty(),
            _lock_file: lock_file,
        });

        {
            let mut state = inner.state.lock();
            if save_manifest {
                let mut edit = VersionEdit::new();
                edit.set_prev_log_number(0);
                edit.set_log_number(log_file_number);
                inner.log_and_apply(&mut state, &mut edit)?;
            }
            inner.delete_obsolete_files(&mut state);

            info_log!(
                inner.info_log,
                "Opened {}: log #{}, last sequence {}, {}",
                inner.db_path.display(),
                log_file_number,
                state.versions.last_sequence(),
                state.versions.current().level_summary()
            );
        }

        let worker = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("manifestdb-compaction".to_string())
                .spawn(move || inner.background_loop())?
        };

        inner.maybe_schedule(&mut inner.state.lock());

        Ok(Arc::new(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Acquire the database lock file.
    fn acquire_lock(db_path: &Path) -> Result<File> {
        let lock_path = lock_file_path(db_path);

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| {
                Error::LockError(format!(
                    "Failed to open lock file {}: {}",
                    lock_path.display(),
                    e
                ))
            })?;

        // Try to acquire an exclusive lock
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                return Err(Error::LockError(format!(
                    "{}: already held by another handle",
                    lock_path.display()
                )));
            }
        }

        Ok(lock_file)
    }

    /// Bring `versions` up to date with the directory.
    ///
    /// Returns whether a MANIFEST edit must be written before use.
    fn recover(
        db_path: &Path,
        options: &Options,
        info_log: &InfoLog,
        versions: &mut VersionSet,
    ) -> Result<bool> {
        if !current_file_path(db_path).exists() {
            if !options.create_if_missing {
                return Err(Error::NotFound(format!(
                    "{}: does not exist (create_if_missing is false)",
                    db_path.display()
                )));
            }
            info_log!(info_log, "Creating DB {}", db_path.display());
            Self::new_db(db_path, options)?;
        } else if options.error_if_exists {
            return Err(Error::AlreadyExists(format!(
                "{}: exists (error_if_exists is true)",
                db_path.display()
            )));
        }

        let mut save_manifest = versions.recover()?;

        // Every table the MANIFEST names must be on disk, and every WAL not
        // yet recorded as handed off must be replayed.
        let mut expected = HashSet::new();
        versions.add_live_files(&mut expected);
        let min_log = versions.log_number();
        let prev_log = versions.prev_log_number();

        let mut logs = Vec::new();
        for (file_type, number, _) in list_db_files(db_path)? {
            match file_type {
                FileType::Table => {
                    expected.remove(&number);
                }
                FileType::Log if number >= min_log || number == prev_log => logs.push(number),
                _ => {}
            }
            // Tables allocated but never logged still own their number.
            if matches!(
                file_type,
                FileType::Table | FileType::Temp | FileType::Log | FileType::Manifest
            ) {
                versions.mark_file_number_used(number);
            }
        }

        if let Some(&example) = expected.iter().min() {
            return Err(Error::corruption(format!(
                "{} missing files; e.g. {}",
                expected.len(),
                table_file_path(db_path, example).display()
            )));
        }

        logs.sort_unstable();
        let mut max_sequence = 0;
        for &number in &logs {
            Self::recover_log_file(db_path, options, info_log, number, &mut max_sequence)?;
            versions.mark_file_number_used(number);
        }

        if max_sequence > versions.last_sequence() {
            versions.set_last_sequence(max_sequence);
        }
        if !logs.is_empty() {
            save_manifest = true;
        }

        Ok(save_manifest)
    }

    /// Write MANIFEST-000001 for an empty database and point CURRENT at it.
    fn new_db(db_path: &Path, options: &Options) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator(options.comparator.name());
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let manifest = manifest_file_path(db_path, 1);
        let result = LogWriter::create(&manifest, options.sync_mode)
            .and_then(|mut writer| {
                writer.add_record(&edit.encode())?;
                writer.close()
            })
            .and_then(|()| set_current_file(db_path, 1));

        if result.is_err() {
            let _ = delete_file(&manifest);
        }
        result
    }

    /// Replay one WAL, raising `max_sequence` to the last sequence it holds.
    fn recover_log_file(
        db_path: &Path,
        options: &Options,
        info_log: &InfoLog,
        number: u64,
        max_sequence: &mut SequenceNumber,
    ) -> Result<()> {
        let path = log_file_path(db_path, number);
        let file = File::open(&path)?;
        info_log!(info_log, "Recovering log #{}", number);

        let reporter = LogReporter {
            info_log,
            path: &path,
            paranoid: options.paranoid_checks,
            status: None,
        };
        let mut reader = LogReader::new(file, reporter);
        let mut records = 0usize;

        while reader.reporter().status.is_none() {
            let Some(record) = reader.read_record() else {
                break;
            };

            if record.len() < BATCH_HEADER_SIZE {
                let corruption = Corruption {
                    offset: reader.position().saturating_sub(record.len() as u64),
                    bytes: record.len(),
                    reason: "log record too small".to_string(),
                };
                reader.reporter_mut().corruption(&corruption);
                continue;
            }

            let (sequence, count) = WriteBatch::decode_header(&record)?;
            records += 1;
            if count > 0 {
                let last = sequence.saturating_add(u64::from(count) - 1);
                *max_sequence = (*max_sequence).max(last);
            }
        }

        match reader.into_reporter().status {
            Some(e) => Err(e),
            None => {
                info_log!(info_log, "Log #{}: {} records, max sequence {}", number, records, max_sequence);
                Ok(())
            }
        }
    }

    /// Put a key-value pair.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.write(batch)
    }

    /// Delete a key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(Bytes::copy_from_slice(key));
        self.write(batch)
    }

    /// Append a batch to the WAL and assign its sequence numbers.
    ///
    /// Writes are accepted after a background error; only compaction stops.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if self.inner.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        if batch.is_empty() {
            return Ok(());
        }

        // Serialize writes
        let mut wal = self.inner.wal.lock();
        let writer = wal.as_mut().ok_or(Error::ShuttingDown)?;

        let sequence = self.inner.state.lock().versions.last_sequence() + 1;
        writer.add_record(&batch.encode(sequence))?;

        let last = sequence + batch.len() as u64 - 1;
        self.inner.state.lock().versions.set_last_sequence(last);
        Ok(())
    }

    /// Rotate the WAL and wait until the rotation is recorded in the MANIFEST.
    ///
    /// The previous segment becomes obsolete once the background worker has
    /// logged the new log number.
    pub fn flush(&self) -> Result<()> {
        let inner = &self.inner;

        // Wait out an earlier hand-off without holding up writers.
        let (mut wal, mut state) = loop {
            {
                let mut state = inner.state.lock();
                while state.imm_log_number.is_some() {
                    inner.check_open()?;
                    inner.check_background_error()?;
                    inner.bg_done_cv.wait(&mut state);
                }
            }

            let wal = inner.wal.lock();
            let state = inner.state.lock();
            // Another flush may have rotated in between.
            if state.imm_log_number.is_none() {
                break (wal, state);
            }
        };
        inner.check_open()?;
        inner.check_background_error()?;
        let old_writer = wal.as_mut().ok_or(Error::ShuttingDown)?;

        // The old segment must be durable before the hand-off can retire it.
        old_writer.sync()?;

        let new_number = state.versions.new_file_number();
        let writer = match LogWriter::create(
            &log_file_path(&inner.db_path, new_number),
            inner.options.sync_mode,
        ) {
            Ok(writer) => writer,
            Err(e) => {
                state.versions.reuse_file_number(new_number);
                return Err(e);
            }
        };

        let old_writer = wal.replace(writer);
        let old_number = std::mem::replace(&mut state.log_file_number, new_number);
        state.imm_log_number = Some(old_number);
        drop(wal);

        if let Some(Err(e)) = old_writer.map(LogWriter::close) {
            info_log!(inner.info_log, warn: "Closing synced log #{}: {}", old_number, e);
        }

        info_log!(inner.info_log, "Switched from log #{} to #{}", old_number, new_number);
        inner.maybe_schedule(&mut state);

        while state.imm_log_number == Some(old_number) {
            inner.check_open()?;
            inner.check_background_error()?;
            inner.bg_done_cv.wait(&mut state);
        }
        Ok(())
    }

    /// Compact every file of `level` into `level + 1`.
    pub fn compact_level(&self, level: usize) -> Result<()> {
        self.compact_range(level, None, None)
    }

    /// Compact the files of `level` overlapping `[begin, end]` into
    /// `level + 1`; `None` bounds are open.
    ///
    /// Blocks until the background worker has served the request.
    pub fn compact_range(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        if level + 1 >= MAX_LEVELS {
            return Err(Error::InvalidArgument(format!(
                "cannot compact level {}: level {} is the last",
                level,
                MAX_LEVELS - 1
            )));
        }

        let inner = &self.inner;
        let manual =
            ManualCompaction::with_range(level, begin.map(<[u8]>::to_vec), end.map(<[u8]>::to_vec));

        let mut state = inner.state.lock();
        loop {
            inner.check_open()?;
            inner.check_background_error()?;
            if state.scheduler.request_manual(manual.clone()) {
                break;
            }
            inner.bg_done_cv.wait(&mut state);
        }

        inner.maybe_schedule(&mut state);
        while state.scheduler.has_pending_manual()
            && !inner.is_shutting_down()
            && inner.bg_error.load().is_none()
        {
            inner.bg_done_cv.wait(&mut state);
        }

        let served = state.scheduler.clear_manual().map_or(false, |m| m.done);
        // Let the next manual request in.
        inner.bg_done_cv.notify_all();

        inner.check_background_error()?;
        if !served {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Wait until the background worker is idle.
    ///
    /// Returns the background error, if one has been recorded.
    pub fn wait_for_background_work(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        while state.scheduler.is_busy() {
            self.inner.bg_done_cv.wait(&mut state);
        }
        self.inner.check_background_error()
    }

    /// Allocate a table file number for an external table writer.
    ///
    /// The number is protected from obsolete-file deletion until an
    /// [`apply_edit`](Self::apply_edit) adds a file with it.
    pub fn new_file_number(&self) -> u64 {
        let mut state = self.inner.state.lock();
        let number = state.versions.new_file_number();
        state.pending_outputs.insert(number);
        number
    }

    /// Log a file-only VersionEdit and install the resulting Version.
    ///
    /// Waits for the background worker to be idle and keeps the database
    /// lock across the MANIFEST write, so it never overlaps a compaction.
    pub fn apply_edit(&self, mut edit: VersionEdit) -> Result<()> {
        if edit.comparator.is_some() {
            return Err(Error::InvalidArgument(
                "the comparator of an open database cannot change".to_string(),
            ));
        }

        let bad_level = edit
            .new_files
            .iter()
            .map(|(level, _)| *level)
            .chain(edit.deleted_files.iter().map(|(level, _)| *level))
            .chain(edit.compact_pointers.iter().map(|(level, _)| *level))
            .find(|&level| level >= MAX_LEVELS);
        if let Some(level) = bad_level {
            return Err(Error::InvalidArgument(format!("level {} out of range", level)));
        }

        let inner = &self.inner;
        let mut state = inner.state.lock();
        while state.scheduler.is_busy() {
            inner.bg_done_cv.wait(&mut state);
        }
        inner.check_open()?;

        // Levels above 0 must stay sorted and disjoint once the edit applies.
        {
            let mut builder = Builder::new(state.versions.icmp().clone(), state.versions.current());
            builder.apply(&edit);
            if let Err(e) = builder.save_to(0) {
                return Err(Error::InvalidArgument(e.to_string()));
            }
        }

        let added: Vec<u64> = edit.new_files.iter().map(|(_, f)| f.number()).collect();
        for &number in &added {
            state.versions.mark_file_number_used(number);
        }

        let mut pending = state.versions.prepare_apply(&mut edit)?;
        let result = pending.commit();
        state.versions.finish_apply(pending, result)?;

        for number in &added {
            state.pending_outputs.remove(number);
        }

        tracing::debug!(files = added.len(), "applied external edit");
        if !edit.deleted_files.is_empty() {
            inner.delete_obsolete_files(&mut state);
        }
        inner.maybe_schedule(&mut state);
        Ok(())
    }

    /// The current Version. Holding it keeps its files on disk.
    pub fn current_version(&self) -> Arc<Version> {
        self.inner.state.lock().versions.current()
    }

    /// Numbers of all table files referenced by a live Version.
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = HashSet::new();
        self.inner.state.lock().versions.add_live_files(&mut live);
        live
    }

    /// The sticky background error, if one has been recorded.
    pub fn background_error(&self) -> Option<Error> {
        self.inner.bg_error.load_full().map(|e| e.as_ref().clone())
    }

    /// Get the last sequence number.
    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.state.lock().versions.last_sequence()
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.inner.db_path
    }

    /// Get database statistics.
    pub fn stats(&self) -> DatabaseStats {
        let state = self.inner.state.lock();
        let version = state.versions.current();

        let level_stats = (0..MAX_LEVELS)
            .map(|level| LevelStats {
                level,
                num_files: version.num_files(level),
                size_bytes: version.level_size(level),
            })
            .collect();

        DatabaseStats {
            level_stats,
            compaction_score: version.compaction_score(),
            compaction_level: version.compaction_level(),
            compaction_state: state.scheduler.state(),
            compactions: state.scheduler.stats().clone(),
            last_sequence: state.versions.last_sequence(),
            live_versions: state.versions.live_version_count(),
            log_file_number: state.log_file_number,
        }
    }

    /// Close the database gracefully.
    ///
    /// Stops the background worker after its current step and syncs the WAL
    /// and the MANIFEST. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        {
            let _state = self.inner.state.lock();
            self.inner.bg_work_cv.notify_all();
            self.inner.bg_done_cv.notify_all();
        }

        let mut result = Ok(());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                result = Err(Error::internal("compaction thread panicked"));
            }
        }

        if let Some(wal) = self.inner.wal.lock().take() {
            result = result.and(wal.close());
        }

        let mut state = self.inner.state.lock();
        result = result.and(state.versions.close());
        info_log!(
            self.inner.info_log,
            "Closed at sequence {}",
            state.versions.last_sequence()
        );
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("close on drop failed: {}", e);
        }
    }
}

impl DbInner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn check_open(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    fn check_background_error(&self) -> Result<()> {
        match self.bg_error.load_full() {
            Some(e) => Err(e.as_ref().clone()),
            None => Ok(()),
        }
    }

    /// Record the first background error. Only the worker calls this, with the
    /// database lock held.
    fn record_background_error(&self, e: Error) {
        if self.is_shutting_down() {
            info_log!(self.info_log, warn: "Ignoring error while shutting down: {}", e);
            return;
        }
        if self.bg_error.load().is_none() {
            info_log!(self.info_log, error: "Background error: {}", e);
            self.bg_error.store(Some(Arc::new(e)));
            self.bg_done_cv.notify_all();
        }
    }

    /// LogAndApply with the database lock released around the MANIFEST write.
    fn log_and_apply(&self, state: &mut MutexGuard<'_, DbState>, edit: &mut VersionEdit) -> Result<()> {
        let mut pending = state.versions.prepare_apply(edit)?;
        let result = MutexGuard::unlocked(state, || pending.commit());
        state.versions.finish_apply(pending, result)
    }

    /// Move the worker from idle to scheduled if there is work.
    fn maybe_schedule(&self, state: &mut DbState) {
        let current = state.versions.current();
        let scheduled = state.scheduler.maybe_schedule(ScheduleContext {
            shutting_down: self.is_shutting_down(),
            has_bg_error: self.bg_error.load().is_some(),
            log_hand_off_pending: state.imm_log_number.is_some(),
            current: &current,
        });

        if scheduled {
            tracing::debug!(
                score = current.compaction_score(),
                level = current.compaction_level(),
                "scheduled background work"
            );
            self.bg_work_cv.notify_one();
        }
    }

    fn background_loop(&self) {
        let mut state = self.state.lock();
        loop {
            while state.scheduler.state() != CompactionState::Scheduled && !self.is_shutting_down() {
                self.bg_work_cv.wait(&mut state);
            }

            if self.is_shutting_down() {
                state.scheduler.cancel();
                self.bg_done_cv.notify_all();
                break;
            }

            state.scheduler.start();
            self.background_call(&mut state);
            state.scheduler.finish();

            // One step may leave more work behind.
            self.maybe_schedule(&mut state);
            self.bg_done_cv.notify_all();
        }
    }

    fn background_call(&self, state: &mut MutexGuard<'_, DbState>) {
        if self.is_shutting_down() || self.bg_error.load().is_some() {
            return;
        }

        if let Err(e) = self.background_compaction(state) {
            self.record_background_error(e);
        }
    }

    /// Run one step: a WAL hand-off, a manual compaction or a size compaction.
    fn background_compaction(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let result = match state.imm_log_number {
            Some(old_log) => self.hand_off_log(state, old_log),
            None => self.compaction_step(state),
        };

        self.delete_obsolete_files(state);
        result
    }

    fn hand_off_log(&self, state: &mut MutexGuard<'_, DbState>, old_log: u64) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_prev_log_number(0);
        edit.set_log_number(state.log_file_number);
        self.log_and_apply(state, &mut edit)?;

        state.imm_log_number = None;
        state.scheduler.stats_mut().record_log_hand_off();
        info_log!(
            self.info_log,
            "Log #{} handed off, log #{} active",
            old_log,
            state.log_file_number
        );
        Ok(())
    }

    fn compaction_step(&self, state: &mut MutexGuard<'_, DbState>) -> Result<()> {
        let manual = state.scheduler.pending_manual().cloned();
        let compaction = Self::pick_compaction(state, manual.as_ref());

        let result = match &compaction {
            Some(c) if c.is_trivial_move() => self.trivial_move(state, c),
            Some(c) => self.do_compaction_work(state, c),
            None => {
                match &manual {
                    Some(m) => info_log!(self.info_log, "Manual compaction at level-{}: nothing to do", m.level),
                    None => {
                        // Due for compaction but nothing to pick.
                        let id = state.versions.current().id();
                        state.scheduler.stall(id);
                    }
                }
                Ok(())
            }
        };

        if manual.is_some() {
            state.scheduler.complete_manual();
        }
        result
    }

    fn pick_compaction(state: &DbState, manual: Option<&ManualCompaction>) -> Option<Compaction> {
        let current = state.versions.current();
        let picker = CompactionPicker::new(state.versions.icmp().clone());

        match manual {
            Some(m) => picker.pick_manual_compaction(&current, m.level, m.begin.as_deref(), m.end.as_deref()),
            None => {
                let pointer = state.versions.compact_pointer(current.compaction_level());
                picker.pick_compaction(&current, pointer)
            }
        }
    }

    fn trivial_move(&self, state: &mut MutexGuard<'_, DbState>, c: &Compaction) -> Result<()> {
        let file = &c.inputs(0)[0];

        let mut edit = VersionEdit::new();
        edit.set_compact_pointer(c.level(), c.level_largest().clone());
        edit.delete_file(c.level(), file.number());
        edit.add_file(c.output_level(), (**file).clone());
        self.log_and_apply(state, &mut edit)?;

        state.scheduler.stats_mut().record_trivial_move(c.level());
        info_log!(
            self.info_log,
            "Moved #{} to level-{} {} bytes: {}",
            file.number(),
            c.output_level(),
            file.file_size(),
            state.versions.current().level_summary()
        );
        Ok(())
    }

    fn do_compaction_work(&self, state: &mut MutexGuard<'_, DbState>, c: &Compaction) -> Result<()> {
        let Some(compactor) = self.options.merge_compactor.clone() else {
            info_log!(
                self.info_log,
                warn: "Compaction of {} skipped: no merge compactor configured",
                c
            );
            let id = state.versions.current().id();
            state.scheduler.stall(id);
            return Ok(());
        };

        info_log!(self.info_log, "Compacting {} with {}", c, compactor.name());
        let start = Instant::now();

        let mut allocated = Vec::new();
        let outputs = MutexGuard::unlocked(state, || {
            let mut new_file_number = || {
                let mut state = self.state.lock();
                let number = state.versions.new_file_number();
                state.pending_outputs.insert(number);
                allocated.push(number);
                number
            };
            compactor.compact(c, &mut new_file_number)
        });

        let result = match outputs {
            Ok(outputs) => self.install_compaction_results(state, c, &allocated, outputs, start),
            Err(e) => Err(e),
        };

        for number in &allocated {
            state.pending_outputs.remove(number);
        }
        result
    }

    fn install_compaction_results(
        &self,
        state: &mut MutexGuard<'_, DbState>,
        c: &Compaction,
        allocated: &[u64],
        outputs: Vec<FileMetadata>,
        start: Instant,
    ) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_compact_pointer(c.level(), c.level_largest().clone());
        c.add_input_deletions(&mut edit);

        let mut bytes_written = 0;
        for file in outputs {
            if !allocated.contains(&file.number()) {
                return Err(Error::compaction(format!(
                    "output #{} was not allocated for this compaction",
                    file.number()
                )));
            }
            bytes_written += file.file_size();
            edit.add_file(c.output_level(), file);
        }

        self.log_and_apply(state, &mut edit)?;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        state
            .scheduler
            .stats_mut()
            .record_merge(c.level(), c.input_bytes(), bytes_written, elapsed_ms);
        info_log!(
            self.info_log,
            "Compacted {} => {} bytes: {}",
            c,
            bytes_written,
            state.versions.current().level_summary()
        );
        Ok(())
    }

    /// Delete every file no live Version, pending output or active log needs.
    fn delete_obsolete_files(&self, state: &mut DbState) {
        // After a background error the MANIFEST state is uncertain.
        if self.bg_error.load().is_some() {
            return;
        }

        let mut live = state.pending_outputs.clone();
        state.versions.add_live_files(&mut live);

        let entries = match list_db_files(&self.db_path) {
            Ok(entries) => entries,
            Err(e) => {
                info_log!(
                    self.info_log,
                    warn: "Skipping obsolete file deletion: cannot list {}: {}",
                    self.db_path.display(),
                    e
                );
                return;
            }
        };

        let log_number = state.versions.log_number();
        let prev_log_number = state.versions.prev_log_number();
        let manifest_number = state.versions.manifest_file_number();

        for (file_type, number, name) in entries {
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Manifest => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::Lock | FileType::InfoLog => true,
            };
            if keep {
                continue;
            }

            match delete_file(&self.db_path.join(&name)) {
                Ok(()) => info_log!(self.info_log, "Delete type={:?} #{}", file_type, number),
                Err(e) => info_log!(self.info_log, warn: "Delete {} failed: {}", name, e),
            }
        }
    }
}

/// Logs dropped WAL regions; with paranoid checks the first one fails Open.
struct LogReporter<'a> {
    info_log: &'a InfoLog,
    path: &'a Path,
    paranoid: bool,
    status: Option<Error>,
}

impl Reporter for LogReporter<'_> {
    fn corruption(&mut self, corruption: &Corruption) {
        info_log!(
            self.info_log,
            warn: "{}: dropping {} bytes; {}",
            self.path.display(),
            corruption.bytes,
            corruption.reason
        );
        if self.paranoid && self.status.is_none() {
            self.status = Some(corruption.to_error());
        }
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Per-level statistics.
    pub level_stats: Vec<LevelStats>,
    /// Compaction score of the current Version.
    pub compaction_score: f64,
    /// Level the score belongs to.
    pub compaction_level: usize,
    /// State of the background worker.
    pub compaction_state: CompactionState,
    /// Finished background steps.
    pub compactions: CompactionStats,
    /// Last sequence number.
    pub last_sequence: SequenceNumber,
    /// Versions still referenced, the current one included.
    pub live_versions: usize,
    /// Number of the active WAL.
    pub log_file_number: u64,
}

/// Statistics for a single level.
#[derive(Debug, Clone)]
pub struct LevelStats {
    /// Level number.
    pub level: usize,
    /// Number of files at this level.
    pub num_files: usize,
    /// Total size in bytes.
    pub size_bytes: u64,
}

impl std::fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Last sequence: {}", self.last_sequence)?;
        writeln!(f, "  Log: #{}", self.log_file_number)?;
        writeln!(f, "  Live versions: {}", self.live_versions)?;
        writeln!(
            f,
            "  Compaction: score {:.2} at level {} ({:?})",
            self.compaction_score, self.compaction_level, self.compaction_state
        )?;
        writeln!(f, "  Levels:")?;
        for level in &self.level_stats {
            writeln!(
                f,
                "    L{}: {} files, {:.2} MB",
                level.level,
                level.num_files,
                level.size_bytes as f64 / (1024.0 * 1024.0)
            )?;
        }
        write!(f, "{}", self.compactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::FirstCorruption;
    use crate::util::filename::{read_current_file, FileType};
    use std::fs;
    use tempfile::tempdir;

    fn files_of_type(path: &Path, file_type: FileType) -> Vec<u64> {
        crate::util::filename::list_files_of_type(path, file_type).unwrap()
    }

    #[test]
    fn test_database_open_new() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        assert_eq!(db.path(), dir.path());
        assert_eq!(db.last_sequence(), 0);
        assert_eq!(read_current_file(dir.path()).unwrap(), "MANIFEST-000001");
        assert!(dir.path().join("LOCK").exists());
        assert!(dir.path().join("LOG").exists());
        assert_eq!(files_of_type(dir.path(), FileType::Log).len(), 1);
    }

    #[test]
    fn test_database_write_assigns_sequences() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"key1", b"value1").unwrap();
        assert_eq!(db.last_sequence(), 1);

        let mut batch = WriteBatch::new();
        batch.put(&b"key2"[..], &b"value2"[..]);
        batch.put(&b"key3"[..], &b"value3"[..]);
        batch.delete(&b"key1"[..]);
        db.write(batch).unwrap();
        assert_eq!(db.last_sequence(), 4);

        // Empty batches consume nothing.
        db.write(WriteBatch::new()).unwrap();
        assert_eq!(db.last_sequence(), 4);
    }

    #[test]
    fn test_database_wal_holds_batches() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"a", b"1").unwrap();
        db.delete(b"b").unwrap();
        let log_number = db.stats().log_file_number;
        drop(db);

        let file = File::open(log_file_path(dir.path(), log_number)).unwrap();
        let mut reader = LogReader::new(file, FirstCorruption::new());

        let (seq, batch) = WriteBatch::decode(&reader.read_record().unwrap()).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(batch.len(), 1);
        let (seq, batch) = WriteBatch::decode(&reader.read_record().unwrap()).unwrap();
        assert_eq!(seq, 2);
        assert!(batch.entries()[0].value.is_none());
        assert!(reader.read_record().is_none());
    }

    #[test]
    fn test_database_wal_recovery() {
        let dir = tempdir().unwrap();

        let old_log = {
            let db = Database::open(dir.path()).unwrap();
            for i in 0..10 {
                db.put(format!("key{}", i).as_bytes(), b"value").unwrap();
            }
            db.stats().log_file_number
        };

        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.last_sequence(), 10);

        // The replayed log was recorded as handed off and deleted.
        assert!(!log_file_path(dir.path(), old_log).exists());
        assert_eq!(files_of_type(dir.path(), FileType::Log), vec![db.stats().log_file_number]);

        db.put(b"more", b"value").unwrap();
        assert_eq!(db.last_sequence(), 11);
    }

    #[test]
    fn test_database_flush_hands_off_log() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"key", b"value").unwrap();
        let old_log = db.stats().log_file_number;

        db.flush().unwrap();

        let stats = db.stats();
        assert!(stats.log_file_number > old_log);
        assert_eq!(stats.compactions.log_hand_offs(), 1);
        assert!(db.background_error().is_none());
        assert!(!log_file_path(dir.path(), old_log).exists());
        assert!(log_file_path(dir.path(), stats.log_file_number).exists());

        db.put(b"key", b"value2").unwrap();
        assert_eq!(db.last_sequence(), 2);
    }

    #[test]
    fn test_database_flush_create_failure_keeps_log() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        db.put(b"key", b"value").unwrap();

        let active = db.stats().log_file_number;
        let taken = db.new_file_number();
        // A directory where the next segment would go.
        fs::create_dir(log_file_path(dir.path(), taken + 1)).unwrap();

        assert!(db.flush().is_err());
        assert!(db.background_error().is_none());
        assert_eq!(db.stats().log_file_number, active);

        db.put(b"key", b"value2").unwrap();
        assert_eq!(db.last_sequence(), 2);
        drop(db);

        fs::remove_dir(log_file_path(dir.path(), taken + 1)).unwrap();
        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.last_sequence(), 2);
    }

    #[test]
    fn test_database_unlogged_table_number_not_reissued() {
        let dir = tempdir().unwrap();

        let taken = {
            let db = Database::open(dir.path()).unwrap();
            let number = db.new_file_number();
            fs::write(table_file_path(dir.path(), number), b"unlogged").unwrap();
            number
        };

        let db = Database::open(dir.path()).unwrap();
        assert!(db.stats().log_file_number > taken);
        assert!(db.new_file_number() > taken);
    }

    #[test]
    fn test_apply_edit_rejects_overlap_above_level0() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let file = |number: u64, smallest: &[u8], largest: &[u8]| {
            FileMetadata::new(
                number,
                10,
                crate::types::InternalKey::for_value(smallest.to_vec(), 1),
                crate::types::InternalKey::for_value(largest.to_vec(), 1),
            )
        };

        let (a, b) = (db.new_file_number(), db.new_file_number());
        let mut edit = VersionEdit::new();
        edit.add_file(1, file(a, b"a", b"m"));
        edit.add_file(1, file(b, b"c", b"z"));
        assert!(matches!(db.apply_edit(edit), Err(Error::InvalidArgument(_))));
        assert_eq!(db.current_version().num_files(1), 0);

        fs::write(table_file_path(dir.path(), a), b"a..m").unwrap();
        let mut edit = VersionEdit::new();
        edit.add_file(1, file(a, b"a", b"m"));
        db.apply_edit(edit).unwrap();

        // Overlaps the file already at level 1.
        let mut edit = VersionEdit::new();
        edit.add_file(1, file(b, b"k", b"z"));
        assert!(matches!(db.apply_edit(edit), Err(Error::InvalidArgument(_))));
        assert_eq!(db.current_version().num_files(1), 1);
        drop(db);

        let db = Database::open(dir.path()).unwrap();
        assert_eq!(db.current_version().num_files(1), 1);
    }

    #[test]
    fn test_apply_edit_deletes_removed_files() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let number = db.new_file_number();
        let path = table_file_path(dir.path(), number);
        fs::write(&path, b"table").unwrap();

        let mut edit = VersionEdit::new();
        edit.add_file(
            0,
            FileMetadata::new(
                number,
                5,
                crate::types::InternalKey::for_value(b"a".to_vec(), 1),
                crate::types::InternalKey::for_value(b"b".to_vec(), 1),
            ),
        );
        db.apply_edit(edit).unwrap();
        assert!(path.exists());

        let mut edit = VersionEdit::new();
        edit.delete_file(0, number);
        db.apply_edit(edit).unwrap();

        assert!(!db.live_files().contains(&number));
        assert!(!path.exists());
    }

    #[test]
    fn test_database_error_if_exists() {
        let dir = tempdir().unwrap();

        {
            let _db = Database::open(dir.path()).unwrap();
        }

        let opts = Options {
            error_if_exists: true,
            ..Default::default()
        };

        let result = Database::open_with_options(dir.path(), opts);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_database_not_found() {
        let dir = tempdir().unwrap();
        let non_existent = dir.path().join("not_exists");

        let opts = Options {
            create_if_missing: false,
            ..Default::default()
        };

        let result = Database::open_with_options(&non_existent, opts.clone());
        assert!(matches!(result, Err(Error::NotFound(_))));

        // An existing but empty directory has no CURRENT either.
        let result = Database::open_with_options(dir.path(), opts);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_database_invalid_options() {
        let dir = tempdir().unwrap();
        let opts = Options {
            l0_compaction_trigger: 0,
            ..Default::default()
        };
        assert!(matches!(
            Database::open_with_options(dir.path(), opts),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_database_info_log_disabled() {
        let dir = tempdir().unwrap();
        let opts = Options {
            info_log: false,
            ..Default::default()
        };
        let _db = Database::open_with_options(dir.path(), opts).unwrap();
        assert!(!dir.path().join("LOG").exists());
    }

    #[test]
    fn test_database_info_log_rotated() {
        let dir = tempdir().unwrap();
        drop(Database::open(dir.path()).unwrap());
        drop(Database::open(dir.path()).unwrap());

        assert!(dir.path().join("LOG").exists());
        assert!(dir.path().join("LOG.old").exists());
        let log = fs::read_to_string(dir.path().join("LOG")).unwrap();
        assert!(log.contains("Opened"));
    }

    #[test]
    fn test_database_write_after_close() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.close().unwrap();
        db.close().unwrap();

        assert!(matches!(db.put(b"k", b"v"), Err(Error::ShuttingDown)));
        assert!(matches!(db.flush(), Err(Error::ShuttingDown)));
        assert!(matches!(db.compact_level(0), Err(Error::ShuttingDown)));
    }

    #[test]
    fn test_database_short_wal_record() {
        let dir = tempdir().unwrap();
        {
            let _db = Database::open(dir.path()).unwrap();
        }

        // A WAL with a record too small for a batch header.
        let number = 100;
        let mut writer = LogWriter::create(&log_file_path(dir.path(), number), Default::default()).unwrap();
        writer.add_record(b"short").unwrap();
        writer.close().unwrap();

        // Reported and skipped by default.
        {
            let db = Database::open(dir.path()).unwrap();
            assert_eq!(db.last_sequence(), 0);
            assert!(db.stats().log_file_number > number);
        }

        let mut writer = LogWriter::create(&log_file_path(dir.path(), 200), Default::default()).unwrap();
        writer.add_record(b"short").unwrap();
        writer.close().unwrap();

        let opts = Options {
            paranoid_checks: true,
            ..Default::default()
        };
        let err = Database::open_with_options(dir.path(), opts).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_database_stats() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        db.put(b"key", b"value").unwrap();

        let stats = db.stats();
        assert_eq!(stats.last_sequence, 1);
        assert_eq!(stats.level_stats.len(), MAX_LEVELS);
        assert_eq!(stats.live_versions, 1);
        assert_eq!(stats.compaction_state, CompactionState::Idle);

        let text = stats.to_string();
        assert!(text.contains("Last sequence: 1"));
        assert!(text.contains("L6: 0 files"));
    }

    #[test]
    fn test_database_compact_last_level_rejected() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        assert!(matches!(
            db.compact_level(MAX_LEVELS - 1),
            Err(Error::InvalidArgument(_))
        ));
        // Nothing to compact is fine.
        db.compact_level(0).unwrap();
    }

    #[test]
    fn test_apply_edit_validation() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let mut edit = VersionEdit::new();
        edit.set_comparator("other");
        assert!(matches!(db.apply_edit(edit), Err(Error::InvalidArgument(_))));

        let mut edit = VersionEdit::new();
        edit.delete_file(MAX_LEVELS, 1);
        assert!(matches!(db.apply_edit(edit), Err(Error::InvalidArgument(_))));
    }
}
