//! Background compaction - the scheduling state machine.
//!
//! This module provides:
//! - The idle / scheduled / running state of the single background worker
//! - The pending manual compaction request
//! - Per-level counters of finished compaction steps
//!
//! The worker thread itself lives with the database driver; everything here
//! is plain state mutated under the database lock.

use std::fmt;

use crate::options::MAX_LEVELS;
use crate::version::Version;

/// Background compaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionState {
    /// Idle, no compaction running.
    #[default]
    Idle,
    /// A step is scheduled but the worker has not picked it up.
    Scheduled,
    /// The worker is running a step.
    Running,
}

/// A manual compaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualCompaction {
    /// Level to compact from.
    pub level: usize,
    /// Smallest user key to include; `None` is unbounded.
    pub begin: Option<Vec<u8>>,
    /// Largest user key to include; `None` is unbounded.
    pub end: Option<Vec<u8>>,
    /// Set by the worker once the request has been served.
    pub done: bool,
}

impl ManualCompaction {
    /// Create a manual compaction request for a whole level.
    pub fn new(level: usize) -> Self {
        Self::with_range(level, None, None)
    }

    /// Create a manual compaction request with a key range.
    pub fn with_range(level: usize, begin: Option<Vec<u8>>, end: Option<Vec<u8>>) -> Self {
        Self {
            level,
            begin,
            end,
            done: false,
        }
    }
}

/// What the scheduler needs to know about the rest of the database.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleContext<'a> {
    /// The shutdown flag is set.
    pub shutting_down: bool,
    /// A background error has been recorded.
    pub has_bg_error: bool,
    /// A rotated WAL is waiting to be recorded in the MANIFEST.
    pub log_hand_off_pending: bool,
    /// The current Version.
    pub current: &'a Version,
}

/// Scheduling state of the background worker.
#[derive(Debug, Default)]
pub struct BackgroundScheduler {
    state: CompactionState,
    manual: Option<ManualCompaction>,
    /// Version that is due for compaction but that the worker cannot make
    /// progress on; not scheduled again until another Version is current.
    stalled_version: Option<u64>,
    stats: CompactionStats,
}

impl BackgroundScheduler {
    /// Create an idle scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    pub fn state(&self) -> CompactionState {
        self.state
    }

    /// Whether a step is scheduled or running.
    pub fn is_busy(&self) -> bool {
        self.state != CompactionState::Idle
    }

    /// Move from idle to scheduled if there is work.
    ///
    /// Returns true if a step was scheduled; the caller wakes the worker.
    pub fn maybe_schedule(&mut self, ctx: ScheduleContext<'_>) -> bool {
        if self.state != CompactionState::Idle || ctx.shutting_down || ctx.has_bg_error {
            return false;
        }

        let size_compaction = ctx.current.needs_compaction()
            && self.stalled_version != Some(ctx.current.id());

        if !(ctx.log_hand_off_pending || self.has_pending_manual() || size_compaction) {
            return false;
        }

        self.state = CompactionState::Scheduled;
        true
    }

    /// The worker picked up the scheduled step.
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, CompactionState::Scheduled);
        self.state = CompactionState::Running;
    }

    /// Drop a scheduled step that will not run.
    pub fn cancel(&mut self) {
        if self.state == CompactionState::Scheduled {
            self.state = CompactionState::Idle;
        }
    }

    /// The worker finished its step.
    pub fn finish(&mut self) {
        debug_assert_eq!(self.state, CompactionState::Running);
        self.state = CompactionState::Idle;
    }

    /// Register a manual compaction request.
    ///
    /// Returns false while another request is registered, served or not.
    pub fn request_manual(&mut self, manual: ManualCompaction) -> bool {
        if self.manual.is_some() {
            return false;
        }
        self.manual = Some(manual);
        true
    }

    /// The outstanding manual request, if any.
    pub fn pending_manual(&self) -> Option<&ManualCompaction> {
        self.manual.as_ref().filter(|m| !m.done)
    }

    /// Whether a manual request is waiting to be served.
    pub fn has_pending_manual(&self) -> bool {
        self.pending_manual().is_some()
    }

    /// Mark the manual request served.
    pub fn complete_manual(&mut self) {
        if let Some(manual) = &mut self.manual {
            manual.done = true;
        }
    }

    /// Unregister the manual request, served or not.
    pub fn clear_manual(&mut self) -> Option<ManualCompaction> {
        self.manual.take()
    }

    /// Stop scheduling size compactions for `version_id`.
    pub fn stall(&mut self, version_id: u64) {
        self.stalled_version = Some(version_id);
    }

    /// Id of the stalled Version, if any.
    pub fn stalled_version(&self) -> Option<u64> {
        self.stalled_version
    }

    /// Counters of finished steps.
    pub fn stats(&self) -> &CompactionStats {
        &self.stats
    }

    /// Mutable counters of finished steps.
    pub fn stats_mut(&mut self) -> &mut CompactionStats {
        &mut self.stats
    }
}

/// Per-level compaction statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LevelCompactionStats {
    /// Steps that merged tables through the MergeCompactor.
    pub merges: u64,
    /// Steps that moved a file without rewriting it.
    pub trivial_moves: u64,
    /// Bytes of input files.
    pub bytes_read: u64,
    /// Bytes of output files.
    pub bytes_written: u64,
    /// Time spent compacting (milliseconds).
    pub time_ms: u64,
}

/// Compaction statistics, indexed by source level.
#[derive(Debug, Default, Clone)]
pub struct CompactionStats {
    levels: [LevelCompactionStats; MAX_LEVELS],
    log_hand_offs: u64,
}

impl CompactionStats {
    /// Record a merge step.
    pub fn record_merge(&mut self, level: usize, bytes_read: u64, bytes_written: u64, time_ms: u64) {
        let stats = &mut self.levels[level];
        stats.merges += 1;
        stats.bytes_read += bytes_read;
        stats.bytes_written += bytes_written;
        stats.time_ms += time_ms;
    }

    /// Record a trivial move.
    pub fn record_trivial_move(&mut self, level: usize) {
        self.levels[level].trivial_moves += 1;
    }

    /// Record a WAL hand-off.
    pub fn record_log_hand_off(&mut self) {
        self.log_hand_offs += 1;
    }

    /// Get stats for a level.
    pub fn level(&self, level: usize) -> &LevelCompactionStats {
        &self.levels[level]
    }

    /// Number of WAL hand-offs recorded.
    pub fn log_hand_offs(&self) -> u64 {
        self.log_hand_offs
    }

    /// Total merge and trivial-move steps.
    pub fn total_compactions(&self) -> u64 {
        self.levels.iter().map(|s| s.merges + s.trivial_moves).sum()
    }
}

impl fmt::Display for CompactionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Level  Merges  Moves  Read(B)  Write(B)  Time(ms)")?;
        for (level, stats) in self.levels.iter().enumerate() {
            if stats.merges == 0 && stats.trivial_moves == 0 {
                continue;
            }
            writeln!(
                f,
                "{:>5}  {:>6}  {:>5}  {:>7}  {:>8}  {:>8}",
                level,
                stats.merges,
                stats.trivial_moves,
                stats.bytes_read,
                stats.bytes_written,
                stats.time_ms
            )?;
        }
        write!(f, "log hand-offs: {}", self.log_hand_offs)
    }
}
