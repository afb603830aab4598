//! Configuration options for manifestdb.

use std::fmt;
use std::sync::Arc;

use crate::compaction::MergeCompactor;
use crate::util::comparator::{BytewiseComparator, Comparator};

/// Number of levels in the LSM tree.
pub const MAX_LEVELS: usize = 7;

/// Default L0 file count that makes a compaction due.
pub const DEFAULT_L0_COMPACTION_TRIGGER: usize = 4;

/// Default byte budget of level 1 (10MB).
pub const DEFAULT_L1_SIZE: u64 = 10 * 1024 * 1024;

/// Default level size multiplier.
pub const DEFAULT_LEVEL_MULTIPLIER: u64 = 10;

/// Default maximum file size (2MB). A MANIFEST at least this large is not reused.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// Durability policy for record-log writers (WAL and MANIFEST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Sync after every physical record (safest, slowest).
    #[default]
    Always,
    /// Sync after N bytes written.
    Bytes {
        /// Number of bytes before sync.
        bytes: usize,
    },
    /// Let OS decide when to sync (fastest, may lose recent writes on crash).
    None,
}

/// Database configuration options.
#[derive(Clone)]
pub struct Options {
    // === Storage ===
    /// Create database if it doesn't exist.
    pub create_if_missing: bool,

    /// Return error if database already exists.
    pub error_if_exists: bool,

    /// Fail open on WAL corruption instead of skipping the damaged records.
    pub paranoid_checks: bool,

    /// User key ordering. Its name is persisted in the MANIFEST.
    pub comparator: Arc<dyn Comparator>,

    // === Compaction ===
    /// Number of L0 files that makes a compaction due.
    pub l0_compaction_trigger: usize,

    /// Byte budget for level 1.
    pub max_bytes_for_level_base: u64,

    /// Budget multiplier for each level past 1.
    pub max_bytes_for_level_multiplier: u64,

    /// External table merge used when a compaction is not a trivial move.
    pub merge_compactor: Option<Arc<dyn MergeCompactor>>,

    // === Journal ===
    /// Largest file size considered for reuse when recovering the MANIFEST.
    pub max_file_size: u64,

    /// Keep appending to the recovered MANIFEST when it is small enough.
    pub reuse_manifest: bool,

    // === Durability ===
    /// Sync mode for WAL and MANIFEST writes.
    pub sync_mode: SyncMode,

    // === Diagnostics ===
    /// Write diagnostic lines to the LOG file in the database directory.
    pub info_log: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            // Storage
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            comparator: Arc::new(BytewiseComparator::new()),

            // Compaction
            l0_compaction_trigger: DEFAULT_L0_COMPACTION_TRIGGER,
            max_bytes_for_level_base: DEFAULT_L1_SIZE,
            max_bytes_for_level_multiplier: DEFAULT_LEVEL_MULTIPLIER,
            merge_compactor: None,

            // Journal
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            reuse_manifest: true,

            // Durability
            sync_mode: SyncMode::default(),

            // Diagnostics
            info_log: true,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("comparator", &self.comparator.name())
            .field("l0_compaction_trigger", &self.l0_compaction_trigger)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field(
                "max_bytes_for_level_multiplier",
                &self.max_bytes_for_level_multiplier,
            )
            .field("merge_compactor", &self.merge_compactor.is_some())
            .field("max_file_size", &self.max_file_size)
            .field("reuse_manifest", &self.reuse_manifest)
            .field("sync_mode", &self.sync_mode)
            .field("info_log", &self.info_log)
            .finish()
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.l0_compaction_trigger == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "l0_compaction_trigger must be at least 1".into(),
            ));
        }

        if self.max_bytes_for_level_base == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "max_bytes_for_level_base must be positive".into(),
            ));
        }

        if self.max_bytes_for_level_multiplier < 2 {
            return Err(crate::Error::InvalidConfiguration(
                "max_bytes_for_level_multiplier must be at least 2".into(),
            ));
        }

        if self.max_file_size == 0 {
            return Err(crate::Error::InvalidConfiguration(
                "max_file_size must be positive".into(),
            ));
        }

        if let SyncMode::Bytes { bytes: 0 } = self.sync_mode {
            return Err(crate::Error::InvalidConfiguration(
                "SyncMode::Bytes needs a positive threshold".into(),
            ));
        }

        Ok(())
    }

    /// Byte budget for a level > 0.
    ///
    /// Level 0 is scored by file count, so its budget is never consulted.
    pub fn max_bytes_for_level(&self, level: usize) -> f64 {
        let mut result = self.max_bytes_for_level_base as f64;
        for _ in 1..level {
            result *= self.max_bytes_for_level_multiplier as f64;
        }
        result
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set create_if_missing.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.options.create_if_missing = value;
        self
    }

    /// Set error_if_exists.
    pub fn error_if_exists(mut self, value: bool) -> Self {
        self.options.error_if_exists = value;
        self
    }

    /// Set paranoid_checks.
    pub fn paranoid_checks(mut self, value: bool) -> Self {
        self.options.paranoid_checks = value;
        self
    }

    /// Set the user key comparator.
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.options.comparator = comparator;
        self
    }

    /// Set the L0 compaction trigger.
    pub fn l0_compaction_trigger(mut self, files: usize) -> Self {
        self.options.l0_compaction_trigger = files;
        self
    }

    /// Set the level 1 byte budget.
    pub fn max_bytes_for_level_base(mut self, bytes: u64) -> Self {
        self.options.max_bytes_for_level_base = bytes;
        self
    }

    /// Set the external table merge.
    pub fn merge_compactor(mut self, compactor: Arc<dyn MergeCompactor>) -> Self {
        self.options.merge_compactor = Some(compactor);
        self
    }

    /// Set reuse_manifest.
    pub fn reuse_manifest(mut self, value: bool) -> Self {
        self.options.reuse_manifest = value;
        self
    }

    /// Set max_file_size.
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.options.max_file_size = bytes;
        self
    }

    /// Set sync mode.
    pub fn sync_mode(mut self, mode: SyncMode) -> Self {
        self.options.sync_mode = mode;
        self
    }

    /// Set info_log.
    pub fn info_log(mut self, value: bool) -> Self {
        self.options.info_log = value;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}
