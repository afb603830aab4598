//! Diagnostic text log kept inside the database directory.
//!
//! Every line is also emitted as a `tracing` event by [`info_log!`], so
//! embedders that install a subscriber see the same messages.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::Result;
use crate::util::filename::{info_log_path, old_info_log_path};

/// Writer for the `LOG` file.
pub struct InfoLog {
    file: Option<Mutex<BufWriter<File>>>,
}

impl InfoLog {
    /// Rotate `LOG` to `LOG.old` and start a fresh `LOG`.
    pub fn open(db_path: &Path) -> Result<Self> {
        let path = info_log_path(db_path);
        if path.exists() {
            fs::rename(&path, old_info_log_path(db_path))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        Ok(Self {
            file: Some(Mutex::new(BufWriter::new(file))),
        })
    }

    /// An info log that only forwards to `tracing`.
    pub fn disabled() -> Self {
        Self { file: None }
    }

    /// Whether lines are written to disk.
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Append one timestamped line.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        let Some(file) = &self.file else {
            return;
        };

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let thread = std::thread::current();

        let mut writer = file.lock();
        // Diagnostics are best effort; a full disk surfaces through the WAL.
        let _ = writeln!(
            writer,
            "{}.{:06} {} {}",
            now.as_secs(),
            now.subsec_micros(),
            thread.name().unwrap_or("-"),
            args
        );
        let _ = writer.flush();
    }
}

impl fmt::Debug for InfoLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfoLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Emit a `tracing` event and append the same message to an [`InfoLog`].
///
/// ```ignore
/// info_log!(log, "Recovering log #{}", number);
/// info_log!(log, warn: "Delete {} failed: {}", name, err);
/// ```
macro_rules! info_log {
    ($log:expr, $level:ident: $($arg:tt)+) => {{
        tracing::$level!($($arg)+);
        $log.log(format_args!($($arg)+));
    }};
    ($log:expr, $($arg:tt)+) => {
        $crate::util::info_log::info_log!($log, info: $($arg)+)
    };
}

pub(crate) use info_log;
