//! Session ledger: the single funnel every stage reports through.
//!
//! Each entry is appended to the durable log file as
//! `[<timestamp>] [<LEVEL>] <message>`, bumps the warning/error counters, and
//! is echoed through `tracing` at a matching level. The ledger lives for the
//! whole run and is never reset.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{MigrationError, Result};

/// Severity of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }
}

/// One line of the session log.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LedgerEntry {
    /// Render the entry the way it is written to the log file.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.as_str(),
            self.message
        )
    }
}

#[derive(Default)]
struct LedgerState {
    file: Option<File>,
    entries: Vec<LedgerEntry>,
    error_count: usize,
    warning_count: usize,
}

/// Process-wide counters and append-only log.
pub struct SessionLedger {
    log_path: Option<PathBuf>,
    state: Mutex<LedgerState>,
}

impl SessionLedger {
    /// Open (or create) the log file at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MigrationError::io_with_path(e, parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| MigrationError::io_with_path(e, path))?;

        Ok(Self {
            log_path: Some(path.to_path_buf()),
            state: Mutex::new(LedgerState {
                file: Some(file),
                ..Default::default()
            }),
        })
    }

    /// A ledger that keeps entries in memory only.
    pub fn in_memory() -> Self {
        Self {
            log_path: None,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one entry.
    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LedgerEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        };

        match level {
            LogLevel::Error => error!("{}", entry.message),
            LogLevel::Warning => warn!("{}", entry.message),
            LogLevel::Success => info!(outcome = "success", "{}", entry.message),
            LogLevel::Info => info!("{}", entry.message),
        }

        let mut state = self.lock();
        match level {
            LogLevel::Error => state.error_count += 1,
            LogLevel::Warning => state.warning_count += 1,
            _ => {}
        }
        if let Some(file) = state.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", entry.to_line()) {
                // The echo above already reached the console
                warn!("Failed to append to session log: {}", e);
            }
        }
        state.entries.push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(LogLevel::Success, message);
    }

    pub fn error_count(&self) -> usize {
        self.lock().error_count
    }

    pub fn warning_count(&self) -> usize {
        self.lock().warning_count
    }

    /// Snapshot of every entry recorded so far.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().entries.clone()
    }

    /// Number of entries whose message contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.message.contains(needle))
            .count()
    }

    /// Flush the log file.
    pub fn flush(&self) {
        if let Some(file) = self.lock().file.as_mut() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counters_track_levels() {
        let ledger = SessionLedger::in_memory();
        ledger.info("Connecting");
        ledger.warning("VM web01 is still running");
        ledger.error("Mount failed");
        ledger.error("Register failed");
        ledger.success("Done");

        assert_eq!(ledger.error_count(), 2);
        assert_eq!(ledger.warning_count(), 1);
        assert_eq!(ledger.entries().len(), 5);
        assert_eq!(ledger.count_matching("failed"), 2);
    }

    #[test]
    fn test_log_file_line_format() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("logs").join("run.log");

        let ledger = SessionLedger::open(&path).unwrap();
        ledger.info("Starting migration");
        ledger.success("Registered web01");
        ledger.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] [INFO] Starting migration"));
        assert!(lines[1].ends_with("] [SUCCESS] Registered web01"));
    }

    #[test]
    fn test_log_file_is_appended() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("run.log");
        std::fs::write(&path, "existing line\n").unwrap();

        let ledger = SessionLedger::open(&path).unwrap();
        ledger.warning("second");
        ledger.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("existing line\n"));
        assert!(content.contains("[WARNING] second"));
    }
}
