//! End-of-run summary and the optional JSON run report.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::{MigrationError, Result};
use crate::ledger::SessionLedger;
use crate::models::MigrationUnit;

/// Overall outcome of a run, derived from the error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    AllClear,
    Partial,
    TotalFailure,
}

impl Verdict {
    /// `AllClear` with no errors, `Partial` while errors stay below the unit
    /// count, `TotalFailure` otherwise.
    pub fn from_counts(error_count: usize, total_units: usize) -> Self {
        if error_count == 0 {
            Verdict::AllClear
        } else if error_count < total_units {
            Verdict::Partial
        } else {
            Verdict::TotalFailure
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Verdict::AllClear => "completed successfully",
            Verdict::Partial => "completed with errors",
            Verdict::TotalFailure => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total_units: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub log_path: Option<PathBuf>,
    pub verdict: Verdict,
}

impl RunSummary {
    /// Snapshot the ledger counters.
    pub fn from_ledger(ledger: &SessionLedger, total_units: usize) -> Self {
        let error_count = ledger.error_count();
        Self {
            total_units,
            error_count,
            warning_count: ledger.warning_count(),
            log_path: ledger.log_path().map(Path::to_path_buf),
            verdict: Verdict::from_counts(error_count, total_units),
        }
    }

    /// Write the summary block to the ledger.
    ///
    /// Only INFO and SUCCESS entries are written so the counters reported
    /// here stay the final ones.
    pub fn emit(&self, ledger: &SessionLedger) {
        ledger.info("==================== Migration summary ====================");
        ledger.info(format!("VMs in batch: {}", self.total_units));
        ledger.info(format!("Errors:       {}", self.error_count));
        ledger.info(format!("Warnings:     {}", self.warning_count));
        if let Some(path) = &self.log_path {
            ledger.info(format!("Log file:     {}", path.display()));
        }
        let line = format!("Migration {}", self.verdict);
        if self.verdict == Verdict::AllClear {
            ledger.success(line);
        } else {
            ledger.info(line);
        }
    }
}

/// Machine-readable record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub simulate: bool,
    pub target_cluster: String,
    pub target_svm: String,
    /// The run stopped early on a fatal error or cancellation.
    pub aborted: bool,
    pub fatal_error: Option<String>,
    pub summary: RunSummary,
    pub units: Vec<MigrationUnit>,
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Local>,
        config: &RunConfig,
        summary: RunSummary,
        units: &[MigrationUnit],
        fatal: Option<&MigrationError>,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Local::now(),
            simulate: config.simulate,
            target_cluster: config.target_cluster.clone(),
            target_svm: config.target_svm.clone(),
            aborted: fatal.is_some(),
            fatal_error: fatal.map(ToString::to_string),
            summary,
            units: units.to_vec(),
        }
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| MigrationError::io_with_path(e, parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| MigrationError::io_with_path(e, path))
    }
}
