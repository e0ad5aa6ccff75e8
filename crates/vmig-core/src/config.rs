//! Centralized configuration for the migration sequencer.
//!
//! Constant structs hold the fixed timings and heuristics; [`RunConfig`] is
//! the immutable per-run configuration assembled by the CLI.

use std::path::PathBuf;
use std::time::Duration;

use crate::poll::PollConfig;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const LOG_FILE_PREFIX: &'static str = "vm-migration";
    pub const DEFAULT_BACKUP_TAG: &'static str = "Backup-Daily";
    pub const DEFAULT_BACKUP_CATEGORY: &'static str = "Backup";
}

/// Timings and heuristics used by the stages.
pub struct SequencerConfig;

impl SequencerConfig {
    /// Substring matching is only attempted for names longer than this.
    pub const MIN_SUBSTRING_MATCH_LEN: usize = 3;

    // Replication polling
    pub const REPLICATION_POLL_INTERVAL: Duration = Duration::from_secs(10);
    pub const REPLICATION_POLL_MAX_INTERVAL: Duration = Duration::from_secs(60);
    pub const REPLICATION_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
    pub const QUIESCE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

    // Power-on handling
    pub const POWER_ON_SETTLE: Duration = Duration::from_secs(10);
    pub const QUESTION_SETTLE: Duration = Duration::from_secs(5);
    pub const POWER_STATE_POLL_INTERVAL: Duration = Duration::from_secs(5);
    pub const POWER_STATE_TIMEOUT: Duration = Duration::from_secs(120);

    /// Storage protocol used for the target datastore mount.
    pub const MOUNT_PROTOCOL: &'static str = "nfs";
}

/// Network-related configuration for the REST backends.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const MAX_RETRIES: u32 = 3;
    pub const USER_AGENT: &'static str = "vmig/0.1";
    /// vSphere VI/JSON release segment used for calls the Automation API lacks.
    pub const VI_JSON_RELEASE: &'static str = "8.0.1.0";
}

/// How the Start step asks for confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartConfirmation {
    /// One prompt per unit, supporting skip and abort.
    #[default]
    PerUnit,
    /// One prompt for the whole batch.
    Batch,
}

/// Immutable configuration for a single run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Cluster on the target vCenter whose hosts receive the mounts.
    pub target_cluster: String,
    /// SVM on the target ONTAP cluster that owns the destination volumes.
    pub target_svm: String,
    /// Substitute logged no-ops for every mutating call.
    pub simulate: bool,
    pub backup_tag: String,
    pub backup_category: String,
    pub log_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub start_confirmation: StartConfirmation,
    /// Offer to power off running source VMs before verification.
    pub shutdown_source: bool,
    pub replication_poll: PollConfig,
    pub power_poll: PollConfig,
    pub power_on_settle: Duration,
    pub question_settle: Duration,
}

impl RunConfig {
    pub fn new(
        target_cluster: impl Into<String>,
        target_svm: impl Into<String>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target_cluster: target_cluster.into(),
            target_svm: target_svm.into(),
            simulate: false,
            backup_tag: AppConfig::DEFAULT_BACKUP_TAG.to_string(),
            backup_category: AppConfig::DEFAULT_BACKUP_CATEGORY.to_string(),
            log_path: log_path.into(),
            report_path: None,
            start_confirmation: StartConfirmation::default(),
            shutdown_source: false,
            replication_poll: PollConfig::new()
                .with_interval(SequencerConfig::REPLICATION_POLL_INTERVAL)
                .with_max_interval(SequencerConfig::REPLICATION_POLL_MAX_INTERVAL)
                .with_timeout(SequencerConfig::REPLICATION_TIMEOUT),
            power_poll: PollConfig::new()
                .with_interval(SequencerConfig::POWER_STATE_POLL_INTERVAL)
                .with_timeout(SequencerConfig::POWER_STATE_TIMEOUT),
            power_on_settle: SequencerConfig::POWER_ON_SETTLE,
            question_settle: SequencerConfig::QUESTION_SETTLE,
        }
    }

    pub fn with_simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub fn with_backup_tag(mut self, category: impl Into<String>, tag: impl Into<String>) -> Self {
        self.backup_category = category.into();
        self.backup_tag = tag.into();
        self
    }

    pub fn with_report_path(mut self, path: Option<PathBuf>) -> Self {
        self.report_path = path;
        self
    }

    pub fn with_start_confirmation(mut self, mode: StartConfirmation) -> Self {
        self.start_confirmation = mode;
        self
    }

    pub fn with_shutdown_source(mut self, enable: bool) -> Self {
        self.shutdown_source = enable;
        self
    }

    /// Bound every replication wait by `timeout`.
    pub fn with_replication_timeout(mut self, timeout: Duration) -> Self {
        self.replication_poll = self.replication_poll.with_timeout(timeout);
        self
    }

    /// Replace every fixed wait and poll interval. Used by tests.
    pub fn with_timings(mut self, poll: PollConfig, settle: Duration) -> Self {
        self.replication_poll = poll.clone();
        self.power_poll = poll;
        self.power_on_settle = settle;
        self.question_settle = settle;
        self
    }

    /// Default log file name, `vm-migration-YYYYMMDD-HHMMSS.log`.
    pub fn default_log_path(now: chrono::DateTime<chrono::Local>) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}.log",
            AppConfig::LOG_FILE_PREFIX,
            now.format("%Y%m%d-%H%M%S")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_log_path_format() {
        let now = chrono::Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("valid local time");
        assert_eq!(
            RunConfig::default_log_path(now),
            PathBuf::from("vm-migration-20240309-140507.log")
        );
    }

    #[test]
    fn test_run_config_defaults() {
        let config = RunConfig::new("Cluster-B", "svm_dr", "run.log");
        assert!(!config.simulate);
        assert_eq!(config.backup_tag, "Backup-Daily");
        assert_eq!(config.backup_category, "Backup");
        assert_eq!(config.start_confirmation, StartConfirmation::PerUnit);
        assert_eq!(
            config.replication_poll.timeout,
            Some(SequencerConfig::REPLICATION_TIMEOUT)
        );
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(SequencerConfig::REPLICATION_TIMEOUT > SequencerConfig::REPLICATION_POLL_INTERVAL);
        assert!(NetworkConfig::REQUEST_TIMEOUT > Duration::ZERO);
    }
}
