//! Run orchestration.
//!
//! The [`Sequencer`] owns everything a run needs: configuration, the three
//! external systems, the confirmation provider, the ledger and the
//! cancellation token. It runs the nine steps in order, always tears the
//! external sessions down, and always finishes with a summary.

use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{StorageApi, VirtualizationApi};
use crate::cancel::CancellationToken;
use crate::config::RunConfig;
use crate::confirm::Confirmer;
use crate::error::{MigrationError, Result};
use crate::inventory::load_batch;
use crate::ledger::SessionLedger;
use crate::models::{MigrationUnit, UnitStatus};
use crate::stages::{self, cutover, discovery, post_migration, replication, StageContext};
use crate::summary::{RunReport, RunSummary, Verdict};

const TOTAL_STEPS: usize = 9;

/// Result of a run.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub summary: RunSummary,
    /// Final state of every unit, in batch order.
    pub units: Vec<MigrationUnit>,
    /// The error that stopped the run early, if any.
    pub fatal: Option<MigrationError>,
}

impl RunOutcome {
    /// Close a run that was refused before it started, e.g. on a bad batch.
    ///
    /// The error is logged and the usual summary (and report, when
    /// configured) is still produced.
    pub fn rejected(config: &RunConfig, ledger: &SessionLedger, error: MigrationError) -> Self {
        ledger.error(format!("Migration aborted: {}", error));
        conclude(config, ledger, Uuid::new_v4(), Local::now(), Vec::new(), Some(error))
    }

    /// Process exit code: 1 when the run stopped early or nothing succeeded.
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() || self.summary.verdict == Verdict::TotalFailure {
            1
        } else {
            0
        }
    }
}

/// Which external sessions were opened and must be closed.
#[derive(Debug, Default)]
struct Sessions {
    source: bool,
    target: bool,
    storage: bool,
}

pub struct Sequencer {
    config: RunConfig,
    source: Arc<dyn VirtualizationApi>,
    target: Arc<dyn VirtualizationApi>,
    storage: Arc<dyn StorageApi>,
    confirmer: Arc<dyn Confirmer>,
    ledger: SessionLedger,
    cancel: CancellationToken,
}

impl Sequencer {
    pub fn new(
        config: RunConfig,
        source: Arc<dyn VirtualizationApi>,
        target: Arc<dyn VirtualizationApi>,
        storage: Arc<dyn StorageApi>,
        confirmer: Arc<dyn Confirmer>,
        ledger: SessionLedger,
    ) -> Self {
        Self {
            config,
            source,
            target,
            storage,
            confirmer,
            ledger,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned token, e.g. one wired to Ctrl-C.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Load the batch file, then run it.
    ///
    /// A bad batch fails the run before any external system is contacted.
    pub async fn run_batch(&self, path: impl AsRef<Path>) -> RunOutcome {
        let path = path.as_ref();
        match load_batch(path) {
            Ok(units) => {
                self.ledger.info(format!(
                    "Loaded {} from {}",
                    stages::vm_count(units.len()),
                    path.display()
                ));
                self.run(units).await
            }
            Err(e) => RunOutcome::rejected(&self.config, &self.ledger, e),
        }
    }

    /// Run every step over `units`.
    pub async fn run(&self, mut units: Vec<MigrationUnit>) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Local::now();
        self.ledger.info(format!(
            "Migration run {} started for {} ({} mode)",
            run_id,
            stages::vm_count(units.len()),
            if self.config.simulate { "simulation" } else { "live" }
        ));
        if self.config.simulate {
            self.ledger
                .info("Simulation mode: no changes will be made to any system");
        }

        let mut sessions = Sessions::default();
        let fatal = self.drive(&mut units, &mut sessions).await.err();

        match &fatal {
            Some(MigrationError::Cancelled) => {
                self.ledger.warning("Migration cancelled; remaining steps skipped")
            }
            Some(e) => self.ledger.error(format!("Migration aborted: {}", e)),
            None => {}
        }

        self.teardown(&sessions).await;
        self.finish(run_id, started_at, units, fatal)
    }

    fn finish(
        &self,
        run_id: Uuid,
        started_at: chrono::DateTime<Local>,
        units: Vec<MigrationUnit>,
        fatal: Option<MigrationError>,
    ) -> RunOutcome {
        conclude(&self.config, &self.ledger, run_id, started_at, units, fatal)
    }

    fn step(&self, n: usize, name: &str) -> Result<()> {
        self.cancel.check()?;
        self.ledger
            .info(format!("===== Step {}/{}: {} =====", n, TOTAL_STEPS, name));
        Ok(())
    }

    /// Log a failed non-fatal step and fail the units waiting on it.
    fn step_failed(
        &self,
        name: &str,
        err: MigrationError,
        units: &mut [MigrationUnit],
        waiting_at: UnitStatus,
    ) -> Result<()> {
        if matches!(err, MigrationError::Cancelled) {
            return Err(err);
        }
        self.ledger.error(format!("{} step failed: {}", name, err));
        let failed = stages::fail_units_at(units, waiting_at, &format!("{} step failed", name));
        debug!("{} unit(s) failed by {} step", failed, name);
        Ok(())
    }

    async fn drive(&self, units: &mut [MigrationUnit], sessions: &mut Sessions) -> Result<()> {
        self.connect(sessions).await?;

        let ctx = StageContext {
            config: &self.config,
            source: &*self.source,
            target: &*self.target,
            storage: &*self.storage,
            confirmer: &*self.confirmer,
            ledger: &self.ledger,
            cancel: &self.cancel,
        };

        self.step(1, "Discovery")?;
        let found = discovery::discover(&ctx, units).await?;

        self.step(2, "Verify power state")?;
        discovery::verify(&ctx, units, &found).await?;

        self.step(3, "Replication")?;
        if let Err(e) = replication::replicate(&ctx, units, &found).await {
            self.step_failed("Replication", e, units, UnitStatus::Verified)?;
        }

        self.step(4, "Mount datastores")?;
        if let Err(e) = cutover::mount(&ctx, units, &found).await {
            self.step_failed("Mount", e, units, UnitStatus::Replicated)?;
        }

        self.step(5, "Register VMs")?;
        if let Err(e) = cutover::register(&ctx, units).await {
            self.step_failed("Register", e, units, UnitStatus::Mounted)?;
        }

        self.step(6, "Start VMs")?;
        if let Err(e) = cutover::start(&ctx, units).await {
            self.step_failed("Start", e, units, UnitStatus::Registered)?;
        }

        self.step(7, "Tag VMs")?;
        if let Err(e) = post_migration::tag(&ctx, units).await {
            if matches!(e, MigrationError::Cancelled) {
                return Err(e);
            }
            self.ledger.error(format!("Tag step failed: {}", e));
        }

        self.step(8, "Disconnect source networks")?;
        if let Err(e) = post_migration::disconnect(&ctx, units, &found).await {
            if matches!(e, MigrationError::Cancelled) {
                return Err(e);
            }
            self.ledger.error(format!("Disconnect step failed: {}", e));
        }

        self.step(9, "Deregister source VMs")?;
        if let Err(e) = post_migration::deregister(&ctx, units, &found).await {
            if matches!(e, MigrationError::Cancelled) {
                return Err(e);
            }
            self.ledger.error(format!("Deregister step failed: {}", e));
        }

        Ok(())
    }

    async fn connect(&self, sessions: &mut Sessions) -> Result<()> {
        let as_connection = |system: &str, e: MigrationError| match e {
            e @ MigrationError::Connection { .. } => e,
            other => MigrationError::Connection {
                system: system.to_string(),
                message: other.to_string(),
            },
        };

        let name = self.source.system_name();
        self.source.connect().await.map_err(|e| as_connection(name, e))?;
        sessions.source = true;
        self.ledger.info(format!("Connected to source {}", name));

        let name = self.target.system_name();
        self.target.connect().await.map_err(|e| as_connection(name, e))?;
        sessions.target = true;
        self.ledger.info(format!("Connected to target {}", name));

        let name = self.storage.system_name();
        self.storage.connect().await.map_err(|e| as_connection(name, e))?;
        sessions.storage = true;
        self.ledger.info(format!("Connected to target storage {}", name));
        Ok(())
    }

    /// Close every opened session; failures only warn.
    async fn teardown(&self, sessions: &Sessions) {
        if sessions.storage {
            if let Err(e) = self.storage.disconnect().await {
                self.ledger.warning(format!(
                    "Failed to disconnect from {}: {}",
                    self.storage.system_name(),
                    e
                ));
            }
        }
        for (open, system) in [
            (sessions.target, &self.target),
            (sessions.source, &self.source),
        ] {
            if !open {
                continue;
            }
            if let Err(e) = system.disconnect().await {
                self.ledger.warning(format!(
                    "Failed to disconnect from {}: {}",
                    system.system_name(),
                    e
                ));
            }
        }
        debug!("External sessions closed");
    }
}

/// Emit the summary, write the report and flush the log.
fn conclude(
    config: &RunConfig,
    ledger: &SessionLedger,
    run_id: Uuid,
    started_at: chrono::DateTime<Local>,
    units: Vec<MigrationUnit>,
    fatal: Option<MigrationError>,
) -> RunOutcome {
    let summary = RunSummary::from_ledger(ledger, units.len());
    summary.emit(ledger);

    if let Some(path) = &config.report_path {
        let report = RunReport::new(
            run_id,
            started_at,
            config,
            summary.clone(),
            &units,
            fatal.as_ref(),
        );
        match report.write(path) {
            Ok(()) => ledger.info(format!("Run report written to {}", path.display())),
            Err(e) => ledger.warning(format!("Could not write run report: {}", e)),
        }
    }
    ledger.flush();

    RunOutcome {
        run_id,
        summary,
        units,
        fatal,
    }
}
