//! The pipeline stages.
//!
//! Every stage receives a [`StageContext`] (read access to configuration and
//! the external systems, write access to the ledger) plus the unit set, and
//! only touches units that completed the preceding step. In simulation mode
//! a stage performs all of its reads and matching but logs a
//! `What if: would ...` entry in place of every mutating call.

pub mod cutover;
pub mod discovery;
pub mod post_migration;
pub mod replication;

use crate::backend::{StorageApi, VirtualizationApi};
use crate::cancel::CancellationToken;
use crate::config::RunConfig;
use crate::confirm::{Confirmer, UnitDecision};
use crate::error::Result;
use crate::ledger::SessionLedger;
use crate::models::{MigrationUnit, UnitStatus};

pub use cutover::{MountReport, StartReport};
pub use discovery::Discovery;
pub use replication::ReplicationReport;

/// Everything a stage may read, plus the ledger it reports to.
pub struct StageContext<'a> {
    pub config: &'a RunConfig,
    pub source: &'a dyn VirtualizationApi,
    pub target: &'a dyn VirtualizationApi,
    pub storage: &'a dyn StorageApi,
    pub confirmer: &'a dyn Confirmer,
    pub ledger: &'a SessionLedger,
    pub cancel: &'a CancellationToken,
}

impl StageContext<'_> {
    pub fn simulate(&self) -> bool {
        self.config.simulate
    }

    /// Ask a yes/no question.
    ///
    /// Prompts block on stdin, so a Ctrl-C that arrived while waiting is
    /// honoured as soon as the answer comes back.
    pub(crate) fn confirm(&self, prompt: &str) -> Result<bool> {
        let answer = self.confirmer.confirm(prompt);
        self.cancel.check()?;
        Ok(answer)
    }

    pub(crate) fn confirm_unit(&self, prompt: &str) -> Result<UnitDecision> {
        let decision = self.confirmer.confirm_unit(prompt);
        self.cancel.check()?;
        Ok(decision)
    }

    /// Log a mutating action that simulation mode skips.
    pub(crate) fn what_if(&self, action: impl AsRef<str>) {
        self.ledger.info(format!("What if: would {}", action.as_ref()));
    }
}

/// Indices of the units sitting exactly at `status`, in batch order.
pub(crate) fn units_at(units: &[MigrationUnit], status: UnitStatus) -> Vec<usize> {
    units
        .iter()
        .enumerate()
        .filter(|(_, u)| u.is_at(status))
        .map(|(i, _)| i)
        .collect()
}

/// Fail every unit still sitting at `status`.
pub fn fail_units_at(units: &mut [MigrationUnit], status: UnitStatus, reason: &str) -> usize {
    let mut failed = 0;
    for unit in units.iter_mut().filter(|u| u.is_at(status)) {
        unit.fail(reason);
        failed += 1;
    }
    failed
}

/// `1 VM` / `3 VMs`
pub(crate) fn vm_count(n: usize) -> String {
    if n == 1 {
        "1 VM".to_string()
    } else {
        format!("{} VMs", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_at_preserves_order() {
        let mut units = vec![
            MigrationUnit::new("a"),
            MigrationUnit::new("b"),
            MigrationUnit::new("c"),
        ];
        units[0].advance(UnitStatus::Verified);
        units[2].advance(UnitStatus::Verified);
        assert_eq!(units_at(&units, UnitStatus::Verified), vec![0, 2]);
    }

    #[test]
    fn test_fail_units_at() {
        let mut units = vec![MigrationUnit::new("a"), MigrationUnit::new("b")];
        units[0].advance(UnitStatus::Mounted);
        assert_eq!(fail_units_at(&mut units, UnitStatus::Mounted, "hosts unavailable"), 1);
        assert!(units[0].status.is_failed());
        assert!(!units[1].status.is_failed());
    }

    #[test]
    fn test_vm_count() {
        assert_eq!(vm_count(1), "1 VM");
        assert_eq!(vm_count(2), "2 VMs");
    }
}
