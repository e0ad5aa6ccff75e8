//! Migration units and their lifecycle status.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a migration unit.
///
/// Variants are declared in stage order; `Failed` sits outside the order and
/// is reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Pending,
    Discovered,
    Verified,
    Replicated,
    Mounted,
    Registered,
    Started,
    Tagged,
    Disconnected,
    Deregistered,
    Failed,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Discovered => "discovered",
            UnitStatus::Verified => "verified",
            UnitStatus::Replicated => "replicated",
            UnitStatus::Mounted => "mounted",
            UnitStatus::Registered => "registered",
            UnitStatus::Started => "started",
            UnitStatus::Tagged => "tagged",
            UnitStatus::Disconnected => "disconnected",
            UnitStatus::Deregistered => "deregistered",
            UnitStatus::Failed => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitStatus::Failed)
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One workload to move.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// VM name; unique within the batch.
    pub name: String,
    /// Datastore the VM lives on at the source, filled by discovery.
    pub source_datastore: Option<String>,
    /// Target volume backing the mounted datastore, filled by mount.
    pub target_volume: Option<String>,
    /// VM identifier on the target vCenter after registration.
    pub target_vm_id: Option<String>,
    pub status: UnitStatus,
    /// Status reached before the unit failed.
    pub last_good_status: UnitStatus,
    pub failure: Option<String>,
}

impl MigrationUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_datastore: None,
            target_volume: None,
            target_vm_id: None,
            status: UnitStatus::Pending,
            last_good_status: UnitStatus::Pending,
            failure: None,
        }
    }

    /// Move forward to `next`.
    ///
    /// Returns false (and leaves the unit unchanged) when the unit has failed
    /// or `next` would not move it forward.
    pub fn advance(&mut self, next: UnitStatus) -> bool {
        if self.status.is_failed() || next.is_failed() || next <= self.status {
            return false;
        }
        self.status = next;
        self.last_good_status = next;
        true
    }

    /// Mark the unit failed, keeping the first recorded reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.status.is_failed() {
            self.status = UnitStatus::Failed;
            self.failure = Some(reason.into());
        }
    }

    /// Whether the unit completed `status` (and has not failed since).
    pub fn reached(&self, status: UnitStatus) -> bool {
        !self.status.is_failed() && self.status >= status
    }

    /// Whether the unit is exactly at `status`, ready for the next step.
    pub fn is_at(&self, status: UnitStatus) -> bool {
        self.status == status
    }
}
