//! Read-only snapshots of resources discovered on the source and target systems.

use serde::{Deserialize, Serialize};

/// Power state of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    /// Anything the API reported that we do not recognise.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PowerState::PoweredOn => "PoweredOn",
            PowerState::PoweredOff => "PoweredOff",
            PowerState::Suspended => "Suspended",
            PowerState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// A VM as seen by a vCenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    pub id: String,
    pub name: String,
    pub power_state: PowerState,
    /// Names of the datastores holding the VM's files, primary first.
    pub datastores: Vec<String>,
}

/// A virtual network adapter attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAdapter {
    pub id: String,
    pub label: String,
    pub connected: bool,
}

/// An ESXi host in a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub id: String,
    pub name: String,
    pub connected: bool,
}

/// A datastore as mounted on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datastore {
    pub id: String,
    pub name: String,
}

/// A volume on an ONTAP SVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub uuid: String,
    pub name: String,
    pub svm: String,
    pub junction_path: Option<String>,
}

/// A logical network interface (LIF) on an ONTAP SVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub name: String,
    pub address: String,
    /// Role such as `data` or `intercluster`.
    pub role: String,
    /// Data protocols the interface serves, e.g. `nfs`, `cifs`.
    pub protocols: Vec<String>,
    pub up: bool,
}

impl NetworkInterface {
    pub fn is_data(&self) -> bool {
        self.role.eq_ignore_ascii_case("data")
    }

    pub fn serves_exact(&self, protocol: &str) -> bool {
        self.protocols.iter().any(|p| p == protocol)
    }

    /// Case-insensitive protocol check; also accepts service names such as
    /// `data_nfs`.
    pub fn serves(&self, protocol: &str) -> bool {
        let wanted = protocol.to_ascii_lowercase();
        self.protocols
            .iter()
            .any(|p| p.to_ascii_lowercase().contains(&wanted))
    }
}

/// A SnapMirror relationship between two volume paths (`svm:volume`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationRelationship {
    pub uuid: String,
    pub source_path: String,
    pub destination_path: String,
    /// Mirror state, e.g. `snapmirrored`, `paused`, `broken_off`.
    pub state: String,
    /// Current transfer state, e.g. `transferring`, `success`.
    pub transfer_state: Option<String>,
}

impl ReplicationRelationship {
    pub fn source_volume(&self) -> &str {
        volume_of(&self.source_path)
    }

    pub fn destination_volume(&self) -> &str {
        volume_of(&self.destination_path)
    }

    pub fn is_transferring(&self) -> bool {
        matches!(
            self.transfer_state.as_deref(),
            Some("transferring" | "queued" | "preparing" | "finalizing")
        )
    }

    pub fn is_quiesced(&self) -> bool {
        matches!(self.state.as_str(), "paused" | "quiesced")
    }

    pub fn is_broken_off(&self) -> bool {
        self.state == "broken_off"
    }
}

fn volume_of(path: &str) -> &str {
    path.rsplit_once(':').map(|(_, vol)| vol).unwrap_or(path)
}

/// A choice offered by a pending VM question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionChoice {
    pub key: String,
    pub label: String,
}

/// A question a VM is blocked on, e.g. "moved or copied?" after registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmQuestion {
    pub id: String,
    pub text: String,
    pub choices: Vec<QuestionChoice>,
}

impl VmQuestion {
    /// The "I moved it" answer, which keeps the VM's identity.
    pub fn moved_choice(&self) -> Option<&QuestionChoice> {
        self.choices
            .iter()
            .find(|c| c.label.to_ascii_lowercase().contains("moved"))
            .or_else(|| self.choices.iter().find(|c| c.key == "1"))
    }
}
