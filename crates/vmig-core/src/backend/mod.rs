//! External system interfaces.
//!
//! The sequencer only talks to storage and virtualization systems through
//! these traits. [`ontap::OntapClient`] and [`vsphere::VsphereClient`] are
//! the REST implementations used by the CLI.

pub mod http;
pub mod ontap;
pub mod vsphere;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Datastore, HostInfo, NetworkAdapter, NetworkInterface, PowerState, ReplicationRelationship,
    VmInfo, VmQuestion, Volume,
};

/// Address and credentials of a management endpoint.
#[derive(Clone)]
pub struct Endpoint {
    /// Host name or address, optionally with a port.
    pub host: String,
    pub username: String,
    pub password: String,
    /// Accept self-signed certificates.
    pub accept_invalid_certs: bool,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            username: username.into(),
            password: password.into(),
            accept_invalid_certs: false,
        }
    }

    pub fn with_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// `https://<host>` unless the host already carries a scheme.
    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            self.host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.host.trim_end_matches('/'))
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("accept_invalid_certs", &self.accept_invalid_certs)
            .finish()
    }
}

/// Storage management operations (ONTAP).
#[async_trait]
pub trait StorageApi: Send + Sync {
    /// Display name used in log messages.
    fn system_name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn list_volumes(&self, svm: &str) -> Result<Vec<Volume>>;

    async fn list_interfaces(&self, svm: &str) -> Result<Vec<NetworkInterface>>;

    /// All SnapMirror relationships visible from this cluster.
    async fn list_relationships(&self) -> Result<Vec<ReplicationRelationship>>;

    async fn get_relationship(&self, uuid: &str) -> Result<ReplicationRelationship>;

    /// Trigger an incremental transfer.
    async fn update_relationship(&self, relationship: &ReplicationRelationship) -> Result<()>;

    /// Stop scheduled transfers.
    async fn quiesce_relationship(&self, relationship: &ReplicationRelationship) -> Result<()>;

    /// Make the destination volume writable.
    async fn break_relationship(&self, relationship: &ReplicationRelationship) -> Result<()>;
}

/// Virtualization management operations (vCenter).
#[async_trait]
pub trait VirtualizationApi: Send + Sync {
    /// Display name used in log messages.
    fn system_name(&self) -> &str;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Look a VM up by name. `Ok(None)` when it does not exist.
    async fn find_vm(&self, name: &str) -> Result<Option<VmInfo>>;

    async fn power_state(&self, vm_id: &str) -> Result<PowerState>;

    async fn power_on(&self, vm_id: &str) -> Result<()>;

    async fn power_off(&self, vm_id: &str) -> Result<()>;

    async fn list_adapters(&self, vm_id: &str) -> Result<Vec<NetworkAdapter>>;

    async fn disconnect_adapter(&self, vm_id: &str, adapter_id: &str) -> Result<()>;

    async fn list_cluster_hosts(&self, cluster: &str) -> Result<Vec<HostInfo>>;

    async fn list_host_datastores(&self, host_id: &str) -> Result<Vec<Datastore>>;

    async fn mount_nfs_datastore(
        &self,
        host_id: &str,
        name: &str,
        remote_host: &str,
        remote_path: &str,
    ) -> Result<()>;

    /// Register a VM from its VMX path; returns the new VM id.
    async fn register_vm(&self, name: &str, vmx_path: &str, host_id: &str) -> Result<String>;

    /// Remove from inventory, keeping the files.
    async fn unregister_vm(&self, vm_id: &str) -> Result<()>;

    async fn pending_question(&self, vm_id: &str) -> Result<Option<VmQuestion>>;

    async fn answer_question(&self, vm_id: &str, question_id: &str, choice: &str) -> Result<()>;

    /// Get-or-create a tag category; returns its id.
    async fn ensure_category(&self, name: &str) -> Result<String>;

    /// Get-or-create a tag inside `category_id`; returns its id.
    async fn ensure_tag(&self, category_id: &str, name: &str) -> Result<String>;

    async fn attach_tag(&self, tag_id: &str, vm_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(Endpoint::new("vc01.lab", "u", "p").base_url(), "https://vc01.lab");
        assert_eq!(
            Endpoint::new("http://127.0.0.1:8080/", "u", "p").base_url(),
            "http://127.0.0.1:8080"
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let endpoint = Endpoint::new("ontap01", "admin", "hunter2");
        let rendered = format!("{:?}", endpoint);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
