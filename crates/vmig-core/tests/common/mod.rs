//! In-memory storage and virtualization systems for driving the stages.
//!
//! Every mutating call is recorded so tests can assert what a run did (or,
//! in simulation, that it did nothing).

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vmig_core::models::{
    Datastore, HostInfo, NetworkAdapter, NetworkInterface, PowerState, QuestionChoice,
    ReplicationRelationship, VmInfo, VmQuestion, Volume,
};
use vmig_core::{
    MigrationError, PollConfig, Result, RunConfig, SessionLedger, StorageApi, VirtualizationApi,
};

pub const CLUSTER: &str = "Cluster-B";
pub const SVM: &str = "svm_dr";

/// Run configuration with second-scale waits, for paused-time tests.
pub fn test_config(simulate: bool) -> RunConfig {
    let poll = PollConfig::new()
        .with_interval(Duration::from_secs(1))
        .with_timeout(Duration::from_secs(30));
    RunConfig::new(CLUSTER, SVM, "test.log")
        .with_simulate(simulate)
        .with_timings(poll, Duration::from_secs(1))
}

#[derive(Debug, Clone)]
struct FakeVm {
    id: String,
    name: String,
    power_state: PowerState,
    datastores: Vec<String>,
    adapters: Vec<NetworkAdapter>,
    question: Option<VmQuestion>,
}

#[derive(Default)]
struct VirtState {
    vms: Vec<FakeVm>,
    hosts: Vec<HostInfo>,
    host_datastores: HashMap<String, Vec<String>>,
    categories: Vec<(String, String)>,
    tags: Vec<(String, String, String)>,
    attachments: Vec<(String, String)>,
    mutations: Vec<String>,
    fail_mount_on: HashSet<String>,
    fail_register: HashSet<String>,
    stays_off: HashSet<String>,
    fail_disconnect: bool,
    next_id: usize,
}

/// A vCenter held in memory.
pub struct FakeVirtualization {
    name: String,
    cluster: String,
    state: Mutex<VirtState>,
}

impl FakeVirtualization {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cluster: CLUSTER.to_string(),
            state: Mutex::new(VirtState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VirtState> {
        self.state.lock().unwrap()
    }

    pub fn with_vm(self, name: &str, datastores: &[&str], power_state: PowerState) -> Self {
        {
            let mut state = self.lock();
            let id = format!("vm-{}", state.vms.len() + 100);
            state.vms.push(FakeVm {
                adapters: vec![NetworkAdapter {
                    id: "4000".to_string(),
                    label: "Network adapter 1".to_string(),
                    connected: true,
                }],
                id,
                name: name.to_string(),
                power_state,
                datastores: datastores.iter().map(|d| d.to_string()).collect(),
                question: None,
            });
        }
        self
    }

    pub fn with_host(self, id: &str, name: &str) -> Self {
        self.lock().hosts.push(HostInfo {
            id: id.to_string(),
            name: name.to_string(),
            connected: true,
        });
        self
    }

    pub fn with_mounted(self, host_id: &str, datastore: &str) -> Self {
        self.lock()
            .host_datastores
            .entry(host_id.to_string())
            .or_default()
            .push(datastore.to_string());
        self
    }

    pub fn failing_mount_of(self, datastore: &str) -> Self {
        self.lock().fail_mount_on.insert(datastore.to_string());
        self
    }

    pub fn failing_register_of(self, vm: &str) -> Self {
        self.lock().fail_register.insert(vm.to_string());
        self
    }

    /// Registered VMs with this name never report powered on.
    pub fn never_powering_on(self, vm: &str) -> Self {
        self.lock().stays_off.insert(vm.to_string());
        self
    }

    pub fn failing_disconnects(self) -> Self {
        self.lock().fail_disconnect = true;
        self
    }

    /// Every mutating call in order, e.g. `register:web01`.
    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn mutation_count(&self, prefix: &str) -> usize {
        self.lock()
            .mutations
            .iter()
            .filter(|m| m.starts_with(prefix))
            .count()
    }

    pub fn category_count(&self) -> usize {
        self.lock().categories.len()
    }

    pub fn tag_count(&self) -> usize {
        self.lock().tags.len()
    }

    pub fn attachments(&self) -> Vec<(String, String)> {
        self.lock().attachments.clone()
    }

    pub fn vm_id(&self, name: &str) -> Option<String> {
        self.lock()
            .vms
            .iter()
            .find(|vm| vm.name == name)
            .map(|vm| vm.id.clone())
    }

    pub fn power_state_of(&self, name: &str) -> Option<PowerState> {
        self.lock()
            .vms
            .iter()
            .find(|vm| vm.name == name)
            .map(|vm| vm.power_state)
    }

    fn with_vm_mut<T>(&self, vm_id: &str, f: impl FnOnce(&mut FakeVm) -> T) -> Result<T> {
        let mut state = self.lock();
        state
            .vms
            .iter_mut()
            .find(|vm| vm.id == vm_id)
            .map(f)
            .ok_or_else(|| MigrationError::lookup("VM", vm_id))
    }

    fn record(&self, mutation: String) {
        self.lock().mutations.push(mutation);
    }
}

#[async_trait]
impl VirtualizationApi for FakeVirtualization {
    fn system_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn find_vm(&self, name: &str) -> Result<Option<VmInfo>> {
        Ok(self.lock().vms.iter().find(|vm| vm.name == name).map(|vm| VmInfo {
            id: vm.id.clone(),
            name: vm.name.clone(),
            power_state: vm.power_state,
            datastores: vm.datastores.clone(),
        }))
    }

    async fn power_state(&self, vm_id: &str) -> Result<PowerState> {
        self.with_vm_mut(vm_id, |vm| vm.power_state)
    }

    async fn power_on(&self, vm_id: &str) -> Result<()> {
        self.record(format!("power_on:{}", vm_id));
        let stays_off = self.lock().stays_off.clone();
        self.with_vm_mut(vm_id, |vm| {
            if !stays_off.contains(&vm.name) {
                vm.power_state = PowerState::PoweredOn;
            }
        })
    }

    async fn power_off(&self, vm_id: &str) -> Result<()> {
        self.record(format!("power_off:{}", vm_id));
        self.with_vm_mut(vm_id, |vm| vm.power_state = PowerState::PoweredOff)
    }

    async fn list_adapters(&self, vm_id: &str) -> Result<Vec<NetworkAdapter>> {
        self.with_vm_mut(vm_id, |vm| vm.adapters.clone())
    }

    async fn disconnect_adapter(&self, vm_id: &str, adapter_id: &str) -> Result<()> {
        self.record(format!("disconnect_adapter:{}:{}", vm_id, adapter_id));
        if self.lock().fail_disconnect {
            return Err(MigrationError::operation("disconnect adapter", vm_id, "refused"));
        }
        self.with_vm_mut(vm_id, |vm| {
            for adapter in vm.adapters.iter_mut().filter(|a| a.id == adapter_id) {
                adapter.connected = false;
            }
        })
    }

    async fn list_cluster_hosts(&self, cluster: &str) -> Result<Vec<HostInfo>> {
        if cluster != self.cluster {
            return Err(MigrationError::lookup("cluster", cluster));
        }
        Ok(self.lock().hosts.clone())
    }

    async fn list_host_datastores(&self, host_id: &str) -> Result<Vec<Datastore>> {
        Ok(self
            .lock()
            .host_datastores
            .get(host_id)
            .map(|names| {
                names
                    .iter()
                    .map(|n| Datastore {
                        id: format!("datastore-{}", n),
                        name: n.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn mount_nfs_datastore(
        &self,
        host_id: &str,
        name: &str,
        remote_host: &str,
        remote_path: &str,
    ) -> Result<()> {
        self.record(format!("mount:{}:{}:{}:{}", host_id, name, remote_host, remote_path));
        let mut state = self.lock();
        if state.fail_mount_on.contains(name) {
            return Err(MigrationError::operation("mount", name, "NFS mount refused"));
        }
        state
            .host_datastores
            .entry(host_id.to_string())
            .or_default()
            .push(name.to_string());
        Ok(())
    }

    async fn register_vm(&self, name: &str, vmx_path: &str, host_id: &str) -> Result<String> {
        self.record(format!("register:{}:{}:{}", name, vmx_path, host_id));
        let mut state = self.lock();
        if state.fail_register.contains(name) {
            return Err(MigrationError::operation("register", name, "file not found"));
        }
        state.next_id += 1;
        let id = format!("vm-target-{}", state.next_id);
        state.vms.push(FakeVm {
            id: id.clone(),
            name: name.to_string(),
            power_state: PowerState::PoweredOff,
            datastores: Vec::new(),
            adapters: Vec::new(),
            question: Some(VmQuestion {
                id: format!("{}-q1", id),
                text: "This virtual machine might have been moved or copied.".to_string(),
                choices: vec![
                    QuestionChoice {
                        key: "0".to_string(),
                        label: "Cancel".to_string(),
                    },
                    QuestionChoice {
                        key: "1".to_string(),
                        label: "I Moved It".to_string(),
                    },
                    QuestionChoice {
                        key: "2".to_string(),
                        label: "I Copied It".to_string(),
                    },
                ],
            }),
        });
        Ok(id)
    }

    async fn unregister_vm(&self, vm_id: &str) -> Result<()> {
        self.record(format!("unregister:{}", vm_id));
        let mut state = self.lock();
        state.vms.retain(|vm| vm.id != vm_id);
        Ok(())
    }

    async fn pending_question(&self, vm_id: &str) -> Result<Option<VmQuestion>> {
        self.with_vm_mut(vm_id, |vm| vm.question.clone())
    }

    async fn answer_question(&self, vm_id: &str, question_id: &str, choice: &str) -> Result<()> {
        self.record(format!("answer:{}:{}:{}", vm_id, question_id, choice));
        self.with_vm_mut(vm_id, |vm| vm.question = None)
    }

    async fn ensure_category(&self, name: &str) -> Result<String> {
        let mut state = self.lock();
        if let Some((id, _)) = state.categories.iter().find(|(_, n)| n == name) {
            return Ok(id.clone());
        }
        let id = format!("urn:category:{}", state.categories.len() + 1);
        state.categories.push((id.clone(), name.to_string()));
        state.mutations.push(format!("create_category:{}", name));
        Ok(id)
    }

    async fn ensure_tag(&self, category_id: &str, name: &str) -> Result<String> {
        let mut state = self.lock();
        if let Some((id, _, _)) = state
            .tags
            .iter()
            .find(|(_, c, n)| c == category_id && n == name)
        {
            return Ok(id.clone());
        }
        let id = format!("urn:tag:{}", state.tags.len() + 1);
        state
            .tags
            .push((id.clone(), category_id.to_string(), name.to_string()));
        state.mutations.push(format!("create_tag:{}", name));
        Ok(id)
    }

    async fn attach_tag(&self, tag_id: &str, vm_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.mutations.push(format!("attach_tag:{}:{}", tag_id, vm_id));
        state
            .attachments
            .push((tag_id.to_string(), vm_id.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct StorageState {
    volumes: Vec<Volume>,
    interfaces: Vec<NetworkInterface>,
    relationships: Vec<ReplicationRelationship>,
    /// Remaining status reads before a transfer reports finished.
    transfer_reads: HashMap<String, u32>,
    stuck: HashSet<String>,
    failing_update: HashSet<String>,
    mutations: Vec<String>,
    relationship_listings: usize,
}

/// An ONTAP cluster held in memory.
pub struct FakeStorage {
    state: Mutex<StorageState>,
}

impl Default for FakeStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeStorage {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StorageState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StorageState> {
        self.state.lock().unwrap()
    }

    pub fn with_volume(self, name: &str) -> Self {
        self.lock().volumes.push(Volume {
            uuid: format!("uuid-{}", name),
            name: name.to_string(),
            svm: SVM.to_string(),
            junction_path: Some(format!("/{}", name)),
        });
        self
    }

    pub fn with_interface(self, name: &str, role: &str, protocols: &[&str], up: bool) -> Self {
        self.lock().interfaces.push(NetworkInterface {
            name: name.to_string(),
            address: format!("10.0.0.{}", 10 + name.len()),
            role: role.to_string(),
            protocols: protocols.iter().map(|p| p.to_string()).collect(),
            up,
        });
        self
    }

    /// A snapmirrored relationship `svm_prod:<source> -> svm_dr:<destination>`.
    pub fn with_relationship(self, source: &str, destination: &str) -> Self {
        {
            let mut state = self.lock();
            let uuid = format!("rel-{}", state.relationships.len() + 1);
            state.relationships.push(ReplicationRelationship {
                uuid,
                source_path: format!("svm_prod:{}", source),
                destination_path: format!("{}:{}", SVM, destination),
                state: "snapmirrored".to_string(),
                transfer_state: Some("idle".to_string()),
            });
        }
        self
    }

    /// Transfers on the relationship to `destination` never finish.
    pub fn stuck_transfer(self, destination: &str) -> Self {
        let uuid = self.uuid_of(destination);
        self.lock().stuck.insert(uuid);
        self
    }

    /// The relationship to `destination` was broken before the run.
    pub fn already_broken_off(self, destination: &str) -> Self {
        {
            let mut state = self.lock();
            if let Some(rel) = state
                .relationships
                .iter_mut()
                .find(|r| r.destination_volume() == destination)
            {
                rel.state = "broken_off".to_string();
            }
        }
        self
    }

    pub fn failing_update(self, destination: &str) -> Self {
        let uuid = self.uuid_of(destination);
        self.lock().failing_update.insert(uuid);
        self
    }

    pub fn uuid_of(&self, destination: &str) -> String {
        self.lock()
            .relationships
            .iter()
            .find(|r| r.destination_volume() == destination)
            .map(|r| r.uuid.clone())
            .unwrap_or_default()
    }

    pub fn state_of(&self, destination: &str) -> Option<String> {
        self.lock()
            .relationships
            .iter()
            .find(|r| r.destination_volume() == destination)
            .map(|r| r.state.clone())
    }

    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn relationship_listings(&self) -> usize {
        self.lock().relationship_listings
    }

    fn set_state(&self, uuid: &str, op: &str, new_state: &str) -> Result<()> {
        let mut state = self.lock();
        state.mutations.push(format!("{}:{}", op, uuid));
        let rel = state
            .relationships
            .iter_mut()
            .find(|r| r.uuid == uuid)
            .ok_or_else(|| MigrationError::lookup("SnapMirror relationship", uuid))?;
        rel.state = new_state.to_string();
        Ok(())
    }
}

#[async_trait]
impl StorageApi for FakeStorage {
    fn system_name(&self) -> &str {
        "ONTAP fake"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn list_volumes(&self, _svm: &str) -> Result<Vec<Volume>> {
        Ok(self.lock().volumes.clone())
    }

    async fn list_interfaces(&self, _svm: &str) -> Result<Vec<NetworkInterface>> {
        Ok(self.lock().interfaces.clone())
    }

    async fn list_relationships(&self) -> Result<Vec<ReplicationRelationship>> {
        let mut state = self.lock();
        state.relationship_listings += 1;
        Ok(state.relationships.clone())
    }

    async fn get_relationship(&self, uuid: &str) -> Result<ReplicationRelationship> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let finished = match state.transfer_reads.get_mut(uuid) {
            Some(0) => !state.stuck.contains(uuid),
            Some(left) => {
                *left -= 1;
                false
            }
            None => false,
        };
        let rel = state
            .relationships
            .iter_mut()
            .find(|r| r.uuid == uuid)
            .ok_or_else(|| MigrationError::lookup("SnapMirror relationship", uuid))?;
        if finished {
            rel.transfer_state = Some("success".to_string());
        }
        Ok(rel.clone())
    }

    async fn update_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        let mut state = self.lock();
        state.mutations.push(format!("update:{}", relationship.uuid));
        if state.failing_update.contains(&relationship.uuid) {
            return Err(MigrationError::Api {
                url: "/api/snapmirror/relationships".to_string(),
                status: 409,
                message: "transfer already in progress".to_string(),
            });
        }
        state.transfer_reads.insert(relationship.uuid.clone(), 1);
        if let Some(rel) = state
            .relationships
            .iter_mut()
            .find(|r| r.uuid == relationship.uuid)
        {
            rel.transfer_state = Some("transferring".to_string());
        }
        Ok(())
    }

    async fn quiesce_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        self.set_state(&relationship.uuid, "quiesce", "paused")
    }

    async fn break_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        self.set_state(&relationship.uuid, "break", "broken_off")
    }
}

/// Two powered-off VMs on their own datastores, both replicated to the
/// target SVM and ready to mount on a two-host cluster.
pub struct Site {
    pub source: Arc<FakeVirtualization>,
    pub target: Arc<FakeVirtualization>,
    pub storage: Arc<FakeStorage>,
}

pub fn source_two_vms() -> FakeVirtualization {
    FakeVirtualization::new("vCenter source")
        .with_vm("web01", &["ds_web"], PowerState::PoweredOff)
        .with_vm("db01", &["ds_db"], PowerState::PoweredOff)
}

pub fn target_cluster() -> FakeVirtualization {
    FakeVirtualization::new("vCenter target")
        .with_host("host-1", "esx01")
        .with_host("host-2", "esx02")
}

pub fn storage_two_volumes() -> FakeStorage {
    FakeStorage::new()
        .with_volume("ds_web")
        .with_volume("ds_db")
        .with_interface("lif_mgmt", "management", &[], true)
        .with_interface("lif_nfs", "data", &["nfs"], true)
        .with_relationship("ds_web", "ds_web")
        .with_relationship("ds_db", "ds_db")
}

impl Site {
    pub fn new(source: FakeVirtualization, target: FakeVirtualization, storage: FakeStorage) -> Self {
        Self {
            source: Arc::new(source),
            target: Arc::new(target),
            storage: Arc::new(storage),
        }
    }

    pub fn two_vms() -> Self {
        Self::new(source_two_vms(), target_cluster(), storage_two_volumes())
    }

    pub fn total_mutations(&self) -> usize {
        self.source.mutations().len()
            + self.target.mutations().len()
            + self.storage.mutations().len()
    }
}

pub fn ledger() -> SessionLedger {
    SessionLedger::in_memory()
}
