//! vCenter client.
//!
//! Most calls use the Automation REST API (`/api/...`). The few operations
//! it does not expose (NFS datastore creation, host datastore listing, VM
//! questions) go through the VI/JSON API (`/sdk/vim25/...`), which accepts
//! the same session token.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::http::HttpClient;
use super::{Endpoint, VirtualizationApi};
use crate::config::NetworkConfig;
use crate::error::{MigrationError, Result};
use crate::models::{
    Datastore, HostInfo, NetworkAdapter, PowerState, QuestionChoice, VmInfo, VmQuestion,
};

const SESSION_HEADER: &str = "vmware-api-session-id";

#[derive(Debug, Deserialize)]
struct VmSummary {
    vm: String,
    name: String,
    power_state: String,
}

#[derive(Debug, Deserialize)]
struct VmDetail {
    #[serde(default)]
    disks: BTreeMap<String, DiskInfo>,
}

#[derive(Debug, Deserialize)]
struct DiskInfo {
    backing: Option<DiskBacking>,
}

#[derive(Debug, Deserialize)]
struct DiskBacking {
    vmdk_file: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PowerInfo {
    state: String,
}

#[derive(Debug, Deserialize)]
struct NicSummary {
    nic: String,
}

#[derive(Debug, Deserialize)]
struct NicDetail {
    label: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ClusterSummary {
    cluster: String,
}

#[derive(Debug, Deserialize)]
struct HostSummary {
    host: String,
    name: String,
    connection_state: String,
}

#[derive(Debug, Deserialize)]
struct FolderSummary {
    folder: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MoRef {
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostConfigManager {
    datastore_system: Option<MoRef>,
}

#[derive(Debug, Deserialize)]
struct VmRuntime {
    question: Option<QuestionInfo>,
}

#[derive(Debug, Deserialize)]
struct QuestionInfo {
    id: String,
    #[serde(default)]
    text: String,
    choice: Option<ChoiceOption>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChoiceOption {
    #[serde(default)]
    choice_info: Vec<ElementDescription>,
}

#[derive(Debug, Deserialize)]
struct ElementDescription {
    key: String,
    label: String,
}

fn parse_power_state(state: &str) -> PowerState {
    match state {
        "POWERED_ON" => PowerState::PoweredOn,
        "POWERED_OFF" => PowerState::PoweredOff,
        "SUSPENDED" => PowerState::Suspended,
        _ => PowerState::Unknown,
    }
}

/// `[ds_sql01] sql01/sql01.vmdk` → `ds_sql01`
fn datastore_of(vmdk_path: &str) -> Option<&str> {
    let rest = vmdk_path.strip_prefix('[')?;
    let (name, _) = rest.split_once(']')?;
    Some(name.trim())
}

/// Client for one vCenter.
pub struct VsphereClient {
    name: String,
    http: HttpClient,
}

impl VsphereClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        Ok(Self {
            name: format!("vCenter {}", endpoint.host),
            http: HttpClient::new(endpoint)?,
        })
    }

    fn vi_path(&self, rest: &str) -> String {
        format!(
            "/sdk/vim25/{}/{}",
            NetworkConfig::VI_JSON_RELEASE,
            rest.trim_start_matches('/')
        )
    }

    async fn vm_folder(&self) -> Result<String> {
        let folders: Vec<FolderSummary> = self
            .http
            .get_json("/api/vcenter/folder", &[("type", "VIRTUAL_MACHINE")])
            .await?;
        folders
            .iter()
            .find(|f| f.name == "vm")
            .or_else(|| folders.first())
            .map(|f| f.folder.clone())
            .ok_or_else(|| MigrationError::lookup("VM folder", &self.name))
    }
}

#[async_trait]
impl VirtualizationApi for VsphereClient {
    fn system_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let token: String = self
            .http
            .post_json("/api/session", &[], &json!({}))
            .await
            .map_err(|e| MigrationError::Connection {
                system: self.name.clone(),
                message: e.to_string(),
            })?;
        self.http.set_session(SESSION_HEADER, token);
        info!("Connected to {}", self.name);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let result = self
            .http
            .execute(Method::DELETE, "/api/session", &[], None)
            .await;
        self.http.clear_session();
        result
    }

    async fn find_vm(&self, name: &str) -> Result<Option<VmInfo>> {
        let found: Vec<VmSummary> = self
            .http
            .get_json("/api/vcenter/vm", &[("names", name)])
            .await?;
        let Some(summary) = found.into_iter().find(|vm| vm.name == name) else {
            return Ok(None);
        };

        let detail: VmDetail = self
            .http
            .get_json(&format!("/api/vcenter/vm/{}", summary.vm), &[])
            .await?;
        let mut datastores: Vec<String> = Vec::new();
        for disk in detail.disks.values() {
            let file = disk.backing.as_ref().and_then(|b| b.vmdk_file.as_deref());
            if let Some(ds) = file.and_then(datastore_of) {
                if !datastores.iter().any(|d| d == ds) {
                    datastores.push(ds.to_string());
                }
            }
        }

        Ok(Some(VmInfo {
            id: summary.vm,
            name: summary.name,
            power_state: parse_power_state(&summary.power_state),
            datastores,
        }))
    }

    async fn power_state(&self, vm_id: &str) -> Result<PowerState> {
        let power: PowerInfo = self
            .http
            .get_json(&format!("/api/vcenter/vm/{}/power", vm_id), &[])
            .await?;
        Ok(parse_power_state(&power.state))
    }

    async fn power_on(&self, vm_id: &str) -> Result<()> {
        self.http
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/power", vm_id),
                &[("action", "start")],
                None,
            )
            .await
    }

    async fn power_off(&self, vm_id: &str) -> Result<()> {
        self.http
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}/power", vm_id),
                &[("action", "stop")],
                None,
            )
            .await
    }

    async fn list_adapters(&self, vm_id: &str) -> Result<Vec<NetworkAdapter>> {
        let base = format!("/api/vcenter/vm/{}/hardware/ethernet", vm_id);
        let nics: Vec<NicSummary> = self.http.get_json(&base, &[]).await?;

        let mut adapters = Vec::with_capacity(nics.len());
        for nic in nics {
            let detail: NicDetail = self
                .http
                .get_json(&format!("{}/{}", base, nic.nic), &[])
                .await?;
            adapters.push(NetworkAdapter {
                id: nic.nic,
                label: detail.label,
                connected: detail.state == "CONNECTED",
            });
        }
        Ok(adapters)
    }

    async fn disconnect_adapter(&self, vm_id: &str, adapter_id: &str) -> Result<()> {
        let path = format!("/api/vcenter/vm/{}/hardware/ethernet/{}", vm_id, adapter_id);
        self.http
            .execute(
                Method::PATCH,
                &path,
                &[],
                Some(&json!({ "start_connected": false })),
            )
            .await?;

        if self.power_state(vm_id).await? == PowerState::PoweredOn {
            self.http
                .execute(Method::POST, &path, &[("action", "disconnect")], None)
                .await?;
        }
        Ok(())
    }

    async fn list_cluster_hosts(&self, cluster: &str) -> Result<Vec<HostInfo>> {
        let clusters: Vec<ClusterSummary> = self
            .http
            .get_json("/api/vcenter/cluster", &[("names", cluster)])
            .await?;
        let cluster_id = clusters
            .into_iter()
            .next()
            .map(|c| c.cluster)
            .ok_or_else(|| MigrationError::lookup("cluster", cluster))?;

        let hosts: Vec<HostSummary> = self
            .http
            .get_json("/api/vcenter/host", &[("clusters", cluster_id.as_str())])
            .await?;
        Ok(hosts
            .into_iter()
            .map(|h| HostInfo {
                connected: h.connection_state == "CONNECTED",
                id: h.host,
                name: h.name,
            })
            .collect())
    }

    async fn list_host_datastores(&self, host_id: &str) -> Result<Vec<Datastore>> {
        let refs: Vec<MoRef> = self
            .http
            .get_json(&self.vi_path(&format!("HostSystem/{}/datastore", host_id)), &[])
            .await?;

        let mut datastores = Vec::with_capacity(refs.len());
        for moref in refs {
            let name: String = self
                .http
                .get_json(&self.vi_path(&format!("Datastore/{}/name", moref.value)), &[])
                .await?;
            datastores.push(Datastore {
                id: moref.value,
                name,
            });
        }
        Ok(datastores)
    }

    async fn mount_nfs_datastore(
        &self,
        host_id: &str,
        name: &str,
        remote_host: &str,
        remote_path: &str,
    ) -> Result<()> {
        let config: HostConfigManager = self
            .http
            .get_json(&self.vi_path(&format!("HostSystem/{}/configManager", host_id)), &[])
            .await?;
        let ds_system = config
            .datastore_system
            .ok_or_else(|| MigrationError::lookup("datastore system", host_id))?;

        let spec = json!({
            "spec": {
                "_typeName": "HostNasVolumeSpec",
                "remoteHost": remote_host,
                "remotePath": remote_path,
                "localPath": name,
                "accessMode": "readWrite",
                "type": "NFS"
            }
        });
        let path = self.vi_path(&format!(
            "HostDatastoreSystem/{}/CreateNasDatastore",
            ds_system.value
        ));
        let _: Value = self.http.post_json(&path, &[], &spec).await?;
        Ok(())
    }

    async fn register_vm(&self, name: &str, vmx_path: &str, host_id: &str) -> Result<String> {
        let folder = self.vm_folder().await?;
        let body = json!({
            "name": name,
            "datastore_path": vmx_path,
            "placement": {
                "host": host_id,
                "folder": folder
            }
        });
        self.http
            .post_json("/api/vcenter/vm", &[("action", "register")], &body)
            .await
    }

    async fn unregister_vm(&self, vm_id: &str) -> Result<()> {
        self.http
            .execute(
                Method::POST,
                &format!("/api/vcenter/vm/{}", vm_id),
                &[("action", "unregister")],
                None,
            )
            .await
    }

    async fn pending_question(&self, vm_id: &str) -> Result<Option<VmQuestion>> {
        let runtime: VmRuntime = self
            .http
            .get_json(&self.vi_path(&format!("VirtualMachine/{}/runtime", vm_id)), &[])
            .await?;

        Ok(runtime.question.map(|q| VmQuestion {
            id: q.id,
            text: q.text,
            choices: q
                .choice
                .map(|c| c.choice_info)
                .unwrap_or_default()
                .into_iter()
                .map(|c| QuestionChoice {
                    key: c.key,
                    label: c.label,
                })
                .collect(),
        }))
    }

    async fn answer_question(&self, vm_id: &str, question_id: &str, choice: &str) -> Result<()> {
        let body = json!({ "questionId": question_id, "answerChoice": choice });
        self.http
            .execute(
                Method::POST,
                &self.vi_path(&format!("VirtualMachine/{}/AnswerVM", vm_id)),
                &[],
                Some(&body),
            )
            .await
    }

    async fn ensure_category(&self, name: &str) -> Result<String> {
        let ids: Vec<String> = self.http.get_json("/api/cis/tagging/category", &[]).await?;
        for id in ids {
            let category: NamedObject = self
                .http
                .get_json(&format!("/api/cis/tagging/category/{}", id), &[])
                .await?;
            if category.name == name {
                debug!("Tag category {} already exists ({})", name, id);
                return Ok(id);
            }
        }

        let body = json!({
            "name": name,
            "description": "Backup policy assignment",
            "cardinality": "MULTIPLE",
            "associable_types": ["VirtualMachine"]
        });
        self.http
            .post_json("/api/cis/tagging/category", &[], &body)
            .await
    }

    async fn ensure_tag(&self, category_id: &str, name: &str) -> Result<String> {
        let ids: Vec<String> = self
            .http
            .post_json(
                "/api/cis/tagging/tag",
                &[("action", "list-tags-for-category")],
                &json!({ "category_id": category_id }),
            )
            .await?;
        for id in ids {
            let tag: NamedObject = self
                .http
                .get_json(&format!("/api/cis/tagging/tag/{}", id), &[])
                .await?;
            if tag.name == name {
                debug!("Tag {} already exists ({})", name, id);
                return Ok(id);
            }
        }

        let body = json!({
            "name": name,
            "category_id": category_id,
            "description": "Applied after migration"
        });
        self.http.post_json("/api/cis/tagging/tag", &[], &body).await
    }

    async fn attach_tag(&self, tag_id: &str, vm_id: &str) -> Result<()> {
        let body = json!({ "object_id": { "id": vm_id, "type": "VirtualMachine" } });
        let result = self
            .http
            .execute(
                Method::POST,
                &format!("/api/cis/tagging/tag-association/{}", tag_id),
                &[("action", "attach")],
                Some(&body),
            )
            .await;
        if let Err(ref e) = result {
            warn!("Tag attach failed for {}: {}", vm_id, e);
        }
        result
    }
}
