//! ONTAP REST API client.
//!
//! Uses basic authentication on every request; there is no session to open
//! or close, so `connect` only verifies reachability and credentials.
//! Relationship mutations are accepted asynchronously by ONTAP (HTTP 202)
//! and the caller polls the relationship state to observe completion.

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::http::HttpClient;
use super::{Endpoint, StorageApi};
use crate::error::{MigrationError, Result};
use crate::models::{NetworkInterface, ReplicationRelationship, Volume};

const RELATIONSHIP_FIELDS: &str = "uuid,source.path,destination.path,state,transfer.state";

/// Paged collection response.
#[derive(Debug, Deserialize)]
struct Records<T> {
    #[serde(default = "Vec::new")]
    records: Vec<T>,
    #[serde(rename = "_links", default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<Href>,
}

#[derive(Debug, Deserialize)]
struct Href {
    href: String,
}

#[derive(Debug, Deserialize)]
struct ClusterInfo {
    name: String,
    version: Option<ClusterVersion>,
}

#[derive(Debug, Deserialize)]
struct ClusterVersion {
    full: String,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct VolumeRecord {
    uuid: String,
    name: String,
    svm: Option<NamedRef>,
    nas: Option<NasInfo>,
}

#[derive(Debug, Deserialize)]
struct NasInfo {
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InterfaceRecord {
    name: String,
    ip: Option<IpInfo>,
    #[serde(default)]
    services: Vec<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpInfo {
    address: String,
}

#[derive(Debug, Deserialize)]
struct RelationshipRecord {
    uuid: String,
    source: PathRef,
    destination: PathRef,
    state: Option<String>,
    transfer: Option<TransferInfo>,
}

#[derive(Debug, Deserialize)]
struct PathRef {
    path: String,
}

#[derive(Debug, Deserialize)]
struct TransferInfo {
    state: Option<String>,
}

impl From<RelationshipRecord> for ReplicationRelationship {
    fn from(record: RelationshipRecord) -> Self {
        ReplicationRelationship {
            uuid: record.uuid,
            source_path: record.source.path,
            destination_path: record.destination.path,
            state: record.state.unwrap_or_else(|| "unknown".to_string()),
            transfer_state: record.transfer.and_then(|t| t.state),
        }
    }
}

/// Translate ONTAP interface service policies into a role and protocol list.
fn interface_from_record(record: InterfaceRecord) -> NetworkInterface {
    let role = if record.services.iter().any(|s| s.starts_with("data_")) {
        "data"
    } else if record.services.iter().any(|s| s.starts_with("intercluster")) {
        "intercluster"
    } else {
        "management"
    };
    let protocols = record
        .services
        .iter()
        .filter_map(|s| s.strip_prefix("data_"))
        .filter(|s| *s != "core")
        .map(String::from)
        .collect();

    NetworkInterface {
        name: record.name,
        address: record.ip.map(|ip| ip.address).unwrap_or_default(),
        role: role.to_string(),
        protocols,
        up: record.state.as_deref() == Some("up"),
    }
}

/// Client for one ONTAP cluster management LIF.
pub struct OntapClient {
    name: String,
    http: HttpClient,
}

impl OntapClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        Ok(Self {
            name: format!("ONTAP {}", endpoint.host),
            http: HttpClient::new(endpoint)?,
        })
    }

    /// Fetch every page of a collection.
    async fn list_records<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let mut page: Records<T> = self.http.get_json(path, query).await?;
        let mut all = std::mem::take(&mut page.records);

        while let Some(next) = page.links.and_then(|l| l.next) {
            debug!("Following ONTAP pagination link {}", next.href);
            page = self.http.get_json(&next.href, &[]).await?;
            all.append(&mut page.records);
        }
        Ok(all)
    }

    async fn patch_state(&self, relationship: &ReplicationRelationship, state: &str) -> Result<()> {
        let path = format!("/api/snapmirror/relationships/{}", relationship.uuid);
        self.http
            .execute(Method::PATCH, &path, &[], Some(&json!({ "state": state })))
            .await
    }
}

#[async_trait]
impl StorageApi for OntapClient {
    fn system_name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let cluster: ClusterInfo = self
            .http
            .get_json("/api/cluster", &[("fields", "name,version")])
            .await
            .map_err(|e| MigrationError::Connection {
                system: self.name.clone(),
                message: e.to_string(),
            })?;
        info!(
            "Connected to ONTAP cluster {} ({})",
            cluster.name,
            cluster.version.map(|v| v.full).unwrap_or_default()
        );
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("{}: nothing to tear down for basic-auth sessions", self.name);
        Ok(())
    }

    async fn list_volumes(&self, svm: &str) -> Result<Vec<Volume>> {
        let records: Vec<VolumeRecord> = self
            .list_records(
                "/api/storage/volumes",
                &[("svm.name", svm), ("fields", "uuid,name,svm.name,nas.path")],
            )
            .await?;

        Ok(records
            .into_iter()
            .map(|r| Volume {
                uuid: r.uuid,
                name: r.name,
                svm: r.svm.map(|s| s.name).unwrap_or_else(|| svm.to_string()),
                junction_path: r.nas.and_then(|n| n.path),
            })
            .collect())
    }

    async fn list_interfaces(&self, svm: &str) -> Result<Vec<NetworkInterface>> {
        let records: Vec<InterfaceRecord> = self
            .list_records(
                "/api/network/ip/interfaces",
                &[("svm.name", svm), ("fields", "name,ip.address,services,state")],
            )
            .await?;
        Ok(records.into_iter().map(interface_from_record).collect())
    }

    async fn list_relationships(&self) -> Result<Vec<ReplicationRelationship>> {
        let records: Vec<RelationshipRecord> = self
            .list_records(
                "/api/snapmirror/relationships",
                &[("fields", RELATIONSHIP_FIELDS)],
            )
            .await?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    async fn get_relationship(&self, uuid: &str) -> Result<ReplicationRelationship> {
        let path = format!("/api/snapmirror/relationships/{}", uuid);
        let record: RelationshipRecord = self
            .http
            .get_json(&path, &[("fields", RELATIONSHIP_FIELDS)])
            .await
            .map_err(|e| match e {
                MigrationError::Api { status: 404, .. } => {
                    MigrationError::lookup("SnapMirror relationship", uuid)
                }
                other => other,
            })?;
        Ok(record.into())
    }

    async fn update_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        let path = format!("/api/snapmirror/relationships/{}/transfers", relationship.uuid);
        self.http
            .execute(Method::POST, &path, &[], Some(&json!({})))
            .await
    }

    async fn quiesce_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        self.patch_state(relationship, "paused").await
    }

    async fn break_relationship(&self, relationship: &ReplicationRelationship) -> Result<()> {
        self.patch_state(relationship, "broken_off").await
    }
}
