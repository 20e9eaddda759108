//! RDS v3 API
//!
//! Instances live under `instances`, backups under `backups`. Reads go
//! through the list endpoints filtered by id; an empty list means the
//! object is gone.

use super::decode;
use crate::error::{Error, Result};
use crate::otc::ServiceClient;
use crate::tags::Tag;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Error codes RDS returns while another operation holds the instance
pub const RETRY_CODES: &[&str] = &["DBS.200019", "DBS.201014", "DBS.200047", "DBS.201202"];

pub const TAG_SCOPE: &str = "instances";

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_BUILD: &str = "BUILD";
pub const STATUS_FAILED: &str = "FAILED";

/// Transitional instance states seen during modifications
pub const PENDING_STATES: &[&str] = &[
    "BUILD",
    "MODIFYING",
    "REBOOTING",
    "RESTORING",
    "BACKING UP",
    "MIGRATING",
];

pub const BACKUP_BUILDING: &str = "BUILDING";
pub const BACKUP_COMPLETED: &str = "COMPLETED";
pub const BACKUP_DELETING: &str = "DELETING";

// =============================================================================
// Instances
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Datastore {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Volume {
    #[serde(rename = "type")]
    pub kind: String,
    pub size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupStrategy {
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_days: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ha {
    pub mode: String,
    pub replication_mode: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub datastore: Datastore,
    pub flavor_ref: String,
    pub volume: Volume,
    pub region: String,
    pub availability_zone: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_strategy: Option<BackupStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ha: Option<Ha>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreatedInstance {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CreateInstanceResponse {
    instance: CreatedInstance,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub availability_zone: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: String,
    pub datastore: Datastore,
    pub flavor_ref: String,
    pub volume: Volume,
    pub region: String,
    pub vpc_id: String,
    pub subnet_id: String,
    pub security_group_id: String,
    pub port: Option<i64>,
    pub db_user_name: String,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
    pub created: String,
    pub backup_strategy: Option<BackupStrategy>,
    pub ha: Option<InstanceHa>,
    pub nodes: Vec<Node>,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InstanceHa {
    pub replication_mode: String,
}

impl Instance {
    /// Availability zones of all nodes, primary first, joined by `,`
    pub fn availability_zone(&self) -> String {
        let mut nodes: Vec<&Node> = self.nodes.iter().collect();
        nodes.sort_by_key(|n| n.role != "master");
        let mut zones: Vec<&str> = Vec::new();
        for node in nodes {
            if !node.availability_zone.is_empty() && !zones.contains(&node.availability_zone.as_str()) {
                zones.push(&node.availability_zone);
            }
        }
        zones.join(",")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListInstancesResponse {
    #[serde(default)]
    instances: Vec<Instance>,
}

pub async fn create_instance(client: &ServiceClient, request: &CreateInstanceRequest) -> Result<CreatedInstance> {
    let body = serde_json::to_value(request).map_err(|e| Error::decode("instance request", e))?;
    let response: CreateInstanceResponse = decode("create instance response", client.post(&client.url("instances"), &body).await?)?;
    if let Some(job) = &response.job_id {
        tracing::debug!("Instance {} create job {}", response.instance.id, job);
    }
    Ok(response.instance)
}

/// Fetch one instance; an empty result is [`Error::NotFound`]
pub async fn get_instance(client: &ServiceClient, id: &str) -> Result<Instance> {
    let url = client.url_with_query("instances", &[("id", id)])?;
    let response: ListInstancesResponse = decode("instance list", client.get(&url).await?)?;
    response
        .instances
        .into_iter()
        .find(|i| i.id == id)
        .ok_or_else(|| Error::not_found("rds instance", id))
}

/// Refresh function for waiters
pub async fn instance_state(client: &ServiceClient, id: &str) -> Result<(Instance, String)> {
    let instance = get_instance(client, id).await?;
    let status = instance.status.clone();
    Ok((instance, status))
}

pub async fn delete_instance(client: &ServiceClient, id: &str) -> Result<()> {
    client.delete(&client.path_url(&["instances", id])).await?;
    Ok(())
}

pub async fn rename_instance(client: &ServiceClient, id: &str, name: &str) -> Result<()> {
    client
        .put(&client.path_url(&["instances", id, "name"]), &json!({ "name": name }))
        .await?;
    Ok(())
}

pub async fn resize_flavor(client: &ServiceClient, id: &str, flavor: &str) -> Result<Value> {
    let body = json!({ "resize_flavor": { "spec_code": flavor } });
    client.post(&client.path_url(&["instances", id, "action"]), &body).await
}

pub async fn enlarge_volume(client: &ServiceClient, id: &str, size: i64) -> Result<Value> {
    let body = json!({ "enlarge_volume": { "size": size } });
    client.post(&client.path_url(&["instances", id, "action"]), &body).await
}

pub async fn update_backup_policy(client: &ServiceClient, id: &str, policy: &BackupStrategy) -> Result<()> {
    let body = json!({
        "backup_policy": {
            "start_time": policy.start_time,
            "keep_days": policy.keep_days.unwrap_or(7),
        }
    });
    client
        .put(&client.path_url(&["instances", id, "backups", "policy"]), &body)
        .await?;
    Ok(())
}

// =============================================================================
// Backups
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupDatabase {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateBackupRequest {
    pub instance_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<BackupDatabase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Backup {
    pub id: String,
    pub instance_id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub begin_time: String,
    pub end_time: String,
    pub size: f64,
    #[serde(rename = "type")]
    pub kind: String,
    pub databases: Vec<BackupDatabase>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CreateBackupResponse {
    backup: Backup,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ListBackupsResponse {
    #[serde(default)]
    backups: Vec<Backup>,
}

pub async fn create_backup(client: &ServiceClient, request: &CreateBackupRequest) -> Result<Backup> {
    let body = serde_json::to_value(request).map_err(|e| Error::decode("backup request", e))?;
    let response: CreateBackupResponse = decode("create backup response", client.post(&client.url("backups"), &body).await?)?;
    Ok(response.backup)
}

pub async fn get_backup(client: &ServiceClient, instance_id: &str, backup_id: &str) -> Result<Backup> {
    let url = client.url_with_query("backups", &[("instance_id", instance_id), ("backup_id", backup_id)])?;
    let response: ListBackupsResponse = decode("backup list", client.get(&url).await?)?;
    response
        .backups
        .into_iter()
        .find(|b| b.id == backup_id)
        .ok_or_else(|| Error::not_found("rds backup", backup_id))
}

pub async fn backup_state(client: &ServiceClient, instance_id: &str, backup_id: &str) -> Result<(Backup, String)> {
    let backup = get_backup(client, instance_id, backup_id).await?;
    let status = backup.status.clone();
    Ok((backup, status))
}

pub async fn delete_backup(client: &ServiceClient, backup_id: &str) -> Result<()> {
    client.delete(&client.path_url(&["backups", backup_id])).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_decodes_sparse_payload() {
        let instance: Instance = decode(
            "instance",
            json!({
                "id": "i-1",
                "status": "ACTIVE",
                "port": 3306,
                "volume": {"type": "COMMON", "size": 100},
                "nodes": [
                    {"id": "n2", "role": "slave", "availability_zone": "eu-de-02"},
                    {"id": "n1", "role": "master", "availability_zone": "eu-de-01"}
                ],
                "tags": [{"key": "env", "value": "prod"}]
            }),
        )
        .unwrap();
        assert_eq!(instance.volume.size, 100);
        assert_eq!(instance.availability_zone(), "eu-de-01,eu-de-02");
        assert_eq!(instance.tags.len(), 1);
    }

    #[test]
    fn test_create_request_omits_optional_blocks() {
        let request = CreateInstanceRequest {
            name: "db".into(),
            ..Default::default()
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("ha").is_none());
        assert!(body.get("port").is_none());
        assert_eq!(body["datastore"]["type"], "");
    }
}
