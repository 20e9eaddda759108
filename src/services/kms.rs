//! KMS v1.0 API
//!
//! KMS uses action-style endpoints (`kms/create-key`, `kms/describe-key`,
//! ...) that all take a POST body.

use super::{bool_or_string, decode};
use crate::error::{Error, Result};
use crate::otc::ServiceClient;
use crate::tags::Tag;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const TAG_SCOPE: &str = "kms";

/// Key states as reported in `key_state`
pub const KEY_PENDING_CREATION: &str = "1";
pub const KEY_ENABLED: &str = "2";
pub const KEY_DISABLED: &str = "3";
pub const KEY_PENDING_DELETION: &str = "4";

/// Page size for `kms/list-keys`
const LIST_LIMIT: &str = "100";

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateKeyRequest {
    pub key_alias: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub key_description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub realm: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KeyInfo {
    pub key_id: String,
    pub domain_id: String,
    pub key_alias: String,
    pub realm: String,
    pub key_description: String,
    pub creation_date: String,
    pub scheduled_deletion_date: String,
    pub key_state: String,
    pub default_key_flag: String,
    pub key_type: String,
    pub expiration_time: String,
    pub origin: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct KeyInfoResponse {
    key_info: KeyInfo,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyPage {
    pub key_details: Vec<KeyInfo>,
    pub next_marker: String,
    #[serde(deserialize_with = "bool_or_string")]
    pub truncated: bool,
}

async fn action(client: &ServiceClient, name: &str, body: &Value) -> Result<Value> {
    client.post(&client.path_url(&["kms", name]), body).await
}

pub async fn create_key(client: &ServiceClient, request: &CreateKeyRequest) -> Result<KeyInfo> {
    let body = serde_json::to_value(request).map_err(|e| Error::decode("key request", e))?;
    let response: KeyInfoResponse = decode("create key response", action(client, "create-key", &body).await?)?;
    Ok(response.key_info)
}

pub async fn describe_key(client: &ServiceClient, key_id: &str) -> Result<KeyInfo> {
    let response: KeyInfoResponse = decode(
        "describe key response",
        action(client, "describe-key", &json!({ "key_id": key_id })).await?,
    )?;
    Ok(response.key_info)
}

/// Refresh function for waiters
pub async fn key_state(client: &ServiceClient, key_id: &str) -> Result<(KeyInfo, String)> {
    let key = describe_key(client, key_id).await?;
    let state = key.key_state.clone();
    Ok((key, state))
}

pub async fn enable_key(client: &ServiceClient, key_id: &str) -> Result<()> {
    action(client, "enable-key", &json!({ "key_id": key_id })).await?;
    Ok(())
}

pub async fn disable_key(client: &ServiceClient, key_id: &str) -> Result<()> {
    action(client, "disable-key", &json!({ "key_id": key_id })).await?;
    Ok(())
}

pub async fn update_alias(client: &ServiceClient, key_id: &str, alias: &str) -> Result<()> {
    action(client, "update-key-alias", &json!({ "key_id": key_id, "key_alias": alias })).await?;
    Ok(())
}

pub async fn update_description(client: &ServiceClient, key_id: &str, description: &str) -> Result<()> {
    let body = json!({ "key_id": key_id, "key_description": description });
    action(client, "update-key-description", &body).await?;
    Ok(())
}

pub async fn schedule_deletion(client: &ServiceClient, key_id: &str, pending_days: &str) -> Result<()> {
    let body = json!({ "key_id": key_id, "pending_days": pending_days });
    action(client, "schedule-key-deletion", &body).await?;
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
struct KeyTagsResponse {
    #[serde(default)]
    tags: Vec<Tag>,
}

/// Tags are not part of `describe-key`
pub async fn key_tags(client: &ServiceClient, key_id: &str) -> Result<Vec<Tag>> {
    let response: KeyTagsResponse = decode("key tags", client.get(&client.path_url(&["kms", key_id, "tags"])).await?)?;
    Ok(response.tags)
}

/// Fetch one page of keys
pub async fn list_keys(client: &ServiceClient, marker: Option<&str>) -> Result<KeyPage> {
    let mut body = json!({ "limit": LIST_LIMIT });
    if let Some(marker) = marker {
        body["marker"] = Value::String(marker.to_string());
    }
    decode("key list", action(client, "list-keys", &body).await?)
}

/// Fetch all keys (auto-paginate)
pub async fn list_all_keys(client: &ServiceClient) -> Result<Vec<KeyInfo>> {
    let mut all_keys = Vec::new();
    let mut marker: Option<String> = None;

    loop {
        let page = list_keys(client, marker.as_deref()).await?;
        all_keys.extend(page.key_details);

        if !page.truncated || page.next_marker.is_empty() {
            break;
        }
        marker = Some(page.next_marker);
    }

    Ok(all_keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_page_accepts_string_flag() {
        let page: KeyPage = decode(
            "page",
            json!({"key_details": [{"key_id": "k1", "key_state": "2"}], "next_marker": "1", "truncated": "true"}),
        )
        .unwrap();
        assert!(page.truncated);
        assert_eq!(page.key_details[0].key_state, KEY_ENABLED);

        let last: KeyPage = decode("page", json!({"truncated": false})).unwrap();
        assert!(!last.truncated);
    }
}
