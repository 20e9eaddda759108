//! `opentelekomcloud_kms_key_v1`
//!
//! Customer master key. Keys are never removed immediately: deletion
//! schedules them for `pending_days` and a key pending deletion counts as
//! gone.

use super::update_tags;
use crate::context::Context;
use crate::error::Result;
use crate::otc::{Service, ServiceClient};
use crate::provider::{Importer, Resource, ResourceData, ResourceDefinition};
use crate::schema::validation::{numeric_string_between, string_len_between};
use crate::schema::{Field, Schema};
use crate::services::kms::{self, CreateKeyRequest, KeyInfo};
use crate::tags::{from_tag_list, sync_tags, Tags};
use crate::waiter::{retry_while_transient, wait_for_state, DELETED};
use async_trait::async_trait;
use serde::Deserialize;

pub const TYPE_NAME: &str = "opentelekomcloud_kms_key_v1";

pub const DEFAULT_PENDING_DAYS: &str = "7";

pub fn schema() -> Schema {
    Schema::resource(vec![
        Field::string("key_alias").required().validate(string_len_between(1, 255)),
        Field::string("key_description")
            .optional()
            .validate(string_len_between(0, 255)),
        Field::string("realm").optional().computed().force_new(),
        Field::string("pending_days")
            .optional()
            .default(DEFAULT_PENDING_DAYS)
            .validate(numeric_string_between(7, 1096))
            .description("Waiting period in days before a deleted key is destroyed"),
        Field::bool("is_enabled").optional().default(true),
        Field::map("tags").optional(),
        Field::string("key_id").computed(),
        Field::string("domain_id").computed(),
        Field::string("creation_date").computed(),
        Field::string("scheduled_deletion_date").computed(),
        Field::string("default_key_flag").computed(),
        Field::string("expiration_time").computed(),
        Field::string("origin").computed(),
        Field::string("key_state").computed(),
    ])
}

pub fn definition() -> ResourceDefinition {
    ResourceDefinition::new(TYPE_NAME, schema(), KmsKey).importer(Importer::Passthrough)
}

#[derive(Debug, Deserialize)]
struct KeyConfig {
    key_alias: String,
    #[serde(default)]
    key_description: String,
    #[serde(default)]
    realm: String,
    #[serde(default = "enabled")]
    is_enabled: bool,
    #[serde(default)]
    tags: Tags,
}

fn enabled() -> bool {
    true
}

pub struct KmsKey;

/// Copy the attributes shared by the resource and the data source
pub(crate) fn apply_key_info(d: &mut ResourceData, key: &KeyInfo) -> Result<()> {
    d.set("key_alias", &key.key_alias)?;
    d.set("key_description", &key.key_description)?;
    d.set("realm", &key.realm)?;
    d.set("key_id", &key.key_id)?;
    d.set("domain_id", &key.domain_id)?;
    d.set("creation_date", &key.creation_date)?;
    d.set("scheduled_deletion_date", &key.scheduled_deletion_date)?;
    d.set("default_key_flag", &key.default_key_flag)?;
    d.set("expiration_time", &key.expiration_time)?;
    d.set("origin", &key.origin)?;
    d.set("key_state", &key.key_state)?;
    Ok(())
}

async fn set_enabled(ctx: &Context, client: &ServiceClient, key_id: &str, enable: bool) -> Result<()> {
    if enable {
        tracing::info!("Enabling KMS key {}", key_id);
        retry_while_transient(ctx, &ctx.retry(), || kms::enable_key(client, key_id)).await
    } else {
        tracing::info!("Disabling KMS key {}", key_id);
        retry_while_transient(ctx, &ctx.retry(), || kms::disable_key(client, key_id)).await
    }
}

#[async_trait]
impl Resource for KmsKey {
    async fn create(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Kms).await?;
        let config: KeyConfig = d.decode()?;
        let request = CreateKeyRequest {
            key_alias: config.key_alias,
            key_description: config.key_description,
            realm: config.realm,
        };

        // Nothing to wait on before the key exists
        let key = retry_while_transient(ctx, &ctx.retry(), || kms::create_key(&client, &request)).await?;
        let id = key.key_id;
        d.set_id(&id);
        tracing::info!("KMS key {} created", id);

        let wait = ctx.state_wait(
            format!("kms key {}", id),
            &[kms::KEY_PENDING_CREATION],
            &[kms::KEY_ENABLED],
        );
        wait_for_state(ctx, &wait, || kms::key_state(&client, &id)).await?;

        if !config.is_enabled {
            set_enabled(ctx, &client, &id, false).await?;
        }

        sync_tags(ctx, &client, kms::TAG_SCOPE, &id, &Tags::new(), &config.tags).await?;

        self.read(ctx, d).await
    }

    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Kms).await?;
        let key = match kms::describe_key(&client, d.id()).await {
            Ok(key) => key,
            Err(err) => return d.check_deleted(err, "kms key"),
        };

        if key.key_state == kms::KEY_PENDING_DELETION {
            tracing::info!("KMS key {} is pending deletion, removing from state", d.id());
            d.set_id("");
            return Ok(());
        }

        apply_key_info(d, &key)?;
        d.set("is_enabled", key.key_state == kms::KEY_ENABLED)?;
        if d.get("pending_days").is_none() {
            d.set("pending_days", DEFAULT_PENDING_DAYS)?;
        }

        let tags = kms::key_tags(&client, d.id()).await?;
        d.set("tags", from_tag_list(tags))?;
        Ok(())
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Kms).await?;
        let id = d.id().to_string();

        if d.has_change("key_alias") {
            let alias = d.get_string("key_alias");
            retry_while_transient(ctx, &ctx.retry(), || kms::update_alias(&client, &id, &alias)).await?;
            d.partial("key_alias");
        }

        if d.has_change("key_description") {
            let description = d.get_string("key_description");
            retry_while_transient(ctx, &ctx.retry(), || kms::update_description(&client, &id, &description))
                .await?;
            d.partial("key_description");
        }

        if d.has_change("is_enabled") {
            let enable = d.get_bool("is_enabled").unwrap_or(true);
            set_enabled(ctx, &client, &id, enable).await?;
            d.partial("is_enabled");
        }

        if d.has_change("tags") {
            update_tags(ctx, &client, kms::TAG_SCOPE, d).await?;
            d.partial("tags");
        }

        // pending_days only matters at deletion
        d.partial("pending_days");

        self.read(ctx, d).await
    }

    async fn delete(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Kms).await?;
        let id = d.id().to_string();
        let pending_days = d.get_str("pending_days").unwrap_or(DEFAULT_PENDING_DAYS).to_string();

        let key = match kms::describe_key(&client, &id).await {
            Ok(key) => key,
            Err(err) => return d.check_deleted(err, "kms key"),
        };
        if key.key_state == kms::KEY_PENDING_DELETION {
            tracing::info!("KMS key {} is already pending deletion", id);
            d.set_id("");
            return Ok(());
        }

        let scheduled =
            retry_while_transient(ctx, &ctx.retry(), || kms::schedule_deletion(&client, &id, &pending_days)).await;
        if let Err(err) = scheduled {
            return d.check_deleted(err, "kms key");
        }
        tracing::info!("KMS key {} scheduled for deletion in {} days", id, pending_days);

        let wait = ctx.state_wait(
            format!("kms key {}", id),
            &[kms::KEY_ENABLED, kms::KEY_DISABLED],
            &[kms::KEY_PENDING_DELETION, DELETED],
        );
        wait_for_state(ctx, &wait, || kms::key_state(&client, &id)).await?;
        d.set_id("");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let schema = schema();
        assert!(schema.check().is_ok());
        let config = schema.decode_config(&json!({"key_alias": "k"})).unwrap();
        assert_eq!(config["pending_days"].as_str(), Some("7"));
        assert_eq!(config["is_enabled"].as_bool(), Some(true));
    }

    #[test]
    fn test_pending_days_range() {
        let err = schema()
            .decode_config(&json!({"key_alias": "k", "pending_days": "3"}))
            .unwrap_err();
        assert!(err.iter().any(|d| d.attribute.as_deref() == Some("pending_days")));
    }
}
