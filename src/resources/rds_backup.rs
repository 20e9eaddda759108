//! `opentelekomcloud_rds_backup_v3`
//!
//! Manual backup of an RDS instance. Backups cannot be modified, so every
//! settable field forces replacement.

use crate::context::Context;
use crate::error::Result;
use crate::otc::Service;
use crate::provider::{Importer, Resource, ResourceData, ResourceDefinition};
use crate::schema::{Field, Schema, ValueType};
use crate::services::rds::{self, Backup, BackupDatabase, CreateBackupRequest};
use crate::waiter::{retry_while_transient, retry_with_wait, wait_for_state, DELETED};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const TYPE_NAME: &str = "opentelekomcloud_rds_backup_v3";

pub fn schema() -> Schema {
    Schema::resource(vec![
        Field::string("instance_id").required().force_new(),
        Field::string("name").required().force_new(),
        Field::string("description").optional().force_new(),
        Field::set("databases", ValueType::String).optional().force_new(),
        Field::string("status").computed(),
        Field::string("begin_time").computed(),
        Field::string("end_time").computed(),
        Field::float("size").computed(),
        Field::string("type").computed(),
    ])
}

pub fn definition() -> ResourceDefinition {
    ResourceDefinition::new(TYPE_NAME, schema(), RdsBackup)
        .importer(Importer::Compound(&["instance_id", "id"]))
        .retry_codes(rds::RETRY_CODES)
}

#[derive(Debug, Deserialize)]
struct BackupConfig {
    instance_id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    databases: Vec<String>,
}

impl From<BackupConfig> for CreateBackupRequest {
    fn from(config: BackupConfig) -> Self {
        Self {
            instance_id: config.instance_id,
            name: config.name,
            description: config.description,
            databases: config
                .databases
                .into_iter()
                .map(|name| BackupDatabase { name })
                .collect(),
        }
    }
}

pub struct RdsBackup;

fn apply_backup(d: &mut ResourceData, backup: Backup) -> Result<()> {
    d.set("instance_id", &backup.instance_id)?;
    d.set("name", &backup.name)?;
    d.set("description", Some(backup.description).filter(|s| !s.is_empty()))?;
    let databases: Vec<&str> = backup.databases.iter().map(|db| db.name.as_str()).collect();
    if !databases.is_empty() {
        d.set_json("databases", &json!(databases))?;
    }
    d.set("status", &backup.status)?;
    d.set("begin_time", &backup.begin_time)?;
    d.set("end_time", &backup.end_time)?;
    d.set("size", backup.size)?;
    d.set("type", &backup.kind)?;
    Ok(())
}

#[async_trait]
impl Resource for RdsBackup {
    async fn create(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let config: BackupConfig = d.decode()?;
        let instance_id = config.instance_id.clone();
        let request = CreateBackupRequest::from(config);

        // The instance refuses backups while another operation runs on it
        let instance_ready = ctx.state_wait(
            format!("rds instance {}", instance_id),
            rds::PENDING_STATES,
            &[rds::STATUS_ACTIVE],
        );
        let backup = retry_with_wait(
            ctx,
            &ctx.retry(),
            || rds::create_backup(&client, &request),
            &instance_ready,
            || rds::instance_state(&client, &instance_id),
        )
        .await?;

        let id = backup.id;
        d.set_id(&id);
        tracing::info!("RDS backup {} of instance {} created", id, instance_id);

        let wait = ctx.state_wait(
            format!("rds backup {}", id),
            &[rds::BACKUP_BUILDING],
            &[rds::BACKUP_COMPLETED],
        );
        wait_for_state(ctx, &wait, || rds::backup_state(&client, &instance_id, &id)).await?;

        self.read(ctx, d).await
    }

    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let instance_id = d.get_string("instance_id");
        match rds::get_backup(&client, &instance_id, d.id()).await {
            Ok(backup) => apply_backup(d, backup),
            Err(err) => d.check_deleted(err, "rds backup"),
        }
    }

    async fn delete(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let id = d.id().to_string();
        let instance_id = d.get_string("instance_id");

        if let Err(err) = retry_while_transient(ctx, &ctx.retry(), || rds::delete_backup(&client, &id)).await {
            return d.check_deleted(err, "rds backup");
        }

        let gone = ctx.state_wait(
            format!("rds backup {}", id),
            &[rds::BACKUP_COMPLETED, rds::BACKUP_DELETING],
            &[DELETED],
        );
        wait_for_state(ctx, &gone, || rds::backup_state(&client, &instance_id, &id)).await?;
        d.set_id("");
        Ok(())
    }
}
