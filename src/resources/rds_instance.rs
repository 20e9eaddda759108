//! `opentelekomcloud_rds_instance_v3`
//!
//! Database instance managed through RDS v3. Creation is asynchronous
//! (`BUILD` → `ACTIVE`) and every modification puts the instance into a
//! transitional state during which further calls fail with one of
//! [`rds::RETRY_CODES`].

use super::{single, update_tags};
use crate::context::Context;
use crate::diff::ResourceDiff;
use crate::error::{Error, Result};
use crate::otc::{Service, ServiceClient};
use crate::provider::{Importer, Resource, ResourceData, ResourceDefinition, Timeouts};
use crate::schema::validation::{int_at_least, int_between, string_in_slice, time_window};
use crate::schema::{Field, Schema, Value, ValueType};
use crate::services::rds::{self, BackupStrategy, CreateInstanceRequest, Datastore, Ha, Instance, Volume};
use crate::tags::{from_tag_list, Tags};
use crate::waiter::{retry_while_transient, retry_with_wait, wait_for_state, DELETED};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const TYPE_NAME: &str = "opentelekomcloud_rds_instance_v3";

const DATASTORE_TYPES: &[&str] = &["MySQL", "PostgreSQL", "SQLServer"];
const MIN_VOLUME_SIZE: i64 = 40;
const MAX_KEEP_DAYS: i64 = 732;

/// States an instance may pass through while it is being deleted
const DELETE_PENDING: &[&str] = &[
    "ACTIVE",
    "BUILD",
    "MODIFYING",
    "REBOOTING",
    "RESTORING",
    "BACKING UP",
    "MIGRATING",
    "FAILED",
    "DELETING",
];

pub fn schema() -> Schema {
    Schema::resource(vec![
        Field::string("name").required(),
        Field::string("availability_zone")
            .required()
            .force_new()
            .description("Availability zones joined by `,`; primary first"),
        Field::string("flavor").required(),
        Field::block(
            "datastore",
            Schema::new(vec![
                Field::string("type")
                    .required()
                    .force_new()
                    .validate(string_in_slice(DATASTORE_TYPES)),
                Field::string("version").required().force_new(),
            ]),
        )
        .required()
        .force_new()
        .max_items(1),
        Field::block(
            "volume",
            Schema::new(vec![
                Field::string("type").required().force_new(),
                Field::int("size").required().validate(int_at_least(MIN_VOLUME_SIZE)),
            ]),
        )
        .required()
        .max_items(1),
        Field::string("vpc_id").required().force_new(),
        Field::string("subnet_id").required().force_new(),
        Field::string("security_group_id").required().force_new(),
        Field::block(
            "db",
            Schema::new(vec![
                Field::string("password").required().sensitive().force_new(),
                Field::int("port").optional().computed().force_new(),
                Field::string("user_name").computed(),
            ]),
        )
        .required()
        .force_new()
        .max_items(1),
        Field::block(
            "backup_strategy",
            Schema::new(vec![
                Field::string("start_time").required().validate(time_window()),
                Field::int("keep_days")
                    .optional()
                    .computed()
                    .validate(int_between(0, MAX_KEEP_DAYS)),
            ]),
        )
        .optional()
        .computed()
        .max_items(1),
        Field::string("ha_replication_mode").optional().force_new(),
        Field::map("tags").optional(),
        Field::string("status").computed(),
        Field::list("private_ips", ValueType::String).computed(),
        Field::list("public_ips", ValueType::String).computed(),
        Field::string("created").computed(),
    ])
}

pub fn definition() -> ResourceDefinition {
    ResourceDefinition::new(TYPE_NAME, schema(), RdsInstance)
        .timeouts(Timeouts {
            create: Duration::from_secs(30 * 60),
            update: Duration::from_secs(30 * 60),
            ..Timeouts::default()
        })
        .importer(Importer::Passthrough)
        .customize_diff(customize_diff)
        .retry_codes(rds::RETRY_CODES)
}

/// Volumes can only grow; resizing anything changes the reported status
fn customize_diff(diff: &mut ResourceDiff<'_>) -> Result<()> {
    if diff.is_new_resource() {
        return Ok(());
    }

    let resized = diff.has_change("volume.0.size");
    if resized {
        let (old, new) = diff.get_change("volume.0.size");
        if let (Some(old), Some(new)) = (old.and_then(Value::as_int), new.and_then(Value::as_int)) {
            if new < old {
                return Err(Error::validation(
                    "volume.0.size",
                    format!("volume size cannot be decreased from {} to {}", old, new),
                ));
            }
        }
    }

    if resized || diff.has_change("flavor") {
        diff.set_new_computed("status")?;
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DbConfig {
    password: String,
    #[serde(default)]
    port: Option<i64>,
}

/// Typed view of the configuration used for creation
#[derive(Debug, Deserialize)]
struct InstanceConfig {
    name: String,
    availability_zone: String,
    flavor: String,
    datastore: Vec<Datastore>,
    volume: Vec<Volume>,
    vpc_id: String,
    subnet_id: String,
    security_group_id: String,
    db: Vec<DbConfig>,
    #[serde(default)]
    backup_strategy: Vec<BackupStrategy>,
    #[serde(default)]
    ha_replication_mode: Option<String>,
    #[serde(default)]
    tags: Tags,
}

impl InstanceConfig {
    fn into_request(self, region: &str) -> Result<(CreateInstanceRequest, Tags)> {
        let db = single(self.db, "db")?;
        let request = CreateInstanceRequest {
            name: self.name,
            datastore: single(self.datastore, "datastore")?,
            flavor_ref: self.flavor,
            volume: single(self.volume, "volume")?,
            region: region.to_string(),
            availability_zone: self.availability_zone,
            vpc_id: self.vpc_id,
            subnet_id: self.subnet_id,
            security_group_id: self.security_group_id,
            password: db.password,
            port: db.port.map(|p| p.to_string()),
            backup_strategy: self.backup_strategy.into_iter().next(),
            ha: self
                .ha_replication_mode
                .filter(|m| !m.is_empty())
                .map(|replication_mode| Ha {
                    mode: "Ha".to_string(),
                    replication_mode,
                }),
        };
        Ok((request, self.tags))
    }
}

pub struct RdsInstance;

impl RdsInstance {
    /// Wait until the instance leaves its transitional states
    async fn wait_active(ctx: &Context, client: &ServiceClient, id: &str, delay: Duration) -> Result<()> {
        let wait = ctx
            .state_wait(format!("rds instance {}", id), rds::PENDING_STATES, &[rds::STATUS_ACTIVE])
            .with_delay(delay);
        wait_for_state(ctx, &wait, || rds::instance_state(client, id)).await?;
        Ok(())
    }

    fn apply_instance(d: &mut ResourceData, instance: Instance) -> Result<()> {
        d.set("name", &instance.name)?;
        d.set("flavor", &instance.flavor_ref)?;
        d.set("status", &instance.status)?;
        d.set("created", &instance.created)?;

        let zones = instance.availability_zone();
        if !zones.is_empty() {
            d.set("availability_zone", zones)?;
        }
        d.set("vpc_id", &instance.vpc_id)?;
        d.set("subnet_id", &instance.subnet_id)?;
        d.set("security_group_id", &instance.security_group_id)?;

        d.set_from("datastore", &[&instance.datastore])?;
        d.set_from("volume", &[&instance.volume])?;

        // The password is never returned; keep the known one
        let password = d.get_string("db.0.password");
        d.set_json(
            "db",
            &json!([{
                "password": password,
                "port": instance.port,
                "user_name": instance.db_user_name,
            }]),
        )?;

        if let Some(policy) = &instance.backup_strategy {
            d.set_from("backup_strategy", &[policy])?;
        }
        let replication = instance
            .ha
            .map(|ha| ha.replication_mode)
            .filter(|m| !m.is_empty());
        d.set("ha_replication_mode", replication)?;

        d.set_json("private_ips", &json!(instance.private_ips))?;
        d.set_json("public_ips", &json!(instance.public_ips))?;
        d.set("tags", from_tag_list(instance.tags))?;
        Ok(())
    }
}

#[async_trait]
impl Resource for RdsInstance {
    async fn create(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let config: InstanceConfig = d.decode()?;
        let (request, tags) = config.into_request(client.region())?;

        // Nothing to wait on before the instance exists
        let created = retry_while_transient(ctx, &ctx.retry(), || rds::create_instance(&client, &request)).await?;
        let id = created.id;
        d.set_id(&id);
        tracing::info!("RDS instance {} created, waiting for it to become active", id);

        let wait = ctx.state_wait(
            format!("rds instance {}", id),
            &[rds::STATUS_BUILD],
            &[rds::STATUS_ACTIVE],
        );
        match wait_for_state(ctx, &wait, || rds::instance_state(&client, &id)).await {
            Err(Error::UnexpectedState { state, .. }) if state == rds::STATUS_FAILED => {
                return Err(Error::Other(format!(
                    "rds instance {} failed to build (status {})",
                    id, state
                )));
            }
            result => result?,
        };

        crate::tags::sync_tags(ctx, &client, rds::TAG_SCOPE, &id, &Tags::new(), &tags).await?;

        self.read(ctx, d).await
    }

    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        match rds::get_instance(&client, d.id()).await {
            Ok(instance) => Self::apply_instance(d, instance),
            Err(err) => d.check_deleted(err, "rds instance"),
        }
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let id = d.id().to_string();
        let quiesce = ctx.state_wait(format!("rds instance {}", id), rds::PENDING_STATES, &[rds::STATUS_ACTIVE]);
        let refresh = || rds::instance_state(&client, &id);

        if d.has_change("name") {
            let name = d.get_string("name");
            tracing::info!("Renaming RDS instance {} to {}", id, name);
            retry_with_wait(ctx, &ctx.retry(), || rds::rename_instance(&client, &id, &name), &quiesce, refresh).await?;
            Self::wait_active(ctx, &client, &id, Duration::ZERO).await?;
            d.partial("name");
        }

        if d.has_change("flavor") {
            let flavor = d.get_string("flavor");
            tracing::info!("Resizing RDS instance {} to flavor {}", id, flavor);
            retry_with_wait(ctx, &ctx.retry(), || rds::resize_flavor(&client, &id, &flavor), &quiesce, refresh).await?;
            Self::wait_active(ctx, &client, &id, ctx.poll_interval()).await?;
            d.partial("flavor");
        }

        if d.has_change("volume.0.size") {
            let size = d.get_int("volume.0.size").unwrap_or(MIN_VOLUME_SIZE);
            tracing::info!("Enlarging RDS instance {} volume to {} GB", id, size);
            retry_with_wait(ctx, &ctx.retry(), || rds::enlarge_volume(&client, &id, size), &quiesce, refresh).await?;
            Self::wait_active(ctx, &client, &id, ctx.poll_interval()).await?;
            d.partial("volume");
        }

        if d.has_change("backup_strategy") {
            if let Some(block) = d.get_block("backup_strategy") {
                let policy = BackupStrategy {
                    start_time: block.get("start_time").and_then(Value::as_str).unwrap_or_default().to_string(),
                    keep_days: block.get("keep_days").and_then(Value::as_int),
                };
                tracing::info!("Updating backup policy of RDS instance {}", id);
                retry_with_wait(
                    ctx,
                    &ctx.retry(),
                    || rds::update_backup_policy(&client, &id, &policy),
                    &quiesce,
                    refresh,
                )
                .await?;
                Self::wait_active(ctx, &client, &id, Duration::ZERO).await?;
                d.partial("backup_strategy");
            }
        }

        if d.has_change("tags") {
            update_tags(ctx, &client, rds::TAG_SCOPE, d).await?;
            d.partial("tags");
        }

        self.read(ctx, d).await
    }

    async fn delete(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Rds).await?;
        let id = d.id().to_string();
        let quiesce = ctx.state_wait(format!("rds instance {}", id), rds::PENDING_STATES, &[rds::STATUS_ACTIVE]);
        let refresh = || rds::instance_state(&client, &id);

        if let Err(err) = retry_with_wait(ctx, &ctx.retry(), || rds::delete_instance(&client, &id), &quiesce, refresh).await {
            return d.check_deleted(err, "rds instance");
        }

        let gone = ctx.state_wait(format!("rds instance {}", id), DELETE_PENDING, &[DELETED]);
        wait_for_state(ctx, &gone, refresh).await?;
        tracing::info!("RDS instance {} deleted", id);
        d.set_id("");
        Ok(())
    }
}
