//! Built-in resources and data sources
//!
//! # Module Structure
//!
//! - [`rds_instance`] - `opentelekomcloud_rds_instance_v3`
//! - [`rds_backup`] - `opentelekomcloud_rds_backup_v3`
//! - [`kms_key`] - `opentelekomcloud_kms_key_v1`
//! - [`data_kms_key`] - data source `opentelekomcloud_kms_key_v1`

pub mod data_kms_key;
pub mod kms_key;
pub mod rds_backup;
pub mod rds_instance;

use crate::context::Context;
use crate::error::Result;
use crate::otc::ServiceClient;
use crate::provider::{Registry, ResourceData};
use crate::schema::Value;
use crate::tags::{sync_tags, Tags};

/// Register every built-in type
pub fn register_all(registry: &mut Registry) -> Result<()> {
    registry.register(rds_instance::definition())?;
    registry.register(rds_backup::definition())?;
    registry.register(kms_key::definition())?;
    registry.register_data_source(data_kms_key::definition())?;
    Ok(())
}

/// Registry holding the built-in types
pub fn builtin() -> Result<Registry> {
    let mut registry = Registry::new();
    register_all(&mut registry)?;
    Ok(registry)
}

/// Push the `tags` change of `d` to `{scope}/{id}`
pub(crate) async fn update_tags(ctx: &Context, client: &ServiceClient, scope: &str, d: &ResourceData) -> Result<()> {
    let (old, new) = d.get_change("tags");
    let as_tags = |v: Option<Value>| -> Tags { v.as_ref().and_then(Value::as_map).cloned().unwrap_or_default() };
    sync_tags(ctx, client, scope, d.id(), &as_tags(old), &as_tags(new)).await
}

/// First instance of a block decoded from configuration
pub(crate) fn single<T>(blocks: Vec<T>, path: &str) -> Result<T> {
    blocks
        .into_iter()
        .next()
        .ok_or_else(|| crate::error::Error::validation(path, "block is required"))
}
