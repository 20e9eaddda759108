//! Data source `opentelekomcloud_kms_key_v1`
//!
//! Looks up exactly one key by any combination of alias, id, state, realm
//! and description.

use super::kms_key::apply_key_info;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::otc::Service;
use crate::provider::{DataSource, DataSourceDefinition, ResourceData};
use crate::schema::{Field, Schema};
use crate::services::kms::{self, KeyInfo};
use crate::waiter::retry_while_transient;
use async_trait::async_trait;

pub const TYPE_NAME: &str = "opentelekomcloud_kms_key_v1";

const FILTERS: &[&str] = &["key_alias", "key_id", "key_state", "realm", "key_description"];

pub fn schema() -> Schema {
    let mut fields: Vec<Field> = FILTERS
        .iter()
        .map(|name| Field::string(*name).optional().computed())
        .collect();
    fields.extend([
        Field::string("domain_id").computed(),
        Field::string("creation_date").computed(),
        Field::string("scheduled_deletion_date").computed(),
        Field::string("default_key_flag").computed(),
        Field::string("expiration_time").computed(),
        Field::string("origin").computed(),
    ]);
    Schema::resource(fields)
}

pub fn definition() -> DataSourceDefinition {
    DataSourceDefinition::new(TYPE_NAME, schema(), KmsKeyLookup)
}

/// Non-empty filters from the configuration
#[derive(Debug, Default)]
struct KeyFilter(Vec<(&'static str, String)>);

impl KeyFilter {
    fn from_data(d: &ResourceData) -> Self {
        Self(
            FILTERS
                .iter()
                .filter_map(|name| d.get_str(name).filter(|v| !v.is_empty()).map(|v| (*name, v.to_string())))
                .collect(),
        )
    }

    fn matches(&self, key: &KeyInfo) -> bool {
        self.0.iter().all(|(name, wanted)| {
            let actual = match *name {
                "key_alias" => &key.key_alias,
                "key_id" => &key.key_id,
                "key_state" => &key.key_state,
                "realm" => &key.realm,
                "key_description" => &key.key_description,
                _ => return false,
            };
            actual == wanted
        })
    }
}

pub struct KmsKeyLookup;

#[async_trait]
impl DataSource for KmsKeyLookup {
    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()> {
        let client = ctx.client(Service::Kms).await?;
        let filter = KeyFilter::from_data(d);

        let keys = retry_while_transient(ctx, &ctx.retry(), || kms::list_all_keys(&client)).await?;
        let mut matches: Vec<KeyInfo> = keys.into_iter().filter(|k| filter.matches(k)).collect();

        let key = match matches.len() {
            0 => {
                return Err(Error::Other(
                    "Your query returned no results. Please change your search criteria and try again.".to_string(),
                ))
            }
            1 => matches.remove(0),
            n => {
                return Err(Error::Other(format!(
                    "Your query returned {} results. Please try a more specific search criteria.",
                    n
                )))
            }
        };

        tracing::debug!("KMS key lookup matched {}", key.key_id);
        d.set_id(&key.key_id);
        apply_key_info(d, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn key(id: &str, alias: &str, state: &str) -> KeyInfo {
        KeyInfo {
            key_id: id.into(),
            key_alias: alias.into(),
            key_state: state.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter() {
        let schema = Arc::new(schema());
        let config = schema.decode_config(&json!({"key_alias": "app", "key_state": "2"})).unwrap();
        let d = ResourceData::new(TYPE_NAME, schema).with_config(config);
        let filter = KeyFilter::from_data(&d);

        assert!(filter.matches(&key("k1", "app", "2")));
        assert!(!filter.matches(&key("k2", "app", "3")));
        assert!(!filter.matches(&key("k3", "other", "2")));
    }
}
