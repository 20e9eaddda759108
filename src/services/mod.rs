//! Typed wrappers around the cloud service APIs used by the resources
//!
//! - [`rds`] - Relational Database Service v3 (instances, backups)
//! - [`kms`] - Key Management Service v1.0

pub mod kms;
pub mod rds;

use crate::error::{Error, Result};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

pub(crate) fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| Error::decode(what, e))
}

/// Some APIs send booleans as `"true"`/`"false"`
pub(crate) fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => s.eq_ignore_ascii_case("true"),
        None => false,
    })
}
