//! Handler view of one resource instance
//!
//! [`ResourceData`] layers the handler's writes over the configuration and
//! the prior state. Reads resolve writes first, then configuration (when the
//! phase has one), then prior state for computed attributes.

use crate::diagnostics::Diagnostic;
use crate::diff::ChangeSet;
use crate::error::{Classifier, Error, ErrorClass, Result};
use crate::schema::{lookup, FieldMap, Schema, Value, ID_FIELD};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ResourceData {
    type_name: String,
    schema: Arc<Schema>,
    prior: FieldMap,
    config: Option<FieldMap>,
    writes: FieldMap,
    changes: ChangeSet,
    id: String,
    warnings: Vec<Diagnostic>,
}

impl ResourceData {
    pub fn new(type_name: impl Into<String>, schema: Arc<Schema>) -> Self {
        Self {
            type_name: type_name.into(),
            schema,
            prior: FieldMap::new(),
            config: None,
            writes: FieldMap::new(),
            changes: ChangeSet::default(),
            id: String::new(),
            warnings: Vec::new(),
        }
    }

    /// Prior persisted state; also provides the id
    pub fn with_prior(mut self, prior: FieldMap) -> Self {
        self.id = prior
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        self.prior = prior;
        self
    }

    /// Desired configuration for create, update and data source reads
    pub fn with_config(mut self, config: FieldMap) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_changes(mut self, changes: ChangeSet) -> Self {
        self.changes = changes;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn get(&self, path: &str) -> Option<&Value> {
        let top = path.split('.').next().unwrap_or(path);
        if self.writes.contains_key(top) {
            return lookup(&self.writes, path).filter(|v| !v.is_null());
        }
        if let Some(config) = &self.config {
            if let Some(v) = lookup(config, path) {
                return Some(v);
            }
            // Settable attributes absent from configuration are unset
            let computed = self.schema.lookup(path).is_some_and(|f| f.computed);
            if !computed {
                return None;
            }
        }
        lookup(&self.prior, path)
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// String value or empty
    pub fn get_string(&self, path: &str) -> String {
        self.get_str(path).unwrap_or_default().to_string()
    }

    pub fn get_int(&self, path: &str) -> Option<i64> {
        self.get(path).and_then(Value::as_int)
    }

    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(Value::as_bool)
    }

    pub fn get_map(&self, path: &str) -> BTreeMap<String, String> {
        self.get(path).and_then(Value::as_map).cloned().unwrap_or_default()
    }

    pub fn get_strings(&self, path: &str) -> Vec<String> {
        self.get(path)
            .and_then(Value::as_list)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// First instance of a nested block
    pub fn get_block(&self, path: &str) -> Option<&FieldMap> {
        self.get(path).and_then(Value::as_blocks).and_then(<[FieldMap]>::first)
    }

    /// `(prior, desired)` values of a path
    pub fn get_change(&self, path: &str) -> (Option<Value>, Option<Value>) {
        (lookup(&self.prior, path).cloned(), self.get(path).cloned())
    }

    pub fn has_change(&self, path: &str) -> bool {
        self.changes.has_change(path)
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Decode the current view into a typed struct
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut obj = Map::new();
        for field in self.schema.fields() {
            if let Some(value) = self.get(&field.name).filter(|v| !v.is_null()) {
                obj.insert(field.name.clone(), value.to_json());
            }
        }
        obj.insert(ID_FIELD.to_string(), Json::String(self.id.clone()));
        serde_json::from_value(Json::Object(obj)).map_err(|e| Error::decode(self.type_name.clone(), e))
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        if self.schema.field(key).is_none() {
            return Err(Error::validation(key, format!("{} has no attribute {:?}", self.type_name, key)));
        }
        self.writes.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Set from raw JSON, coerced through the field's type
    pub fn set_json(&mut self, key: &str, json: &Json) -> Result<()> {
        let value = self.schema.coerce_field(key, json)?;
        self.writes.insert(key.to_string(), value);
        Ok(())
    }

    /// Set from any serializable value (e.g. a response struct for a block)
    pub fn set_from<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_value(value).map_err(|e| Error::decode(key.to_string(), e))?;
        self.set_json(key, &json)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Record that the field group `key` was applied, so its desired value is
    /// persisted even if a later step fails
    pub fn partial(&mut self, key: &str) {
        if let Some(value) = self.get(key).cloned() {
            self.writes.insert(key.to_string(), value);
        }
    }

    pub fn warn(&mut self, summary: impl Into<String>) {
        self.warnings.push(Diagnostic::warning(summary));
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    /// Clear the id when `err` says the object is gone; other errors pass
    pub fn check_deleted(&mut self, err: Error, what: &str) -> Result<()> {
        if Classifier::default().classify(&err) == ErrorClass::NotFound {
            tracing::info!("{} {} is gone, removing from state", what, self.id);
            self.id.clear();
            return Ok(());
        }
        Err(err)
    }

    // =========================================================================
    // State
    // =========================================================================

    /// State to persist after success; `None` when the id is empty
    pub fn into_state(self) -> Option<FieldMap> {
        if self.id.is_empty() {
            return None;
        }
        let mut state = FieldMap::new();
        for field in self.schema.fields() {
            if let Some(value) = self.get(&field.name).filter(|v| !v.is_null()) {
                state.insert(field.name.clone(), value.clone());
            }
        }
        state.insert(ID_FIELD.to_string(), Value::String(self.id));
        Some(state)
    }

    /// State to persist after a failure: prior values with the handler's
    /// writes and applied groups on top
    pub fn into_error_state(self) -> Option<FieldMap> {
        if self.id.is_empty() {
            return None;
        }
        let mut state = self.prior;
        for (key, value) in self.writes {
            if value.is_null() {
                state.remove(&key);
            } else {
                state.insert(key, value);
            }
        }
        state.insert(ID_FIELD.to_string(), Value::String(self.id));
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde::Deserialize;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::resource(vec![
            Field::string("name").required(),
            Field::string("description").optional(),
            Field::int("port").optional().computed(),
            Field::string("status").computed(),
        ]))
    }

    fn prior() -> FieldMap {
        schema()
            .decode_state(&json!({"id": "i-1", "name": "old", "description": "d", "port": 3306, "status": "ACTIVE"}))
            .unwrap()
    }

    #[test]
    fn test_layers() {
        let config = schema().decode_config(&json!({"name": "new"})).unwrap();
        let mut d = ResourceData::new("t", schema()).with_prior(prior()).with_config(config);

        assert_eq!(d.id(), "i-1");
        assert_eq!(d.get_str("name"), Some("new"));
        // Removed from configuration
        assert_eq!(d.get("description"), None);
        // Optional+computed keeps the remote value
        assert_eq!(d.get_int("port"), Some(3306));
        assert_eq!(d.get_str("status"), Some("ACTIVE"));

        d.set("status", "MODIFYING").unwrap();
        assert_eq!(d.get_str("status"), Some("MODIFYING"));
        assert!(d.set("unknown", "x").is_err());
    }

    #[test]
    fn test_read_phase_uses_prior() {
        let d = ResourceData::new("t", schema()).with_prior(prior());
        assert_eq!(d.get_str("description"), Some("d"));
    }

    #[test]
    fn test_decode_typed() {
        #[derive(Deserialize)]
        struct Typed {
            id: String,
            name: String,
            port: Option<i64>,
        }
        let d = ResourceData::new("t", schema()).with_prior(prior());
        let typed: Typed = d.decode().unwrap();
        assert_eq!(typed.id, "i-1");
        assert_eq!(typed.name, "old");
        assert_eq!(typed.port, Some(3306));
    }

    #[test]
    fn test_states() {
        let config = schema().decode_config(&json!({"name": "new"})).unwrap();
        let mut d = ResourceData::new("t", schema()).with_prior(prior()).with_config(config.clone());
        d.partial("name");
        let failed = d.into_error_state().unwrap();
        assert_eq!(failed.get("name"), Some(&Value::from("new")));
        assert_eq!(failed.get("description"), Some(&Value::from("d")));

        let d = ResourceData::new("t", schema()).with_prior(prior()).with_config(config);
        let ok = d.into_state().unwrap();
        assert!(!ok.contains_key("description"));

        let mut gone = ResourceData::new("t", schema()).with_prior(prior());
        gone.check_deleted(Error::not_found("thing", "i-1"), "thing").unwrap();
        assert!(gone.into_state().is_none());
    }
}
