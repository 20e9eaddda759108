//! Schema Registry
//!
//! Holds every resource and data source definition, keyed by type name.
//! Definitions are checked once at registration; after startup the
//! registry is immutable and shared behind an `Arc`.

use super::resource::{DataSourceDefinition, ResourceDefinition};
use crate::error::{Error, Result};
use crate::schema::ID_FIELD;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct Registry {
    resources: BTreeMap<String, Arc<ResourceDefinition>>,
    data_sources: BTreeMap<String, Arc<DataSourceDefinition>>,
}

fn schema_error(type_name: &str, message: impl Into<String>) -> Error {
    Error::Schema {
        type_name: type_name.to_string(),
        message: message.into(),
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, def: ResourceDefinition) -> Result<()> {
        let name = def.type_name.clone();
        if name.is_empty() {
            return Err(schema_error(&name, "empty type name"));
        }
        if self.resources.contains_key(&name) {
            return Err(schema_error(&name, "type registered more than once"));
        }
        def.schema.check().map_err(|msg| schema_error(&name, msg))?;

        if def.schema.field(ID_FIELD).is_some_and(|f| !f.computed) {
            return Err(schema_error(&name, "id must be computed"));
        }

        if !def.handlers.supports_update() {
            let mutable: Vec<&str> = def
                .schema
                .fields()
                .iter()
                .filter(|f| f.name != ID_FIELD && (f.required || f.optional) && !f.force_new)
                .map(|f| f.name.as_str())
                .collect();
            if !mutable.is_empty() {
                return Err(schema_error(
                    &name,
                    format!("no update handler but fields are not force_new: {}", mutable.join(", ")),
                ));
            }
        }

        tracing::debug!("Registered resource {}", name);
        self.resources.insert(name, Arc::new(def));
        Ok(())
    }

    pub fn register_data_source(&mut self, def: DataSourceDefinition) -> Result<()> {
        let name = def.type_name.clone();
        if self.data_sources.contains_key(&name) {
            return Err(schema_error(&name, "data source registered more than once"));
        }
        def.schema.check().map_err(|msg| schema_error(&name, msg))?;

        tracing::debug!("Registered data source {}", name);
        self.data_sources.insert(name, Arc::new(def));
        Ok(())
    }

    pub fn resource(&self, type_name: &str) -> Option<Arc<ResourceDefinition>> {
        self.resources.get(type_name).cloned()
    }

    pub fn data_source(&self, type_name: &str) -> Option<Arc<DataSourceDefinition>> {
        self.data_sources.get(type_name).cloned()
    }

    /// All resource type names (sorted)
    pub fn resource_types(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// All data source type names (sorted)
    pub fn data_source_types(&self) -> Vec<&str> {
        self.data_sources.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::provider::data::ResourceData;
    use crate::provider::resource::Resource;
    use crate::schema::{Field, Schema};
    use async_trait::async_trait;

    struct Noop {
        updates: bool,
    }

    #[async_trait]
    impl Resource for Noop {
        async fn create(&self, _ctx: &Context, _d: &mut ResourceData) -> Result<()> {
            Ok(())
        }

        async fn read(&self, _ctx: &Context, _d: &mut ResourceData) -> Result<()> {
            Ok(())
        }

        fn supports_update(&self) -> bool {
            self.updates
        }

        async fn delete(&self, _ctx: &Context, _d: &mut ResourceData) -> Result<()> {
            Ok(())
        }
    }

    fn schema() -> Schema {
        Schema::resource(vec![Field::string("name").required()])
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = Registry::new();
        registry
            .register(ResourceDefinition::new("x_thing", schema(), Noop { updates: true }))
            .unwrap();
        assert!(registry.resource("x_thing").is_some());
        assert_eq!(registry.resource_types(), vec!["x_thing"]);
    }

    #[test]
    fn test_duplicate_type_name() {
        let mut registry = Registry::new();
        registry
            .register(ResourceDefinition::new("x_thing", schema(), Noop { updates: true }))
            .unwrap();
        let err = registry
            .register(ResourceDefinition::new("x_thing", schema(), Noop { updates: true }))
            .unwrap_err();
        assert!(matches!(err, Error::Schema { .. }));
    }

    #[test]
    fn test_without_update_fields_must_force_new() {
        let mut registry = Registry::new();
        let err = registry
            .register(ResourceDefinition::new("x_thing", schema(), Noop { updates: false }))
            .unwrap_err();
        assert!(err.to_string().contains("name"));

        let immutable = Schema::resource(vec![Field::string("name").required().force_new()]);
        registry
            .register(ResourceDefinition::new("x_thing", immutable, Noop { updates: false }))
            .unwrap();
    }

    #[test]
    fn test_malformed_schema_rejected() {
        let mut registry = Registry::new();
        let bad = Schema::resource(vec![Field::string("name").required().optional()]);
        assert!(registry
            .register(ResourceDefinition::new("x_thing", bad, Noop { updates: true }))
            .is_err());

        let bad_id = Schema::resource(vec![Field::string("id").required()]);
        assert!(registry
            .register(ResourceDefinition::new("x_other", bad_id, Noop { updates: true }))
            .is_err());
    }
}
