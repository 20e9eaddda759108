//! Property-based tests using proptest
//!
//! These tests verify the diff engine verdicts and tag batching using
//! randomized configurations.

use proptest::prelude::*;
use serde_json::{json, Value};
use tfotc::diff::{diff, Verdict};
use tfotc::schema::{Field, Schema, ValueType};
use tfotc::tags::{diff_tags, Tags};

fn schema() -> Schema {
    Schema::resource(vec![
        Field::string("name").required(),
        Field::string("zone").required().force_new(),
        Field::int("size").optional(),
        Field::set("labels", ValueType::String).optional(),
        Field::map("tags").optional(),
        Field::string("status").computed(),
    ])
}

/// Generate an arbitrary configuration for [`schema`]
fn arb_config() -> impl Strategy<Value = Value> {
    (
        "[a-z][a-z0-9-]{0,20}",                               // name
        prop_oneof!["eu-de-01", "eu-de-02", "eu-de-03"],      // zone
        1i64..1000,                                           // size
        prop::collection::btree_set("[a-z]{1,8}", 0..5),      // labels
        prop::collection::btree_map("[a-z]{1,8}", "[a-z0-9]{0,8}", 0..5), // tags
    )
        .prop_map(|(name, zone, size, labels, tags)| {
            json!({
                "name": name,
                "zone": zone,
                "size": size,
                "labels": labels.into_iter().collect::<Vec<_>>(),
                "tags": tags,
            })
        })
}

fn plan(prior: &Value, config: &Value) -> tfotc::diff::ChangeSet {
    let schema = schema();
    let mut state = prior.clone();
    state["id"] = json!("x-1");
    state["status"] = json!("ACTIVE");
    let prior = schema.decode_state(&state).unwrap();
    let config = schema.decode_config(config).unwrap();
    diff(&prior, &config, &schema)
}

fn arb_tags() -> impl Strategy<Value = Tags> {
    prop::collection::btree_map("[a-c]{1,2}", "[0-2]{1}", 0..6)
}

proptest! {
    /// Applying an unchanged configuration never plans a change
    #[test]
    fn unchanged_config_is_noop(config in arb_config()) {
        let changes = plan(&config, &config);
        prop_assert!(changes.is_empty(), "unexpected changes: {:?}", changes);
        prop_assert_eq!(changes.verdict(), Verdict::NoChange);
    }

    /// Set order does not matter
    #[test]
    fn reordered_set_is_noop(config in arb_config()) {
        let mut reordered = config.clone();
        if let Some(labels) = reordered["labels"].as_array_mut() {
            labels.reverse();
        }
        prop_assert_eq!(plan(&config, &reordered).verdict(), Verdict::NoChange);
    }

    /// Changing a force-new attribute always replaces
    #[test]
    fn force_new_change_replaces(config in arb_config(), new_name in "[a-z]{1,10}") {
        let mut desired = config.clone();
        desired["zone"] = json!("eu-nl-01");
        desired["name"] = json!(new_name);
        let changes = plan(&config, &desired);
        prop_assert_eq!(changes.verdict(), Verdict::DestroyThenCreate);
        prop_assert!(changes.force_new.contains("zone"));
    }

    /// Changing only updatable attributes updates in place
    #[test]
    fn updatable_change_is_in_place(config in arb_config(), delta in 1i64..100) {
        let mut desired = config.clone();
        desired["size"] = json!(config["size"].as_i64().unwrap() + delta);
        let changes = plan(&config, &desired);
        prop_assert_eq!(changes.verdict(), Verdict::UpdateInPlace);
        prop_assert!(changes.force_new.is_empty());
        prop_assert!(changes.has_change("size"));
    }

    /// Removing then adding the batches turns the old tags into the new ones
    #[test]
    fn tag_batches_converge(old in arb_tags(), new in arb_tags()) {
        let batches = diff_tags(&old, &new);
        let mut result = old.clone();
        for key in batches.remove.keys() {
            result.remove(key);
        }
        result.extend(batches.add.clone());
        prop_assert_eq!(&result, &new);

        // Nothing is touched twice without need
        for (key, value) in &batches.add {
            prop_assert_ne!(old.get(key), Some(value));
        }
        prop_assert_eq!(batches.is_empty(), old == new);
    }
}
