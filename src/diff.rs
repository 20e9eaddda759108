//! Diff engine
//!
//! Compares prior persisted state against the desired configuration and
//! produces a per-attribute [`ChangeSet`] plus a [`Verdict`] saying whether
//! the resource can be updated in place or has to be replaced.

use crate::error::{Error, Result};
use crate::schema::{lookup, Field, FieldMap, Schema, Value, ValueType, ID_FIELD};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Change of a single attribute path
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldChange {
    Unchanged,
    Changed { old: Value, new: Value },
    Added { new: Value },
    Removed { old: Value },
}

impl FieldChange {
    pub fn is_change(&self) -> bool {
        !matches!(self, FieldChange::Unchanged)
    }

    pub fn old(&self) -> Option<&Value> {
        match self {
            FieldChange::Changed { old, .. } | FieldChange::Removed { old } => Some(old),
            _ => None,
        }
    }

    pub fn new_value(&self) -> Option<&Value> {
        match self {
            FieldChange::Changed { new, .. } | FieldChange::Added { new } => Some(new),
            _ => None,
        }
    }
}

/// What a plan requires from the remote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    NoChange,
    UpdateInPlace,
    DestroyThenCreate,
}

/// Per-attribute changes keyed by dotted path
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeSet {
    pub changes: BTreeMap<String, FieldChange>,
    /// Changed paths that force replacement
    pub force_new: BTreeSet<String>,
    /// Paths whose value is only known after apply
    pub unknown: BTreeSet<String>,
}

impl ChangeSet {
    pub fn get(&self, path: &str) -> Option<&FieldChange> {
        self.changes.get(path)
    }

    /// True when `path` or any attribute nested below it changed
    pub fn has_change(&self, path: &str) -> bool {
        let nested = format!("{}.", path);
        self.changes
            .iter()
            .any(|(key, change)| change.is_change() && (key == path || key.starts_with(&nested)))
    }

    pub fn is_empty(&self) -> bool {
        self.unknown.is_empty() && !self.changes.values().any(FieldChange::is_change)
    }

    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.changes
            .iter()
            .filter(|(_, c)| c.is_change())
            .map(|(k, _)| k.as_str())
    }

    pub fn mark_unknown(&mut self, path: impl Into<String>) {
        self.unknown.insert(path.into());
    }

    pub fn mark_force_new(&mut self, path: impl Into<String>) {
        self.force_new.insert(path.into());
    }

    pub fn verdict(&self) -> Verdict {
        if !self.force_new.is_empty() {
            Verdict::DestroyThenCreate
        } else if !self.is_empty() {
            Verdict::UpdateInPlace
        } else {
            Verdict::NoChange
        }
    }

    fn record(&mut self, path: String, field: &Field, change: FieldChange) {
        if field.force_new && change.is_change() {
            self.force_new.insert(path.clone());
        }
        self.changes.insert(path, change);
    }
}

/// Diff `config` against `prior` under `schema`
pub fn diff(prior: &FieldMap, config: &FieldMap, schema: &Schema) -> ChangeSet {
    let mut changes = ChangeSet::default();
    diff_level(prior, config, schema, "", &mut changes);
    changes
}

fn diff_level(prior: &FieldMap, config: &FieldMap, schema: &Schema, prefix: &str, out: &mut ChangeSet) {
    static NULL: Value = Value::Null;

    for field in schema.fields() {
        if field.is_computed_only() || (prefix.is_empty() && field.name == ID_FIELD) {
            continue;
        }

        let path = format!("{}{}", prefix, field.name);
        let new = config.get(&field.name).unwrap_or(&NULL);
        if new.is_absent() && field.computed {
            // Optional+computed: the remote keeps its value
            continue;
        }
        let old = prior.get(&field.name).unwrap_or(&NULL);

        if let ValueType::Block(inner) = &field.ty {
            let empty = Vec::new();
            let old_blocks = old.as_blocks().unwrap_or(&empty);
            let new_blocks = new.as_blocks().unwrap_or(&empty);

            let blank = FieldMap::new();
            for i in 0..old_blocks.len().max(new_blocks.len()) {
                let o = old_blocks.get(i).unwrap_or(&blank);
                let n = new_blocks.get(i).unwrap_or(&blank);
                diff_level(o, n, inner, &format!("{}.{}.", path, i), out);
            }

            let count_changed = old_blocks.len() != new_blocks.len();
            if field.force_new && (count_changed || out.has_change(&path)) {
                out.force_new.insert(path.clone());
            } else if count_changed {
                out.changes.insert(
                    format!("{}.#", path),
                    FieldChange::Changed {
                        old: Value::Int(old_blocks.len() as i64),
                        new: Value::Int(new_blocks.len() as i64),
                    },
                );
            }
            continue;
        }

        let change = compare(field, old, new);
        out.record(path, field, change);
    }
}

/// Absent, or the empty string the API reports for unset attributes
fn is_unset(value: &Value) -> bool {
    value.is_absent() || value.as_str() == Some("")
}

fn compare(field: &Field, old: &Value, new: &Value) -> FieldChange {
    let equal = match (is_unset(old), is_unset(new)) {
        (true, true) => true,
        (false, false) => {
            field.diff_suppressor().is_some_and(|s| s(old, new)) || same_value(field, old, new)
        }
        _ => false,
    };

    if equal {
        FieldChange::Unchanged
    } else if old.is_absent() {
        FieldChange::Added { new: new.clone() }
    } else if new.is_absent() {
        FieldChange::Removed { old: old.clone() }
    } else {
        FieldChange::Changed {
            old: old.clone(),
            new: new.clone(),
        }
    }
}

fn same_value(field: &Field, old: &Value, new: &Value) -> bool {
    match (&field.ty, old, new) {
        (ValueType::Set(_), Value::Set(a) | Value::List(a), Value::Set(b) | Value::List(b)) => {
            let hashes = |items: &[Value]| {
                let mut h: Vec<u64> = items.iter().map(|v| field.hash_elem(v)).collect();
                h.sort_unstable();
                h.dedup();
                h
            };
            hashes(a) == hashes(b)
        }
        _ => old == new,
    }
}

/// The plan as seen by a `CustomizeDiff` hook. Hooks may read the plan,
/// mark computed attributes unknown, force replacement or reject.
pub struct ResourceDiff<'a> {
    schema: &'a Schema,
    prior: &'a FieldMap,
    config: &'a FieldMap,
    changes: &'a mut ChangeSet,
}

/// Post-diff hook; must not perform network calls
pub type CustomizeDiffFn = fn(&mut ResourceDiff<'_>) -> Result<()>;

impl<'a> ResourceDiff<'a> {
    pub fn new(
        schema: &'a Schema,
        prior: &'a FieldMap,
        config: &'a FieldMap,
        changes: &'a mut ChangeSet,
    ) -> Self {
        Self {
            schema,
            prior,
            config,
            changes,
        }
    }

    /// Planned value: configuration first, prior state for computed values
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(self.config, path).or_else(|| lookup(self.prior, path))
    }

    /// `(old, new)` for a path
    pub fn get_change(&self, path: &str) -> (Option<&Value>, Option<&Value>) {
        (lookup(self.prior, path), self.get(path))
    }

    pub fn has_change(&self, path: &str) -> bool {
        self.changes.has_change(path)
    }

    pub fn is_new_resource(&self) -> bool {
        self.prior
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map_or(true, str::is_empty)
    }

    /// Mark a computed attribute as known only after apply
    pub fn set_new_computed(&mut self, path: &str) -> Result<()> {
        match self.schema.lookup(path) {
            Some(field) if field.computed => {
                self.changes.mark_unknown(path);
                Ok(())
            }
            Some(_) => Err(Error::validation(path, "only computed attributes can be marked unknown")),
            None => Err(Error::validation(path, "no such attribute")),
        }
    }

    /// Force replacement because of a change at `path`; no-op when unchanged
    pub fn force_new(&mut self, path: &str) {
        if self.changes.has_change(path) {
            self.changes.mark_force_new(path);
        }
    }

    pub fn changes(&self) -> &ChangeSet {
        self.changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::validation::suppress_case;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::resource(vec![
            Field::string("name").required(),
            Field::string("availability_zone").required().force_new(),
            Field::string("engine").optional().suppress_diff(suppress_case),
            Field::string("port").optional().computed(),
            Field::string("status").computed(),
            Field::set("databases", ValueType::String).optional(),
            Field::block(
                "backup",
                Schema::new(vec![
                    Field::string("start_time").required(),
                    Field::int("keep_days").optional().computed(),
                ]),
            )
            .optional()
            .max_items(1),
        ])
    }

    fn decode(json: serde_json::Value) -> FieldMap {
        schema().decode_state(&json).unwrap()
    }

    #[test]
    fn test_identical_states_are_unchanged() {
        let state = decode(json!({
            "id": "i-1",
            "name": "a",
            "availability_zone": "eu-de-01",
            "databases": ["x", "y"],
            "backup": [{"start_time": "01:00-02:00", "keep_days": 7}]
        }));
        let changes = diff(&state, &state, &schema());
        assert_eq!(changes.verdict(), Verdict::NoChange);
        assert!(changes.changes.values().all(|c| !c.is_change()));
    }

    #[test]
    fn test_force_new_change_replaces() {
        let prior = decode(json!({"id": "i", "name": "a", "availability_zone": "eu-de-01"}));
        let config = decode(json!({"name": "a", "availability_zone": "eu-de-02"}));
        let changes = diff(&prior, &config, &schema());
        assert_eq!(changes.verdict(), Verdict::DestroyThenCreate);
        assert!(changes.force_new.contains("availability_zone"));
    }

    #[test]
    fn test_in_place_change_and_suppression() {
        let prior = decode(json!({"id": "i", "name": "a", "availability_zone": "z", "engine": "MySQL"}));
        let config = decode(json!({"name": "b", "availability_zone": "z", "engine": "mysql"}));
        let changes = diff(&prior, &config, &schema());
        assert_eq!(changes.verdict(), Verdict::UpdateInPlace);
        assert_eq!(changes.get("engine"), Some(&FieldChange::Unchanged));
        assert!(changes.has_change("name"));
    }

    #[test]
    fn test_optional_computed_keeps_prior() {
        let prior = decode(json!({"id": "i", "name": "a", "availability_zone": "z", "port": "3306", "status": "ACTIVE"}));
        let config = decode(json!({"name": "a", "availability_zone": "z"}));
        let changes = diff(&prior, &config, &schema());
        assert_eq!(changes.verdict(), Verdict::NoChange);
        assert!(changes.get("port").is_none());
        assert!(changes.get("status").is_none());
    }

    #[test]
    fn test_sets_compare_by_hash() {
        let prior = decode(json!({"id": "i", "name": "a", "availability_zone": "z", "databases": ["x", "y"]}));
        let config = decode(json!({"name": "a", "availability_zone": "z", "databases": ["y", "x"]}));
        assert_eq!(diff(&prior, &config, &schema()).verdict(), Verdict::NoChange);
    }

    #[test]
    fn test_nested_block_paths() {
        let prior = decode(json!({
            "id": "i", "name": "a", "availability_zone": "z",
            "backup": [{"start_time": "01:00-02:00", "keep_days": 7}]
        }));
        let config = decode(json!({
            "name": "a", "availability_zone": "z",
            "backup": [{"start_time": "03:00-04:00"}]
        }));
        let changes = diff(&prior, &config, &schema());
        assert!(changes.has_change("backup"));
        assert!(changes.get("backup.0.start_time").unwrap().is_change());
        assert!(changes.get("backup.0.keep_days").is_none());
    }

    #[test]
    fn test_customize_diff_hooks() {
        let schema = schema();
        let prior = decode(json!({"id": "i", "name": "a", "availability_zone": "z"}));
        let config = decode(json!({"name": "b", "availability_zone": "z"}));
        let mut changes = diff(&prior, &config, &schema);

        let mut rd = ResourceDiff::new(&schema, &prior, &config, &mut changes);
        assert!(!rd.is_new_resource());
        assert_eq!(rd.get("name"), Some(&Value::from("b")));
        assert!(rd.set_new_computed("status").is_ok());
        assert!(rd.set_new_computed("name").is_err());
        rd.force_new("availability_zone");
        rd.force_new("name");

        assert!(changes.unknown.contains("status"));
        assert_eq!(changes.verdict(), Verdict::DestroyThenCreate);
    }
}
