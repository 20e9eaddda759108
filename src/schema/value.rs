//! Typed field values
//!
//! The schema layer coerces user input into [`Value`] once; everything past
//! that point works on typed values instead of raw JSON.

use serde::{Serialize, Serializer};
use serde_json::Value as Json;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// A persisted or configured field map, keyed by field name
pub type FieldMap = BTreeMap<String, Value>;

/// A typed field value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Unordered, deduplicated; kept sorted by element hash
    Set(Vec<Value>),
    Map(BTreeMap<String, String>),
    /// Nested block instances
    Block(Vec<FieldMap>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null and empty collections are treated alike when diffing
    pub fn is_absent(&self) -> bool {
        match self {
            Value::Null => true,
            Value::List(v) | Value::Set(v) => v.is_empty(),
            Value::Map(m) => m.is_empty(),
            Value::Block(b) => b.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a list or set
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) | Value::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_blocks(&self) -> Option<&[FieldMap]> {
        match self {
            Value::Block(b) => Some(b),
            _ => None,
        }
    }

    /// Convert to JSON; null entries inside blocks are dropped
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::List(v) | Value::Set(v) => Json::Array(v.iter().map(Value::to_json).collect()),
            Value::Map(m) => Json::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), Json::String(v.clone())))
                    .collect(),
            ),
            Value::Block(blocks) => Json::Array(blocks.iter().map(field_map_to_json).collect()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<BTreeMap<String, String>> for Value {
    fn from(m: BTreeMap<String, String>) -> Self {
        Value::Map(m)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Convert a field map to a JSON object, omitting nulls
pub fn field_map_to_json(map: &FieldMap) -> Json {
    Json::Object(
        map.iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect(),
    )
}

/// Hash used to address set elements when no field-specific hash is given
pub fn default_hash(value: &Value) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.to_json().to_string().hash(&mut hasher);
    hasher.finish()
}

/// Resolve a dotted path (`volume.0.size`, `tags.env`) inside a field map.
/// Block segments without an index address the first instance.
pub fn lookup<'a>(map: &'a FieldMap, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;

    let mut pending: Vec<&str> = segments.collect();
    pending.reverse();

    while let Some(segment) = pending.pop() {
        current = match current {
            Value::Block(blocks) => match segment.parse::<usize>() {
                Ok(idx) => {
                    let block = blocks.get(idx)?;
                    let key = pending.pop()?;
                    block.get(key)?
                }
                Err(_) => blocks.first()?.get(segment)?,
            },
            Value::List(items) | Value::Set(items) => items.get(segment.parse::<usize>().ok()?)?,
            // Map values are not addressable as Value references
            _ => return None,
        };
    }

    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> FieldMap {
        let mut inner = FieldMap::new();
        inner.insert("size".to_string(), Value::Int(100));
        inner.insert("type".to_string(), Value::from("COMMON"));

        let mut map = FieldMap::new();
        map.insert("volume".to_string(), Value::Block(vec![inner]));
        map.insert("name".to_string(), Value::from("db"));
        map.insert(
            "ips".to_string(),
            Value::List(vec![Value::from("10.0.0.1"), Value::from("10.0.0.2")]),
        );
        map
    }

    #[test]
    fn test_lookup_paths() {
        let map = volume();
        assert_eq!(lookup(&map, "name"), Some(&Value::from("db")));
        assert_eq!(lookup(&map, "volume.0.size"), Some(&Value::Int(100)));
        assert_eq!(lookup(&map, "volume.size"), Some(&Value::Int(100)));
        assert_eq!(lookup(&map, "volume.1.size"), None);
        assert_eq!(lookup(&map, "ips.1"), Some(&Value::from("10.0.0.2")));
        assert_eq!(lookup(&map, "missing"), None);
    }

    #[test]
    fn test_absent_values() {
        assert!(Value::Null.is_absent());
        assert!(Value::List(vec![]).is_absent());
        assert!(Value::Map(BTreeMap::new()).is_absent());
        assert!(!Value::String(String::new()).is_absent());
        assert!(!Value::Int(0).is_absent());
    }

    #[test]
    fn test_to_json_omits_nulls_in_blocks() {
        let mut inner = FieldMap::new();
        inner.insert("a".to_string(), Value::Null);
        inner.insert("b".to_string(), Value::Bool(true));
        let json = Value::Block(vec![inner]).to_json();
        assert_eq!(json, serde_json::json!([{"b": true}]));
    }

    #[test]
    fn test_default_hash_is_stable() {
        assert_eq!(default_hash(&Value::from("x")), default_hash(&Value::from("x")));
        assert_ne!(default_hash(&Value::from("x")), default_hash(&Value::from("y")));
    }
}
