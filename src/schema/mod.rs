//! Schema layer
//!
//! Declarative descriptors for resource and data source fields. A
//! [`Schema`] is built once per type at startup, checked for
//! well-formedness by the registry, and then used to coerce untyped JSON
//! (configuration and persisted state) into typed [`Value`]s.
//!
//! # Module Structure
//!
//! - [`value`] - Typed values and field maps
//! - [`validation`] - Reusable validators and diff suppressors
//!
//! # Example
//!
//! ```ignore
//! use tfotc::schema::{Field, Schema};
//!
//! let schema = Schema::resource(vec![
//!     Field::string("name").required(),
//!     Field::int("size").optional().default(10),
//!     Field::string("availability_zone").required().force_new(),
//! ]);
//! let config = schema.decode_config(&serde_json::json!({"name": "t1", "availability_zone": "eu-de-01"}))?;
//! ```

pub mod validation;
pub mod value;

pub use value::{default_hash, lookup, FieldMap, Value};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{Error, Result};
use serde_json::{Map, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// Validator: `(value, attribute path) → diagnostics`
pub type Validator = Arc<dyn Fn(&Value, &str) -> Vec<Diagnostic> + Send + Sync>;

/// Declares two values semantically equal
pub type DiffSuppressFn = fn(&Value, &Value) -> bool;

/// Addresses set elements
pub type HashFn = fn(&Value) -> u64;

/// Name of the primary key field carried by every resource
pub const ID_FIELD: &str = "id";

/// Semantic type of a field
#[derive(Debug, Clone)]
pub enum ValueType {
    String,
    Int,
    Float,
    Bool,
    List(Box<ValueType>),
    Set(Box<ValueType>),
    /// `mapping<string, string>`
    Map,
    Block(Schema),
}

impl ValueType {
    pub fn describe(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "integer",
            ValueType::Float => "number",
            ValueType::Bool => "bool",
            ValueType::List(_) => "list",
            ValueType::Set(_) => "set",
            ValueType::Map => "map of strings",
            ValueType::Block(_) => "block",
        }
    }
}

/// A single field descriptor
#[derive(Clone)]
pub struct Field {
    pub name: String,
    pub ty: ValueType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub force_new: bool,
    pub sensitive: bool,
    pub default: Option<Value>,
    pub max_items: Option<usize>,
    pub description: String,
    validator: Option<Validator>,
    diff_suppress: Option<DiffSuppressFn>,
    set_hash: Option<HashFn>,
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("force_new", &self.force_new)
            .field("sensitive", &self.sensitive)
            .field("default", &self.default)
            .field("max_items", &self.max_items)
            .finish_non_exhaustive()
    }
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            sensitive: false,
            default: None,
            max_items: None,
            description: String::new(),
            validator: None,
            diff_suppress: None,
            set_hash: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::String)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Int)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Float)
    }

    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Bool)
    }

    pub fn list(name: impl Into<String>, elem: ValueType) -> Self {
        Self::new(name, ValueType::List(Box::new(elem)))
    }

    pub fn set(name: impl Into<String>, elem: ValueType) -> Self {
        Self::new(name, ValueType::Set(Box::new(elem)))
    }

    pub fn map(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::Map)
    }

    pub fn block(name: impl Into<String>, schema: Schema) -> Self {
        Self::new(name, ValueType::Block(schema))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn validate(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn suppress_diff(mut self, suppress: DiffSuppressFn) -> Self {
        self.diff_suppress = Some(suppress);
        self
    }

    pub fn set_hash(mut self, hash: HashFn) -> Self {
        self.set_hash = Some(hash);
        self
    }

    /// Filled by the remote only; the user may not set it
    pub fn is_computed_only(&self) -> bool {
        self.computed && !self.required && !self.optional
    }

    pub fn diff_suppressor(&self) -> Option<DiffSuppressFn> {
        self.diff_suppress
    }

    pub fn hash_elem(&self, elem: &Value) -> u64 {
        self.set_hash.map_or_else(|| default_hash(elem), |h| h(elem))
    }

    fn run_validator(&self, value: &Value, path: &str) -> Vec<Diagnostic> {
        self.validator
            .as_ref()
            .map(|v| v(value, path))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// User configuration: strict
    Config,
    /// Persisted state: lenient
    State,
}

/// An ordered set of field descriptors
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Top-level resource schema; adds a computed `id` unless declared
    pub fn resource(mut fields: Vec<Field>) -> Self {
        if !fields.iter().any(|f| f.name == ID_FIELD) {
            fields.push(Field::string(ID_FIELD).computed());
        }
        Self { fields }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve a dotted attribute path (`volume.0.size`) to its descriptor
    pub fn lookup(&self, path: &str) -> Option<&Field> {
        let mut schema = self;
        let mut found = None;
        for segment in path.split('.') {
            if segment.parse::<usize>().is_ok() {
                continue;
            }
            let field = schema.field(segment)?;
            found = Some(field);
            if let ValueType::Block(inner) = &field.ty {
                schema = inner;
            }
        }
        found
    }

    /// Well-formedness check run once at registration
    pub fn check(&self) -> Result<(), String> {
        self.check_at("")
    }

    fn check_at(&self, prefix: &str) -> Result<(), String> {
        let mut seen = HashSet::new();

        for field in &self.fields {
            let path = format!("{}{}", prefix, field.name);

            if field.name.is_empty() {
                return Err(format!("{}: empty field name", prefix.trim_end_matches('.')));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(format!("{}: declared more than once", path));
            }
            if field.required && field.optional {
                return Err(format!("{}: required and optional are mutually exclusive", path));
            }
            if field.required && field.computed {
                return Err(format!("{}: required fields cannot be computed", path));
            }
            if !field.required && !field.optional && !field.computed {
                return Err(format!("{}: must be required, optional or computed", path));
            }
            if field.force_new && field.is_computed_only() {
                return Err(format!("{}: force_new on a computed-only field", path));
            }
            if field.default.is_some() && (field.required || field.is_computed_only()) {
                return Err(format!("{}: default not allowed on required or computed-only fields", path));
            }

            match &field.ty {
                ValueType::Block(inner) => {
                    if field.max_items.is_none() {
                        return Err(format!("{}: nested block without max_items", path));
                    }
                    inner.check_at(&format!("{}.", path))?;
                }
                ValueType::List(elem) | ValueType::Set(elem) => {
                    if matches!(**elem, ValueType::Block(_)) {
                        return Err(format!("{}: collections of blocks must be declared as blocks", path));
                    }
                }
                _ => {}
            }

            if let Some(default) = &field.default {
                if coerce(field, &default.to_json(), &path, Mode::State).is_err() {
                    return Err(format!("{}: default does not match the field type", path));
                }
            }
        }

        Ok(())
    }

    /// Coerce user configuration into a typed field map. Applies defaults,
    /// checks required/computed constraints and runs validators.
    pub fn decode_config(&self, json: &Json) -> Result<FieldMap, Diagnostics> {
        let mut diags = Diagnostics::new();
        let map = match json {
            Json::Object(obj) => self.decode_object(obj, "", Mode::Config, &mut diags),
            Json::Null => self.decode_object(&Map::new(), "", Mode::Config, &mut diags),
            _ => {
                diags.push(Diagnostic::error("configuration must be an object"));
                FieldMap::new()
            }
        };

        if diags.has_errors() {
            Err(diags)
        } else {
            Ok(map)
        }
    }

    /// Decode persisted state; unknown keys are ignored
    pub fn decode_state(&self, json: &Json) -> Result<FieldMap> {
        let Json::Object(obj) = json else {
            return Err(Error::validation("", "state must be an object"));
        };

        let mut diags = Diagnostics::new();
        let map = self.decode_object(obj, "", Mode::State, &mut diags);
        let result = match diags.errors().next() {
            Some(diag) => Err(Error::validation(
                diag.attribute.clone().unwrap_or_default(),
                diag.summary.clone(),
            )),
            None => Ok(map),
        };
        result
    }

    /// Coerce one JSON value for a top-level field
    pub fn coerce_field(&self, name: &str, json: &Json) -> Result<Value> {
        let field = self
            .field(name)
            .ok_or_else(|| Error::validation(name, "no such field in schema"))?;
        coerce(field, json, name, Mode::State).map_err(|diag| {
            Error::validation(diag.attribute.unwrap_or_default(), diag.summary)
        })
    }

    /// Machine-readable description of the field set
    pub fn describe(&self) -> Json {
        let fields = self
            .fields
            .iter()
            .map(|field| {
                let mut obj = Map::new();
                obj.insert("name".into(), Json::String(field.name.clone()));
                obj.insert("type".into(), Json::String(field.ty.describe().to_string()));
                for (flag, set) in [
                    ("required", field.required),
                    ("optional", field.optional),
                    ("computed", field.computed),
                    ("force_new", field.force_new),
                    ("sensitive", field.sensitive),
                ] {
                    if set {
                        obj.insert(flag.into(), Json::Bool(true));
                    }
                }
                if let Some(default) = &field.default {
                    obj.insert("default".into(), default.to_json());
                }
                if let Some(max) = field.max_items {
                    obj.insert("max_items".into(), Json::from(max));
                }
                if !field.description.is_empty() {
                    obj.insert("description".into(), Json::String(field.description.clone()));
                }
                if let ValueType::Block(inner) = &field.ty {
                    obj.insert("block".into(), inner.describe());
                }
                Json::Object(obj)
            })
            .collect();
        Json::Array(fields)
    }

    /// Encode a field map as a JSON object, omitting nulls
    pub fn encode(&self, map: &FieldMap) -> Json {
        value::field_map_to_json(map)
    }

    /// Encode with sensitive values replaced, for logs and plan output
    pub fn redact(&self, map: &FieldMap) -> Json {
        let mut out = Map::new();
        for (key, value) in map {
            if value.is_null() {
                continue;
            }
            let Some(field) = self.field(key) else {
                continue;
            };
            let encoded = match (&field.ty, value) {
                _ if field.sensitive => Json::String("(sensitive)".to_string()),
                (ValueType::Block(inner), Value::Block(blocks)) => {
                    Json::Array(blocks.iter().map(|b| inner.redact(b)).collect())
                }
                _ => value.to_json(),
            };
            out.insert(key.clone(), encoded);
        }
        Json::Object(out)
    }

    fn decode_object(
        &self,
        obj: &Map<String, Json>,
        prefix: &str,
        mode: Mode,
        diags: &mut Diagnostics,
    ) -> FieldMap {
        let mut map = FieldMap::new();

        if mode == Mode::Config {
            for key in obj.keys() {
                if self.field(key).is_none() {
                    diags.error(
                        format!("Unsupported argument {:?}", key),
                        format!("{}{}", prefix, key),
                    );
                }
            }
        }

        for field in &self.fields {
            let path = format!("{}{}", prefix, field.name);
            let raw = obj.get(&field.name).filter(|v| !v.is_null());

            let Some(raw) = raw else {
                if mode == Mode::Config {
                    if field.required {
                        diags.error(format!("Missing required argument {:?}", field.name), path);
                    } else if let Some(default) = &field.default {
                        map.insert(field.name.clone(), default.clone());
                    }
                }
                continue;
            };

            if mode == Mode::Config && field.is_computed_only() {
                diags.error(format!("{:?} is computed and cannot be set", field.name), path);
                continue;
            }

            let value = match &field.ty {
                ValueType::Block(inner) => {
                    decode_blocks(field, inner, raw, &path, mode, diags)
                }
                _ => match coerce(field, raw, &path, mode) {
                    Ok(value) => value,
                    Err(diag) => {
                        diags.push(diag);
                        continue;
                    }
                },
            };

            if mode == Mode::Config {
                if let Some(max) = field.max_items {
                    let count = value.as_list().map(<[Value]>::len).or(value.as_blocks().map(<[FieldMap]>::len));
                    if count.is_some_and(|n| n > max) {
                        diags.error(format!("at most {} item(s) allowed", max), path.clone());
                    }
                }
                for diag in field.run_validator(&value, &path) {
                    diags.push(diag);
                }
            }

            if !value.is_null() {
                map.insert(field.name.clone(), value);
            }
        }

        map
    }
}

fn decode_blocks(
    field: &Field,
    inner: &Schema,
    raw: &Json,
    path: &str,
    mode: Mode,
    diags: &mut Diagnostics,
) -> Value {
    let items: Vec<&Map<String, Json>> = match raw {
        Json::Object(obj) => vec![obj],
        Json::Array(arr) => {
            let mut items = Vec::with_capacity(arr.len());
            for (i, item) in arr.iter().enumerate() {
                match item {
                    Json::Object(obj) => items.push(obj),
                    _ => diags.error(
                        format!("{:?} entries must be objects", field.name),
                        format!("{}.{}", path, i),
                    ),
                }
            }
            items
        }
        _ => {
            diags.error(format!("{:?} must be a block", field.name), path.to_string());
            return Value::Null;
        }
    };

    let blocks = items
        .into_iter()
        .enumerate()
        .map(|(i, obj)| inner.decode_object(obj, &format!("{}.{}.", path, i), mode, diags))
        .collect();
    Value::Block(blocks)
}

fn type_error(field: &Field, path: &str, raw: &Json) -> Diagnostic {
    Diagnostic::error(format!(
        "expected {} for {:?}, got {}",
        field.ty.describe(),
        field.name,
        raw
    ))
    .at(path)
}

/// Coerce a JSON value into the field's type. Numbers given as strings and
/// scalars given for string fields are accepted.
fn coerce(field: &Field, raw: &Json, path: &str, mode: Mode) -> Result<Value, Diagnostic> {
    coerce_type(field, &field.ty, raw, path, mode)
}

fn coerce_type(field: &Field, ty: &ValueType, raw: &Json, path: &str, mode: Mode) -> Result<Value, Diagnostic> {
    if raw.is_null() {
        return Ok(Value::Null);
    }

    let value = match ty {
        ValueType::String => match raw {
            Json::String(s) => Value::String(s.clone()),
            Json::Number(n) => Value::String(n.to_string()),
            Json::Bool(b) => Value::String(b.to_string()),
            _ => return Err(type_error(field, path, raw)),
        },
        ValueType::Int => match raw {
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => Value::Int(f as i64),
                    _ => return Err(type_error(field, path, raw)),
                },
            },
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| type_error(field, path, raw))?,
            _ => return Err(type_error(field, path, raw)),
        },
        ValueType::Float => match raw {
            Json::Number(n) => Value::Float(n.as_f64().ok_or_else(|| type_error(field, path, raw))?),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| type_error(field, path, raw))?,
            _ => return Err(type_error(field, path, raw)),
        },
        ValueType::Bool => match raw {
            Json::Bool(b) => Value::Bool(*b),
            Json::String(s) if s == "true" => Value::Bool(true),
            Json::String(s) if s == "false" => Value::Bool(false),
            _ => return Err(type_error(field, path, raw)),
        },
        ValueType::List(elem) => Value::List(coerce_elements(field, elem, raw, path, mode)?),
        ValueType::Set(elem) => {
            let mut seen = HashSet::new();
            let mut items: Vec<(u64, Value)> = coerce_elements(field, elem, raw, path, mode)?
                .into_iter()
                .map(|v| (field.hash_elem(&v), v))
                .filter(|(h, _)| seen.insert(*h))
                .collect();
            items.sort_by_key(|(h, _)| *h);
            Value::Set(items.into_iter().map(|(_, v)| v).collect())
        }
        ValueType::Map => match raw {
            Json::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    let s = match v {
                        Json::String(s) => s.clone(),
                        Json::Number(n) => n.to_string(),
                        Json::Bool(b) => b.to_string(),
                        _ => return Err(type_error(field, &format!("{}.{}", path, k), v)),
                    };
                    map.insert(k.clone(), s);
                }
                Value::Map(map)
            }
            _ => return Err(type_error(field, path, raw)),
        },
        ValueType::Block(inner) => {
            let mut diags = Diagnostics::new();
            let value = decode_blocks(field, inner, raw, path, mode, &mut diags);
            if let Some(diag) = diags.into_iter().next() {
                return Err(diag);
            }
            value
        }
    };

    Ok(value)
}

fn coerce_elements(
    field: &Field,
    elem: &ValueType,
    raw: &Json,
    path: &str,
    mode: Mode,
) -> Result<Vec<Value>, Diagnostic> {
    let Json::Array(arr) = raw else {
        return Err(type_error(field, path, raw));
    };
    arr.iter()
        .enumerate()
        .map(|(i, item)| coerce_type(field, elem, item, &format!("{}.{}", path, i), mode))
        .collect()
}
