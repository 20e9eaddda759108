//! Resource and data source definitions
//!
//! A definition binds a schema, the lifecycle handlers, timeouts, an
//! optional importer and `CustomizeDiff` hook, and the resource's retry
//! code set under one globally unique type name.

use super::data::ResourceData;
use super::import::Importer;
use crate::context::Context;
use crate::diff::CustomizeDiffFn;
use crate::error::{Classifier, Error, Result};
use crate::schema::Schema;
use async_trait::async_trait;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Create => "create",
            Phase::Read => "read",
            Phase::Update => "update",
            Phase::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Per-phase timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(20 * 60),
            read: Duration::from_secs(5 * 60),
            update: Duration::from_secs(20 * 60),
            delete: Duration::from_secs(20 * 60),
        }
    }
}

/// Longest per-instance timeout override
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

impl Timeouts {
    /// Apply a `timeouts` configuration object such as
    /// `{"create": "30m", "delete": "1h"}`
    pub fn with_overrides(&self, overrides: &Json) -> Result<Self> {
        let Json::Object(obj) = overrides else {
            return Err(Error::validation("timeouts", "must be an object"));
        };

        let mut timeouts = *self;
        for (key, value) in obj {
            let slot = match key.as_str() {
                "create" => &mut timeouts.create,
                "read" => &mut timeouts.read,
                "update" => &mut timeouts.update,
                "delete" => &mut timeouts.delete,
                other => {
                    return Err(Error::validation(format!("timeouts.{}", other), "unknown timeout"));
                }
            };
            let text = value
                .as_str()
                .ok_or_else(|| Error::validation(format!("timeouts.{}", key), "must be a duration string"))?;
            let timeout = parse_duration(text).map_err(|msg| Error::validation(format!("timeouts.{}", key), msg))?;
            if timeout > MAX_TIMEOUT {
                return Err(Error::validation(
                    format!("timeouts.{}", key),
                    format!("{:?} exceeds the maximum of {}h", text, MAX_TIMEOUT.as_secs() / 3600),
                ));
            }
            *slot = timeout;
        }
        Ok(timeouts)
    }
}

/// Parse `"1h30m"`, `"90s"`, `"20m"`
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total = 0u64;
    let mut number = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let unit = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(format!("invalid duration {:?}", text)),
        };
        let n: u64 = number
            .parse()
            .map_err(|_| format!("invalid duration {:?}", text))?;
        total = n
            .checked_mul(unit)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(|| format!("duration {:?} is too large", text))?;
        number.clear();
    }
    if !number.is_empty() {
        return Err(format!("duration {:?} is missing a unit", text));
    }

    Ok(Duration::from_secs(total))
}

/// Lifecycle handlers of a managed resource
#[async_trait]
pub trait Resource: Send + Sync {
    async fn create(&self, ctx: &Context, d: &mut ResourceData) -> Result<()>;

    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()>;

    async fn update(&self, _ctx: &Context, d: &mut ResourceData) -> Result<()> {
        Err(Error::Other(format!("{} does not support in-place updates", d.type_name())))
    }

    /// Resources without an update handler must mark every settable field
    /// force_new
    fn supports_update(&self) -> bool {
        false
    }

    async fn delete(&self, ctx: &Context, d: &mut ResourceData) -> Result<()>;
}

/// Read handler of a data source
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn read(&self, ctx: &Context, d: &mut ResourceData) -> Result<()>;
}

pub struct ResourceDefinition {
    pub type_name: String,
    pub schema: Arc<Schema>,
    pub handlers: Arc<dyn Resource>,
    pub timeouts: Timeouts,
    pub importer: Option<Importer>,
    pub customize_diff: Option<CustomizeDiffFn>,
    pub retry_codes: &'static [&'static str],
}

impl ResourceDefinition {
    pub fn new(type_name: impl Into<String>, schema: Schema, handlers: impl Resource + 'static) -> Self {
        Self {
            type_name: type_name.into(),
            schema: Arc::new(schema),
            handlers: Arc::new(handlers),
            timeouts: Timeouts::default(),
            importer: None,
            customize_diff: None,
            retry_codes: &[],
        }
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn importer(mut self, importer: Importer) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn customize_diff(mut self, hook: CustomizeDiffFn) -> Self {
        self.customize_diff = Some(hook);
        self
    }

    pub fn retry_codes(mut self, codes: &'static [&'static str]) -> Self {
        self.retry_codes = codes;
        self
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.retry_codes)
    }
}

pub struct DataSourceDefinition {
    pub type_name: String,
    pub schema: Arc<Schema>,
    pub handler: Arc<dyn DataSource>,
    pub timeout: Duration,
}

impl DataSourceDefinition {
    pub fn new(type_name: impl Into<String>, schema: Schema, handler: impl DataSource + 'static) -> Self {
        Self {
            type_name: type_name.into(),
            schema: Arc::new(schema),
            handler: Arc::new(handler),
            timeout: Timeouts::default().read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("m").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let err = parse_duration("6000000000000000h").unwrap_err();
        assert!(err.contains("too large"), "{err}");
        assert!(parse_duration("18446744073709551615s1s").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
    }

    #[test]
    fn test_timeout_overrides() {
        let t = Timeouts::default()
            .with_overrides(&json!({"create": "1h", "delete": "90s"}))
            .unwrap();
        assert_eq!(t.create, Duration::from_secs(3600));
        assert_eq!(t.delete, Duration::from_secs(90));
        assert_eq!(t.read, Duration::from_secs(300));

        let err = Timeouts::default().with_overrides(&json!({"create": 5})).unwrap_err();
        assert_eq!(err.attribute(), Some("timeouts.create"));
        assert!(Timeouts::default().with_overrides(&json!({"forever": "1h"})).is_err());
    }

    #[test]
    fn test_timeout_override_is_capped() {
        let t = Timeouts::default().with_overrides(&json!({"update": "168h"})).unwrap();
        assert_eq!(t.update, MAX_TIMEOUT);

        let err = Timeouts::default()
            .with_overrides(&json!({"create": "3000000000000000h"}))
            .unwrap_err();
        assert_eq!(err.attribute(), Some("timeouts.create"));

        let err = Timeouts::default().with_overrides(&json!({"delete": "169h"})).unwrap_err();
        assert_eq!(err.attribute(), Some("timeouts.delete"));
    }
}
