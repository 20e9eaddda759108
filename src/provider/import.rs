//! Import id parsing

use crate::error::{Error, Result};
use crate::schema::{FieldMap, Value, ID_FIELD};

/// How an external id seeds prior state before the import Read
#[derive(Clone, Copy)]
pub enum Importer {
    /// The external id is the resource id
    Passthrough,
    /// `/`-separated parts named by the given attributes; the part named
    /// `id` becomes the resource id
    Compound(&'static [&'static str]),
}

impl Importer {
    pub fn seed(&self, external_id: &str) -> Result<(String, FieldMap)> {
        let invalid = |reason: String| Error::InvalidImportId {
            id: external_id.to_string(),
            reason,
        };

        match self {
            Importer::Passthrough => {
                if external_id.trim().is_empty() {
                    return Err(invalid("id must not be empty".to_string()));
                }
                Ok((external_id.to_string(), FieldMap::new()))
            }
            Importer::Compound(names) => {
                let parts: Vec<&str> = external_id.split('/').collect();
                if parts.len() != names.len() || parts.iter().any(|p| p.is_empty()) {
                    return Err(invalid(format!("expected the form {}", names.join("/"))));
                }

                let mut seeded = FieldMap::new();
                let mut id = None;
                for (name, part) in names.iter().zip(parts) {
                    if *name == ID_FIELD {
                        id = Some(part.to_string());
                    } else {
                        seeded.insert(name.to_string(), Value::from(part));
                    }
                }
                let id = id.ok_or_else(|| invalid("importer declares no id part".to_string()))?;
                Ok((id, seeded))
            }
        }
    }
}
