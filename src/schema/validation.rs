//! Reusable field validators and diff suppressors

use super::value::Value;
use super::Validator;
use crate::diagnostics::Diagnostic;
use std::sync::Arc;

fn invalid(path: &str, message: String) -> Vec<Diagnostic> {
    vec![Diagnostic::error(message).at(path)]
}

/// Value must be one of `allowed`
pub fn string_in_slice(allowed: &'static [&'static str]) -> Validator {
    Arc::new(move |value: &Value, path: &str| match value.as_str() {
        Some(s) if allowed.contains(&s) => vec![],
        Some(s) => invalid(path, format!("expected one of {:?}, got {:?}", allowed, s)),
        None => invalid(path, "expected a string".to_string()),
    })
}

/// String length (in characters) must lie in `min..=max`
pub fn string_len_between(min: usize, max: usize) -> Validator {
    Arc::new(move |value: &Value, path: &str| match value.as_str() {
        Some(s) => {
            let len = s.chars().count();
            if (min..=max).contains(&len) {
                vec![]
            } else {
                invalid(path, format!("length must be between {} and {}, got {}", min, max, len))
            }
        }
        None => invalid(path, "expected a string".to_string()),
    })
}

/// String must start with `prefix`
pub fn string_matches_prefix(prefix: &'static str) -> Validator {
    Arc::new(move |value: &Value, path: &str| match value.as_str() {
        Some(s) if s.starts_with(prefix) => vec![],
        Some(s) => invalid(path, format!("{:?} must start with {:?}", s, prefix)),
        None => invalid(path, "expected a string".to_string()),
    })
}

/// String must not contain whitespace
pub fn no_whitespace() -> Validator {
    Arc::new(|value: &Value, path: &str| match value.as_str() {
        Some(s) if s.chars().any(char::is_whitespace) => {
            invalid(path, format!("{:?} must not contain whitespace", s))
        }
        Some(_) => vec![],
        None => invalid(path, "expected a string".to_string()),
    })
}

/// Integer must lie in `min..=max`
pub fn int_between(min: i64, max: i64) -> Validator {
    Arc::new(move |value: &Value, path: &str| match value.as_int() {
        Some(i) if (min..=max).contains(&i) => vec![],
        Some(i) => invalid(path, format!("expected a value between {} and {}, got {}", min, max, i)),
        None => invalid(path, "expected an integer".to_string()),
    })
}

/// Integer must be at least `min`
pub fn int_at_least(min: i64) -> Validator {
    Arc::new(move |value: &Value, path: &str| match value.as_int() {
        Some(i) if i >= min => vec![],
        Some(i) => invalid(path, format!("expected a value of at least {}, got {}", min, i)),
        None => invalid(path, "expected an integer".to_string()),
    })
}

/// String must be an integer in `min..=max` (some APIs take numbers as strings)
pub fn numeric_string_between(min: i64, max: i64) -> Validator {
    Arc::new(move |value: &Value, path: &str| {
        match value.as_str().and_then(|s| s.parse::<i64>().ok()) {
            Some(i) if (min..=max).contains(&i) => vec![],
            _ => invalid(path, format!("expected a number between {} and {}", min, max)),
        }
    })
}

/// `hh:mm-HH:MM` maintenance or backup window on full hours
pub fn time_window() -> Validator {
    Arc::new(|value: &Value, path: &str| {
        let Some(s) = value.as_str() else {
            return invalid(path, "expected a string".to_string());
        };
        let valid = s.split_once('-').is_some_and(|(from, to)| {
            [from, to].iter().all(|t| {
                t.split_once(':').is_some_and(|(h, m)| {
                    h.len() == 2
                        && m == "00"
                        && h.parse::<u8>().is_ok_and(|h| h < 24)
                })
            })
        });
        if valid {
            vec![]
        } else {
            invalid(path, format!("{:?} must have the form hh:00-HH:00", s))
        }
    })
}

/// Case-insensitive string comparison
pub fn suppress_case(old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// Two strings holding semantically equal JSON documents
pub fn suppress_equivalent_json(old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(a), Some(b)) => {
            let parsed_a = serde_json::from_str::<serde_json::Value>(a);
            let parsed_b = serde_json::from_str::<serde_json::Value>(b);
            matches!((parsed_a, parsed_b), (Ok(x), Ok(y)) if x == y)
        }
        _ => false,
    }
}
