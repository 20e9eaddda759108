//! Error taxonomy and classification
//!
//! Every fallible operation in the runtime returns [`Error`]. The
//! [`Classifier`] maps an error onto an [`ErrorClass`], which is what the
//! retry and waiter loops in [`crate::waiter`] act on. Vendor error payloads
//! are parsed once into [`ApiError`] so handlers never look at raw bodies.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// How an error should be treated by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote rejected the call because of its own serialization; retry
    Transient,
    /// The remote object is gone
    NotFound,
    /// A user-caused precondition failure
    Conflict,
    /// Anything else; surface to the user
    Permanent,
}

/// An error response returned by the remote API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub method: String,
    pub url: String,
    pub status: u16,
    /// Vendor error code such as `DBS.200019`
    pub code: Option<String>,
    pub message: String,
}

impl ApiError {
    /// Build an API error from a raw response body
    pub fn from_response(method: &str, url: &str, status: u16, body: &str) -> Self {
        let (code, message) = parse_error_body(body);
        Self {
            method: method.to_string(),
            url: url.to_string(),
            status,
            code,
            message: message.unwrap_or_default(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} returned {}", self.method, self.url, self.status)?;
        if let Some(code) = &self.code {
            write!(f, " [{}]", code)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

const CODE_KEYS: &[&str] = &["error_code", "errCode", "code"];
const MESSAGE_KEYS: &[&str] = &["error_msg", "errMsg", "message", "msg"];

/// Extract `(code, message)` from the error body shapes the cloud uses:
/// `{"error_code": .., "error_msg": ..}`, `{"errCode": .., "errMsg": ..}`,
/// `{"error": {"code": .., "message": ..}}` and OpenStack's
/// `{"itemNotFound": {"code": 404, "message": ..}}`.
fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    let Ok(Value::Object(root)) = serde_json::from_str::<Value>(body) else {
        return (None, None);
    };

    let mut candidates = vec![&root];
    for nested in root.values() {
        if let Value::Object(inner) = nested {
            candidates.push(inner);
        }
    }

    let lookup = |keys: &[&str]| {
        candidates.iter().find_map(|obj| {
            keys.iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_str()).map(str::to_string))
        })
    };

    (lookup(CODE_KEYS), lookup(MESSAGE_KEYS))
}

/// Errors produced by the runtime, the client layer and resource handlers
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Api(ApiError),

    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("missing credentials: {0}")]
    MissingCredentials(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("timeout after {elapsed:?} waiting for {what} (last state: {last_state})")]
    Timeout {
        what: String,
        elapsed: Duration,
        last_state: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unexpected state {state:?}, wanted one of {target:?}")]
    UnexpectedState { state: String, target: Vec<String> },

    #[error("invalid import id {id:?}: {reason}")]
    InvalidImportId { id: String, reason: String },

    #[error("{path}: {message}")]
    Validation { path: String, message: String },

    #[error("malformed schema for {type_name}: {message}")]
    Schema { type_name: String, message: String },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    /// Explicit retry request from an operation
    #[error("{0}")]
    Retry(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }

    /// The API error payload, if this error came from the remote
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            Self::Api(api) => Some(api),
            _ => None,
        }
    }

    /// Errors caused by the server or the network rather than the request;
    /// these back off exponentially instead of polling at a fixed interval.
    pub fn is_server_side(&self) -> bool {
        match self {
            Self::Api(api) => api.status >= 500 || api.status == 429,
            Self::Network { .. } => true,
            _ => false,
        }
    }

    /// Attribute path for diagnostics
    pub fn attribute(&self) -> Option<&str> {
        match self {
            Self::Validation { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Human readable hint for errors the user can act on
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Api(api) if api.status == 401 => {
                Some("Check the provider credentials (OS_USERNAME, OS_PASSWORD or OS_TOKEN).")
            }
            Self::Api(api) if api.status == 403 => {
                Some("The credentials lack permission for this operation.")
            }
            Self::Api(api) if api.status == 409 => {
                Some("The remote object is in a conflicting state; it may already exist or be in use.")
            }
            Self::MissingCredentials(_) => {
                Some("Set OS_TOKEN or OS_USERNAME/OS_PASSWORD/OS_DOMAIN_NAME, or configure clouds.yaml.")
            }
            _ => None,
        }
    }
}

/// Maps errors to [`ErrorClass`] using a resource-owned retry code set
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    retry_codes: &'static [&'static str],
}

impl Classifier {
    pub const fn new(retry_codes: &'static [&'static str]) -> Self {
        Self { retry_codes }
    }

    pub fn retry_codes(&self) -> &'static [&'static str] {
        self.retry_codes
    }

    pub fn classify(&self, err: &Error) -> ErrorClass {
        match err {
            Error::Api(api) => self.classify_api(api),
            Error::Network { .. } | Error::Retry(_) => ErrorClass::Transient,
            Error::NotFound { .. } => ErrorClass::NotFound,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self, err: &Error) -> bool {
        self.classify(err) == ErrorClass::Transient
    }

    fn classify_api(&self, api: &ApiError) -> ErrorClass {
        let retryable_code = api
            .code
            .as_deref()
            .is_some_and(|code| self.retry_codes.contains(&code));

        match api.status {
            404 => ErrorClass::NotFound,
            400 | 403 | 409 if retryable_code => ErrorClass::Transient,
            409 if api.code.is_none() => ErrorClass::Transient,
            409 => ErrorClass::Conflict,
            401 | 403 => ErrorClass::Permanent,
            429 => ErrorClass::Transient,
            s if s >= 500 => ErrorClass::Transient,
            _ => ErrorClass::Permanent,
        }
    }
}
