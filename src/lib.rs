//! Resource reconciliation runtime for an Open Telekom Cloud Terraform
//! provider.
//!
//! Resources declare a [`schema::Schema`] and lifecycle handlers; the
//! [`provider::Provider`] plans changes by diffing prior state against
//! configuration and drives the handlers, which talk to the cloud through
//! authenticated [`otc::ServiceClient`]s and wait out asynchronous
//! operations with the helpers in [`waiter`].
//!
//! # Module Structure
//!
//! - [`config`] - Provider configuration (clouds.yaml, environment, file)
//! - [`otc`] - HTTP, IAM authentication and per-service clients
//! - [`context`] - Per-invocation context, cancellation and client cache
//! - [`error`] - Error type and retry classification
//! - [`diagnostics`] - User-facing errors and warnings
//! - [`logging`] - `TF_LOG` driven tracing setup
//! - [`schema`] - Field descriptors and typed values
//! - [`diff`] - Plan computation and `CustomizeDiff`
//! - [`provider`] - Registry and lifecycle dispatcher
//! - [`waiter`] - State polling and transient retries
//! - [`tags`] - Tag synchronisation
//! - [`services`] - Typed RDS and KMS API calls
//! - [`resources`] - Built-in resources and data sources
//!
//! # Example
//!
//! ```ignore
//! let registry = tfotc::resources::builtin()?;
//! let factory = ClientFactory::new(ProviderConfig::load(None)?)?;
//! let provider = Provider::new(registry, factory);
//!
//! let plan = provider.plan("opentelekomcloud_kms_key_v1", None, Some(&config))?;
//! let outcome = provider.apply(&provider.context(CancelToken::new()), &plan).await;
//! ```

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod diff;
pub mod error;
pub mod logging;
pub mod otc;
pub mod provider;
pub mod resources;
pub mod schema;
pub mod services;
pub mod tags;
pub mod waiter;

pub use error::{Error, Result};

/// Version injected at compile time via TFOTC_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("TFOTC_VERSION") {
    Some(v) => v,
    None => "dev",
};
