//! OTC API interaction module
//!
//! This module provides the plumbing for talking to Open Telekom Cloud
//! APIs: IAM authentication, the HTTP client, per-service clients and the
//! process-wide client factory.
//!
//! # Module Structure
//!
//! - [`auth`] - Token and password authentication with token caching
//! - [`client`] - Per-service authenticated clients
//! - [`factory`] - Lazily initialised, shared credential cache
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use tfotc::otc::{ClientFactory, Service};
//!
//! async fn example(factory: &ClientFactory, cancel: CancelToken) -> tfotc::Result<()> {
//!     let rds = factory.client_for(Service::Rds, None, None, cancel).await?;
//!     let instances = rds.get(&rds.url("instances")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod factory;
pub mod http;

pub use client::{Service, ServiceClient};
pub use factory::ClientFactory;
