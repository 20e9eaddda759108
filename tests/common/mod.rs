//! Shared setup for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;
use tfotc::config::ProviderConfig;
use tfotc::context::{CancelToken, Context};
use tfotc::otc::ClientFactory;
use tfotc::provider::{Provider, Registry};

pub const PROJECT_ID: &str = "p1";

/// Token authentication with every service pointed at `uri`
pub fn token_config(uri: &str) -> ProviderConfig {
    let endpoints: HashMap<String, String> = ["rds", "kms", "iam"]
        .iter()
        .map(|s| (s.to_string(), uri.to_string()))
        .collect();
    ProviderConfig {
        token: Some("test-token".into()),
        project_id: Some(PROJECT_ID.into()),
        endpoints,
        ..Default::default()
    }
}

pub fn provider_with(registry: Registry, uri: &str) -> Provider {
    let factory = ClientFactory::new(token_config(uri)).expect("factory");
    Provider::new(registry, factory).with_poll_interval(Duration::from_millis(10))
}

/// Provider with the built-in resources talking to `uri`
pub fn builtin_provider(uri: &str) -> Provider {
    provider_with(tfotc::resources::builtin().expect("registry"), uri)
}

pub fn context(provider: &Provider) -> Context {
    provider.context(CancelToken::new())
}

pub fn rds_path(rest: &str) -> String {
    format!("/v3/{}/{}", PROJECT_ID, rest)
}

pub fn kms_path(rest: &str) -> String {
    format!("/v1.0/{}/{}", PROJECT_ID, rest)
}
