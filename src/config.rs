//! Provider Configuration
//!
//! Credentials, region, project and endpoint overrides consumed by the
//! client factory. Values come from `clouds.yaml`, `OS_*` environment
//! variables and an optional explicit file, in increasing precedence.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_REGION: &str = "eu-de";
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Provider-global configuration
#[derive(Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Pre-issued IAM token; requires `project_id`
    #[serde(default)]
    pub token: Option<String>,
    /// Service name → base URL, e.g. `rds = "http://127.0.0.1:8080"`
    #[serde(default)]
    pub endpoints: HashMap<String, String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

// Credentials never reach logs
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<sensitive>");
        f.debug_struct("ProviderConfig")
            .field("auth_url", &self.auth_url)
            .field("region", &self.region)
            .field("project_name", &self.project_name)
            .field("project_id", &self.project_id)
            .field("domain_name", &self.domain_name)
            .field("user_name", &self.user_name)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("endpoints", &self.endpoints)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

/// `clouds.yaml` layout (only the keys we consume)
#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: HashMap<String, CloudEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    #[serde(default)]
    auth: CloudAuth,
    #[serde(default)]
    region_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CloudAuth {
    auth_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    project_name: Option<String>,
    project_id: Option<String>,
    user_domain_name: Option<String>,
    domain_name: Option<String>,
    token: Option<String>,
}

impl ProviderConfig {
    /// Read `OS_*` variables from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read `OS_*` variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(*k))
                .filter(|v| !v.is_empty())
        };

        Self {
            auth_url: get(&["OS_AUTH_URL"]),
            region: get(&["OS_REGION_NAME", "OS_REGION"]),
            project_name: get(&["OS_PROJECT_NAME", "OS_TENANT_NAME"]),
            project_id: get(&["OS_PROJECT_ID", "OS_TENANT_ID"]),
            domain_name: get(&["OS_DOMAIN_NAME", "OS_USER_DOMAIN_NAME"]),
            user_name: get(&["OS_USERNAME"]),
            password: get(&["OS_PASSWORD"]),
            token: get(&["OS_TOKEN", "OS_AUTH_TOKEN"]),
            endpoints: HashMap::new(),
            max_retries: get(&["OS_MAX_RETRIES"]).and_then(|v| v.parse().ok()),
        }
    }

    /// Parse one cloud out of a `clouds.yaml` document
    pub fn from_clouds_yaml(content: &str, cloud: &str) -> Result<Self> {
        let file: CloudsFile = serde_yaml::from_str(content).context("Failed to parse clouds.yaml")?;
        let Some(entry) = file.clouds.get(cloud) else {
            anyhow::bail!("Cloud '{}' not found in clouds.yaml", cloud);
        };
        let auth = &entry.auth;

        Ok(Self {
            auth_url: auth.auth_url.clone(),
            region: entry.region_name.clone(),
            project_name: auth.project_name.clone(),
            project_id: auth.project_id.clone(),
            domain_name: auth.user_domain_name.clone().or_else(|| auth.domain_name.clone()),
            user_name: auth.username.clone(),
            password: auth.password.clone(),
            token: auth.token.clone(),
            ..Default::default()
        })
    }

    /// Load an explicit provider configuration file (YAML or JSON)
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider config {}", path.display()))?;

        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json {
            serde_json::from_str(&content).context("Failed to parse provider config JSON")
        } else {
            serde_yaml::from_str(&content).context("Failed to parse provider config YAML")
        }
    }

    /// Location of `clouds.yaml`: working directory first, then the user
    /// config directory
    pub fn clouds_yaml_path() -> Option<PathBuf> {
        let local = PathBuf::from("clouds.yaml");
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|p| p.join("openstack").join("clouds.yaml"))
            .filter(|p| p.exists())
    }

    /// Resolve the effective configuration (clouds.yaml < env < explicit file)
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Ok(cloud) = std::env::var("OS_CLOUD") {
            if let Some(path) = Self::clouds_yaml_path() {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                config = config.merge(Self::from_clouds_yaml(&content, &cloud)?);
                tracing::debug!("Loaded cloud '{}' from {:?}", cloud, path);
            } else {
                tracing::warn!("OS_CLOUD is set but no clouds.yaml was found");
            }
        }

        config = config.merge(Self::from_env());

        if let Some(path) = explicit {
            config = config.merge(Self::load_file(path)?);
        }

        Ok(config)
    }

    /// Overlay `other` on top of `self`; set values in `other` win
    pub fn merge(self, other: Self) -> Self {
        let mut endpoints = self.endpoints;
        endpoints.extend(other.endpoints);

        Self {
            auth_url: other.auth_url.or(self.auth_url),
            region: other.region.or(self.region),
            project_name: other.project_name.or(self.project_name),
            project_id: other.project_id.or(self.project_id),
            domain_name: other.domain_name.or(self.domain_name),
            user_name: other.user_name.or(self.user_name),
            password: other.password.or(self.password),
            token: other.token.or(self.token),
            endpoints,
            max_retries: other.max_retries.or(self.max_retries),
        }
    }

    /// Get effective region (config > default)
    pub fn effective_region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    /// Get effective project name (config > region name)
    pub fn effective_project_name(&self) -> &str {
        self.project_name
            .as_deref()
            .unwrap_or_else(|| self.effective_region())
    }

    /// IAM endpoint, honouring an `iam` endpoint override
    pub fn effective_auth_url(&self) -> String {
        if let Some(url) = self.endpoint_override("iam") {
            return format!("{}/v3", url.trim_end_matches('/'));
        }
        self.auth_url.clone().unwrap_or_else(|| {
            format!("https://iam.{}.otc.t-systems.com/v3", self.effective_region())
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn endpoint_override(&self, service: &str) -> Option<&str> {
        self.endpoints.get(service).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lookup_reads_os_variables() {
        let env: HashMap<&str, &str> = [
            ("OS_REGION_NAME", "eu-nl"),
            ("OS_USERNAME", "alice"),
            ("OS_PASSWORD", "secret"),
            ("OS_USER_DOMAIN_NAME", "OTC-EU-DE-0000"),
            ("OS_MAX_RETRIES", "3"),
        ]
        .into_iter()
        .collect();

        let config = ProviderConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.effective_region(), "eu-nl");
        assert_eq!(config.user_name.as_deref(), Some("alice"));
        assert_eq!(config.domain_name.as_deref(), Some("OTC-EU-DE-0000"));
        assert_eq!(config.max_retries(), 3);
        assert_eq!(config.effective_project_name(), "eu-nl");
    }

    #[test]
    fn test_clouds_yaml() {
        let yaml = r#"
clouds:
  otc:
    region_name: eu-de
    auth:
      auth_url: https://iam.eu-de.otc.t-systems.com/v3
      username: bob
      password: pw
      project_name: eu-de_project
      user_domain_name: OTC-EU-DE-1
"#;
        let config = ProviderConfig::from_clouds_yaml(yaml, "otc").unwrap();
        assert_eq!(config.user_name.as_deref(), Some("bob"));
        assert_eq!(config.project_name.as_deref(), Some("eu-de_project"));
        assert_eq!(config.domain_name.as_deref(), Some("OTC-EU-DE-1"));

        assert!(ProviderConfig::from_clouds_yaml(yaml, "missing").is_err());
    }

    #[test]
    fn test_merge_precedence() {
        let base = ProviderConfig {
            region: Some("eu-de".into()),
            user_name: Some("base".into()),
            ..Default::default()
        };
        let mut endpoints = HashMap::new();
        endpoints.insert("rds".to_string(), "http://localhost:1".to_string());
        let overlay = ProviderConfig {
            user_name: Some("overlay".into()),
            endpoints,
            ..Default::default()
        };

        let merged = base.merge(overlay);
        assert_eq!(merged.region.as_deref(), Some("eu-de"));
        assert_eq!(merged.user_name.as_deref(), Some("overlay"));
        assert_eq!(merged.endpoint_override("rds"), Some("http://localhost:1"));
    }

    #[test]
    fn test_auth_url_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.effective_auth_url(), "https://iam.eu-de.otc.t-systems.com/v3");

        let mut endpoints = HashMap::new();
        endpoints.insert("iam".to_string(), "http://127.0.0.1:9000/".to_string());
        let config = ProviderConfig {
            endpoints,
            ..Default::default()
        };
        assert_eq!(config.effective_auth_url(), "http://127.0.0.1:9000/v3");
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = ProviderConfig {
            password: Some("hunter2".into()),
            token: Some("tok".into()),
            ..Default::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("tok\""));
    }
}
