//! Client factory
//!
//! Process-wide holder of authentication state. Credentials are created on
//! first use per (region, project) and shared by every invocation.

use super::auth::Credentials;
use super::client::{Service, ServiceClient};
use super::http::OtcHttpClient;
use crate::config::ProviderConfig;
use crate::context::CancelToken;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tokio::sync::Mutex;

type CredentialKey = (String, String);

pub struct ClientFactory {
    config: ProviderConfig,
    http: OtcHttpClient,
    credentials: Mutex<HashMap<CredentialKey, Credentials>>,
}

impl ClientFactory {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Ok(Self {
            config,
            http: OtcHttpClient::new()?,
            credentials: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn default_region(&self) -> &str {
        self.config.effective_region()
    }

    /// Base URL of `service` in `region`, honouring `endpoints` overrides
    pub fn endpoint(&self, service: Service, region: &str) -> String {
        match self.config.endpoint_override(service.name()) {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.{}.otc.t-systems.com", service.name(), region),
        }
    }

    /// Shared credentials for `region`/`project`
    pub async fn credentials(&self, region: &str, project: Option<&str>) -> Result<Credentials> {
        let key = (region.to_string(), project.unwrap_or_default().to_string());

        // Held across check-then-insert so concurrent first uses share one entry
        let mut cache = self.credentials.lock().await;
        if let Some(creds) = cache.get(&key) {
            return Ok(creds.clone());
        }

        let creds = Credentials::from_config(&self.config, region, project, self.http.clone())?;
        cache.insert(key, creds.clone());
        tracing::debug!("Created credentials for region {} project {:?}", region, project);
        Ok(creds)
    }

    /// Build an authenticated client. Authenticates on first use to learn
    /// the project id.
    pub async fn client_for(
        &self,
        service: Service,
        region: Option<&str>,
        project: Option<&str>,
        cancel: CancelToken,
    ) -> Result<ServiceClient> {
        let region = region.unwrap_or_else(|| self.default_region());
        let credentials = self.credentials(region, project).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        // The IAM bootstrap backoff observes cancellation too
        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            token = credentials.token() => token?,
        };

        Ok(ServiceClient::new(
            service,
            region,
            &self.endpoint(service, region),
            &token.project_id,
            self.http.clone(),
            credentials,
            cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ClientFactory {
        let mut endpoints = HashMap::new();
        endpoints.insert("kms".to_string(), "http://127.0.0.1:8080/".to_string());
        ClientFactory::new(ProviderConfig {
            token: Some("t".into()),
            project_id: Some("p1".into()),
            endpoints,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_endpoints() {
        let f = factory();
        assert_eq!(f.endpoint(Service::Rds, "eu-nl"), "https://rds.eu-nl.otc.t-systems.com");
        assert_eq!(f.endpoint(Service::Kms, "eu-de"), "http://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_client_for_uses_token_project() {
        let f = factory();
        let client = f
            .client_for(Service::Rds, None, None, CancelToken::new())
            .await
            .unwrap();
        assert_eq!(client.project_id(), "p1");
        assert_eq!(client.base_url(), "https://rds.eu-de.otc.t-systems.com/v3/p1");
    }

    #[tokio::test]
    async fn test_credentials_are_shared() {
        let f = factory();
        f.credentials("eu-de", None).await.unwrap();
        f.credentials("eu-de", None).await.unwrap();
        assert_eq!(f.credentials.lock().await.len(), 1);
    }
}
