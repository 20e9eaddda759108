//! OTC service client
//!
//! A [`ServiceClient`] combines credentials, the HTTP client and the
//! service base URL for one (service, region, project). Every request
//! observes the invocation's cancellation signal.

use super::auth::Credentials;
use super::http::OtcHttpClient;
use crate::context::CancelToken;
use crate::error::{Error, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

/// Cloud services the runtime talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Iam,
    Rds,
    Kms,
}

impl Service {
    /// Endpoint host prefix and `endpoints` override key
    pub fn name(&self) -> &'static str {
        match self {
            Service::Iam => "iam",
            Service::Rds => "rds",
            Service::Kms => "kms",
        }
    }

    /// Versioned API root below the endpoint
    pub fn api_path(&self, project_id: &str) -> String {
        match self {
            Service::Iam => "v3".to_string(),
            Service::Rds => format!("v3/{}", project_id),
            Service::Kms => format!("v1.0/{}", project_id),
        }
    }
}

/// Authenticated client for one service in one region and project
#[derive(Clone)]
pub struct ServiceClient {
    service: Service,
    region: String,
    project_id: String,
    base_url: String,
    http: OtcHttpClient,
    credentials: Credentials,
    cancel: CancelToken,
}

impl ServiceClient {
    pub fn new(
        service: Service,
        region: &str,
        endpoint: &str,
        project_id: &str,
        http: OtcHttpClient,
        credentials: Credentials,
        cancel: CancelToken,
    ) -> Self {
        let base_url = format!("{}/{}", endpoint.trim_end_matches('/'), service.api_path(project_id));
        Self {
            service,
            region: region.to_string(),
            project_id: project_id.to_string(),
            base_url,
            http,
            credentials,
            cancel,
        }
    }

    pub fn service(&self) -> Service {
        self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =========================================================================
    // URL builders
    // =========================================================================

    /// `{base}/{path}` for a path that needs no escaping
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `{base}/{seg}/{seg}...` with each segment percent-encoded
    pub fn path_url(&self, segments: &[&str]) -> String {
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        self.url(&encoded.join("/"))
    }

    /// URL with query parameters; empty values are skipped
    pub fn url_with_query(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let mut url = Url::parse(&self.url(path))
            .map_err(|e| Error::Other(format!("invalid URL for {}: {}", path, e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query.iter().filter(|(_, v)| !v.is_empty()) {
                pairs.append_pair(key, value);
            }
        }
        let mut out = url.to_string();
        if out.ends_with('?') {
            out.pop();
        }
        Ok(out)
    }

    // =========================================================================
    // Requests
    // =========================================================================

    pub async fn get(&self, url: &str) -> Result<Value> {
        self.send(Method::GET, url, None).await
    }

    pub async fn post(&self, url: &str, body: &Value) -> Result<Value> {
        self.send(Method::POST, url, Some(body)).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> Result<Value> {
        self.send(Method::PUT, url, Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value> {
        self.send(Method::DELETE, url, None).await
    }

    /// Send a request, racing it against cancellation
    pub async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = self.send_authenticated(method, url, body) => result,
        }
    }

    async fn send_authenticated(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.credentials.token().await?;
        match self
            .http
            .send_json(method.clone(), url, Some(&token.token), body)
            .await
        {
            // The token may have been revoked before its expiry
            Err(Error::Api(api)) if api.status == 401 => {
                tracing::debug!("{} {} returned 401, refreshing token", method, url);
                let token = self.credentials.refresh().await?;
                self.http.send_json(method, url, Some(&token.token), body).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn client() -> ServiceClient {
        let config = ProviderConfig {
            token: Some("t".into()),
            project_id: Some("p1".into()),
            ..Default::default()
        };
        let http = OtcHttpClient::new().unwrap();
        let credentials = Credentials::from_config(&config, "eu-de", None, http.clone()).unwrap();
        ServiceClient::new(
            Service::Rds,
            "eu-de",
            "https://rds.eu-de.otc.t-systems.com/",
            "p1",
            http,
            credentials,
            CancelToken::new(),
        )
    }

    #[test]
    fn test_url_builders() {
        let c = client();
        assert_eq!(c.url("instances"), "https://rds.eu-de.otc.t-systems.com/v3/p1/instances");
        assert_eq!(
            c.path_url(&["instances", "a b", "name"]),
            "https://rds.eu-de.otc.t-systems.com/v3/p1/instances/a%20b/name"
        );
        assert_eq!(
            c.url_with_query("backups", &[("instance_id", "i-1"), ("backup_id", "")]).unwrap(),
            "https://rds.eu-de.otc.t-systems.com/v3/p1/backups?instance_id=i-1"
        );
        assert_eq!(
            c.url_with_query("instances", &[]).unwrap(),
            "https://rds.eu-de.otc.t-systems.com/v3/p1/instances"
        );
    }

    #[test]
    fn test_service_paths() {
        assert_eq!(Service::Kms.api_path("p"), "v1.0/p");
        assert_eq!(Service::Iam.api_path("p"), "v3");
        assert_eq!(Service::Rds.name(), "rds");
    }

    #[tokio::test]
    async fn test_cancelled_client_refuses_requests() {
        let c = client();
        c.cancel.cancel();
        let err = c.get(&c.url("instances")).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
