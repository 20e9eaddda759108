//! OTC Authentication
//!
//! Handles authentication with either a pre-issued IAM token or
//! user/password/domain credentials exchanged at IAM for a project-scoped
//! token.

use super::http::OtcHttpClient;
use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

const BOOTSTRAP_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BOOTSTRAP_BACKOFF: Duration = Duration::from_secs(30);

/// A project-scoped IAM token
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub token: String,
    pub project_id: String,
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"<sensitive>")
            .field("project_id", &self.project_id)
            .finish()
    }
}

enum AuthMethod {
    Token {
        token: String,
        project_id: String,
    },
    Password {
        auth_url: String,
        user_name: String,
        password: String,
        domain_name: String,
        scope: ProjectScope,
    },
}

#[derive(Debug, Clone)]
enum ProjectScope {
    Name(String),
    Id(String),
}

#[derive(Clone)]
struct CachedToken {
    token: AuthToken,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    expires_at: Option<String>,
    project: Option<TokenProject>,
}

#[derive(Deserialize)]
struct TokenProject {
    id: String,
}

/// Credentials for one (region, project) pair with token caching
#[derive(Clone)]
pub struct Credentials {
    http: OtcHttpClient,
    method: Arc<AuthMethod>,
    max_retries: u32,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl Credentials {
    /// Resolve the authentication mode for `region`/`project` from the
    /// provider configuration. Fails when neither mode is fully configured.
    pub fn from_config(
        config: &ProviderConfig,
        region: &str,
        project: Option<&str>,
        http: OtcHttpClient,
    ) -> Result<Self> {
        let same_project = project.is_none() && region == config.effective_region();

        let method = if let Some(token) = config.token.clone() {
            let project_id = config
                .project_id
                .clone()
                .filter(|_| same_project)
                .ok_or_else(|| Error::MissingCredentials("token authentication requires a project id".to_string()))?;
            AuthMethod::Token { token, project_id }
        } else {
            let (Some(user_name), Some(password), Some(domain_name)) = (
                config.user_name.clone(),
                config.password.clone(),
                config.domain_name.clone(),
            ) else {
                return Err(Error::MissingCredentials(
                    "user name, password and domain name are required".to_string(),
                ));
            };

            let scope = match (project, &config.project_id) {
                (Some(name), _) => ProjectScope::Name(name.to_string()),
                (None, Some(id)) if same_project => ProjectScope::Id(id.clone()),
                (None, _) if same_project => ProjectScope::Name(config.effective_project_name().to_string()),
                (None, _) => ProjectScope::Name(region.to_string()),
            };

            AuthMethod::Password {
                auth_url: config.effective_auth_url(),
                user_name,
                password,
                domain_name,
                scope,
            }
        };

        Ok(Self {
            http,
            method: Arc::new(method),
            max_retries: config.max_retries(),
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get a valid token, issuing a new one when the cached token expires
    pub async fn token(&self) -> Result<AuthToken> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another task may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if cached.is_valid() {
                return Ok(cached.token.clone());
            }
        }

        let (token, ttl) = self.issue().await?;
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });

        tracing::debug!(
            "New token cached for project {}, expires in ~{} minutes",
            token.project_id,
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }

    /// Force refresh the token
    pub async fn refresh(&self) -> Result<AuthToken> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        self.token().await
    }

    async fn issue(&self) -> Result<(AuthToken, Duration)> {
        match self.method.as_ref() {
            AuthMethod::Token { token, project_id } => Ok((
                AuthToken {
                    token: token.clone(),
                    project_id: project_id.clone(),
                },
                DEFAULT_TOKEN_TTL,
            )),
            AuthMethod::Password { .. } => self.password_token_with_retry().await,
        }
    }

    async fn password_token_with_retry(&self) -> Result<(AuthToken, Duration)> {
        let mut backoff = BOOTSTRAP_BACKOFF;
        let mut attempt = 1;

        loop {
            match self.password_token().await {
                Err(err) if err.is_server_side() && attempt < self.max_retries => {
                    tracing::warn!("IAM token request failed (attempt {}): {}", attempt, err);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BOOTSTRAP_BACKOFF);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn password_token(&self) -> Result<(AuthToken, Duration)> {
        let AuthMethod::Password {
            auth_url,
            user_name,
            password,
            domain_name,
            scope,
        } = self.method.as_ref()
        else {
            return Err(Error::Other("not a password credential".to_string()));
        };

        let project = match scope {
            ProjectScope::Name(name) => json!({ "name": name }),
            ProjectScope::Id(id) => json!({ "id": id }),
        };
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": user_name,
                            "password": password,
                            "domain": { "name": domain_name }
                        }
                    }
                },
                "scope": { "project": project }
            }
        });

        let url = format!("{}/auth/tokens", auth_url.trim_end_matches('/'));
        let response = match self.http.request(Method::POST, &url, None, Some(&body)).await {
            Err(Error::Api(api)) if api.status == 401 || api.status == 403 => {
                return Err(Error::Authentication(format!(
                    "IAM rejected the credentials for user {} ({})",
                    user_name, api.status
                )));
            }
            other => other?,
        };

        let token = response
            .header(SUBJECT_TOKEN_HEADER)
            .map(str::to_string)
            .ok_or_else(|| Error::Authentication("IAM response carries no X-Subject-Token".to_string()))?;

        let parsed: TokenResponse = serde_json::from_str(&response.body)
            .map_err(|e| Error::decode("IAM token response", e))?;

        let project_id = match (parsed.token.project, scope) {
            (Some(project), _) => project.id,
            (None, ProjectScope::Id(id)) => id.clone(),
            (None, ProjectScope::Name(name)) => {
                return Err(Error::Authentication(format!("token is not scoped to project {}", name)));
            }
        };

        let ttl = parsed
            .token
            .expires_at
            .as_deref()
            .and_then(token_ttl)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        Ok((AuthToken { token, project_id }, ttl))
    }
}

/// Remaining lifetime of a token expiring at `expires_at` (RFC 3339)
fn token_ttl(expires_at: &str) -> Option<Duration> {
    let expires: DateTime<Utc> = DateTime::parse_from_rfc3339(expires_at).ok()?.with_timezone(&Utc);
    (expires - Utc::now()).to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_config() -> ProviderConfig {
        ProviderConfig {
            user_name: Some("alice".into()),
            password: Some("pw".into()),
            domain_name: Some("OTC-EU-DE-1".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_credentials() {
        let err = Credentials::from_config(&ProviderConfig::default(), "eu-de", None, OtcHttpClient::new().unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCredentials(_)));

        let token_only = ProviderConfig {
            token: Some("t".into()),
            ..Default::default()
        };
        let err = Credentials::from_config(&token_only, "eu-de", None, OtcHttpClient::new().unwrap())
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCredentials(_)));
    }

    #[test]
    fn test_project_scope_resolution() {
        let http = OtcHttpClient::new().unwrap();
        let creds = Credentials::from_config(&password_config(), "eu-nl", None, http).unwrap();
        match creds.method.as_ref() {
            AuthMethod::Password { scope: ProjectScope::Name(name), .. } => assert_eq!(name, "eu-nl"),
            _ => panic!("expected password auth scoped by name"),
        }
    }

    #[test]
    fn test_token_ttl() {
        let future = (Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
        let ttl = token_ttl(&future).unwrap();
        assert!(ttl > Duration::from_secs(3600));
        assert!(token_ttl("2000-01-01T00:00:00Z").is_none());
        assert!(token_ttl("garbage").is_none());
    }

    #[tokio::test]
    async fn test_token_mode_skips_iam() {
        let config = ProviderConfig {
            token: Some("pre-issued".into()),
            project_id: Some("p-1".into()),
            ..Default::default()
        };
        let creds = Credentials::from_config(&config, "eu-de", None, OtcHttpClient::new().unwrap()).unwrap();
        let token = creds.token().await.unwrap();
        assert_eq!(token.token, "pre-issued");
        assert_eq!(token.project_id, "p-1");
    }
}
