//! HTTP utilities for OTC REST API calls

use crate::error::{ApiError, Error, Result};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Header carrying the IAM token
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Truncate long bodies and strip control characters before logging
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A successful response, before JSON decoding
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Decode the body; an empty body is `null`
    pub fn json(&self) -> Result<Value> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| Error::decode("response body", e))
    }
}

/// HTTP client wrapper for OTC API calls
#[derive(Clone)]
pub struct OtcHttpClient {
    client: Client,
}

impl OtcHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tfotc/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Send a request; non-2xx statuses become [`Error::Api`]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<RawResponse> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|source| Error::Network {
            url: url.to_string(),
            source,
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(|source| Error::Network {
            url: url.to_string(),
            source,
        })?;

        if !status.is_success() {
            // 404s are routine during reads and delete waits
            if status.as_u16() == 404 {
                tracing::debug!("{} {} -> 404 - {}", method, url, sanitize_for_log(&body));
            } else {
                tracing::warn!("API error: {} {} -> {} - {}", method, url, status, sanitize_for_log(&body));
            }
            return Err(Error::Api(ApiError::from_response(
                method.as_str(),
                url,
                status.as_u16(),
                &body,
            )));
        }

        tracing::trace!("{} {} -> {} - {}", method, url, status, sanitize_for_log(&body));

        Ok(RawResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    /// Send a request and decode the JSON response
    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Value> {
        self.request(method, url, token, body).await?.json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let out = sanitize_for_log(&body);
        assert!(out.starts_with(&"x".repeat(200)));
        assert!(out.contains("500 bytes total"));
    }

    #[test]
    fn test_sanitize_respects_char_boundaries() {
        let body = format!("{}é{}", "a".repeat(199), "b".repeat(100));
        let out = sanitize_for_log(&body);
        assert!(out.contains("truncated"));
    }

    #[test]
    fn test_sanitize_strips_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\tc"), "abc");
    }

    #[test]
    fn test_empty_body_is_null() {
        let raw = RawResponse {
            status: 204,
            headers: HeaderMap::new(),
            body: String::new(),
        };
        assert_eq!(raw.json().unwrap(), Value::Null);
    }
}
