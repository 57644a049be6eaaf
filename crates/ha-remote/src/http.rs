//! HTTP implementation of the remote state source

use std::time::Duration;

use async_trait::async_trait;
use ha_core::{api, Entity, EntityId, Payload, Snapshot};
use reqwest::{header, Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, trace, warn};
use url::Url;

use crate::{CommandResponse, RemoteError, RemoteResult, RemoteStateSource};

/// Default timeout applied to every request
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Normalize a user-supplied base URL
///
/// A missing scheme defaults to `http://`, and a trailing `/` is removed so
/// API paths can be appended directly.
pub fn normalize_base_url(raw: &str) -> RemoteResult<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidUrl {
            url: raw.to_string(),
            reason: "url is empty".to_string(),
        });
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let url = Url::parse(with_scheme.trim_end_matches('/')).map_err(|e| RemoteError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(RemoteError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(RemoteError::InvalidUrl {
            url: raw.to_string(),
            reason: "url has no host".to_string(),
        });
    }

    Ok(url)
}

/// Remote state source speaking the Home Assistant REST API
///
/// Every request carries `Authorization: Bearer <token>`. The token is
/// held as a secret and never logged.
#[derive(Clone)]
pub struct HttpStateSource {
    client: Client,
    base_url: String,
    token: SecretString,
}

impl std::fmt::Debug for HttpStateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStateSource")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpStateSource {
    /// Create a source without probing the server
    pub fn new(url: &str, token: SecretString, timeout: Duration) -> RemoteResult<Self> {
        let base_url = normalize_base_url(url)?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RemoteError::Network {
                path: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Create a source and validate the token once against `/api/`
    pub async fn connect(url: &str, token: SecretString, timeout: Duration) -> RemoteResult<Self> {
        let source = Self::new(url, token, timeout)?;
        source.validate_token().await?;
        Ok(source)
    }

    /// The normalized base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the token is accepted by the API
    #[instrument(skip(self), fields(url = %self.base_url))]
    pub async fn validate_token(&self) -> RemoteResult<()> {
        match self.get(api::BASE).await {
            Ok(response) if response.status().as_u16() == 200 => {
                debug!("Token accepted");
                Ok(())
            }
            Ok(response) => {
                warn!(status = %response.status(), "Token rejected");
                Err(RemoteError::InvalidToken {
                    url: self.base_url.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> RemoteResult<Response> {
        trace!(path, "GET");
        self.client
            .get(self.endpoint(path))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await
            .map_err(|e| map_send_error(path, &e))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> RemoteResult<T> {
        let response = self.get(path).await?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(path, &e))?;

        if !status.is_success() {
            return Err(RemoteError::Fetch {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| RemoteError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

fn map_send_error(path: &str, error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else {
        RemoteError::Network {
            path: path.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl RemoteStateSource for HttpStateSource {
    #[instrument(skip(self))]
    async fn fetch_all_states(&self) -> RemoteResult<Snapshot> {
        let snapshot: Snapshot = self.get_json(api::STATES).await?;
        debug!(entities = snapshot.len(), "Fetched all states");
        Ok(snapshot)
    }

    #[instrument(skip(self, entity_id), fields(entity_id = %entity_id))]
    async fn fetch_state(&self, entity_id: &EntityId) -> RemoteResult<Entity> {
        self.get_json(&api::state(entity_id)).await
    }

    #[instrument(skip(self, payload))]
    async fn post_command(&self, path: &str, payload: &Payload) -> RemoteResult<CommandResponse> {
        trace!(payload = %payload.to_value(), "POST");
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(self.token.expose_secret())
            .json(payload)
            .send()
            .await
            .map_err(|e| map_send_error(path, &e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| map_send_error(path, &e))?;

        debug!(status, "Service call answered");
        Ok(CommandResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_adds_scheme() {
        let url = normalize_base_url("homeassistant.local:8123").unwrap();
        assert_eq!(url.as_str(), "http://homeassistant.local:8123/");
    }

    #[test]
    fn test_normalize_keeps_https() {
        let url = normalize_base_url("https://ha.example.com/").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("ha.example.com"));
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(matches!(
            normalize_base_url(""),
            Err(RemoteError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_base_url("ftp://files.example.com"),
            Err(RemoteError::InvalidUrl { .. })
        ));
        assert!(matches!(
            normalize_base_url("http://"),
            Err(RemoteError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_base_url_has_no_trailing_slash() {
        let source = HttpStateSource::new(
            "ha.local:8123/",
            SecretString::from("token".to_string()),
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(source.base_url(), "http://ha.local:8123");
        assert!(!format!("{source:?}").contains("token"));
    }
}
