//! HTTP client posting JSON documents to the backend

use super::TokenManager;
use crate::config::{AuthMode, BackendConfig};
use crate::data::ProcessedData;
use crate::error::BackendError;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::time::Duration;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct BackendClient {
    http: reqwest::Client,
    tokens: TokenManager,
    data_url: String,
}

impl BackendClient {
    pub fn new(device_id: &str, config: &BackendConfig) -> Self {
        let http = reqwest::Client::new();
        Self {
            tokens: TokenManager::new(http.clone(), device_id, config),
            http,
            data_url: config.data_url.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn tokens_mut(&mut self) -> &mut TokenManager {
        &mut self.tokens
    }

    async fn post(
        &self,
        url: &str,
        json: &str,
        token: Option<&str>,
    ) -> Result<reqwest::Response, BackendError> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(REQUEST_TIMEOUT)
            .body(json.to_string());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    /// POST without credentials, returning the response body
    pub async fn send_json_plain(&self, url: &str, json: &str) -> Result<String, BackendError> {
        let response = self.post(url, json, None).await?;
        into_body(response).await
    }

    /// POST with the bearer token; a rejected token is refreshed and the
    /// request retried once
    pub async fn send_json_authenticated(
        &mut self,
        url: &str,
        json: &str,
    ) -> Result<String, BackendError> {
        let token = self.tokens.token().await?;
        let response = self.post(url, json, token.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED || self.tokens.mode() == AuthMode::None {
            return into_body(response).await;
        }

        tracing::warn!("Token rejected by backend, re-authenticating");
        self.tokens.invalidate();
        let token = self.tokens.token().await?;
        let response = self.post(url, json, token.as_deref()).await?;
        into_body(response).await
    }

    /// Deliver one document to the data endpoint
    pub async fn send(&mut self, data: &ProcessedData) -> Result<String, BackendError> {
        let url = self.data_url.clone();
        match self.tokens.mode() {
            AuthMode::None => self.send_json_plain(&url, data.as_str()).await,
            _ => self.send_json_authenticated(&url, data.as_str()).await,
        }
    }
}

async fn into_body(response: reqwest::Response) -> Result<String, BackendError> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        Ok(body)
    } else {
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::echo::{spawn_scripted, Response};
    use crate::data::SensorMessage;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn config(mode: AuthMode, base: &str) -> BackendConfig {
        BackendConfig {
            data_url: format!("{}/data", base),
            auth_url: format!("{}/auth", base),
            auth_mode: mode,
            secret: Some("hunter2".to_string()),
            ..BackendConfig::default()
        }
    }

    fn document() -> ProcessedData {
        let mut msg = SensorMessage::new();
        msg.set_heart_rate(72);
        msg.render("SENTINEL-001", 1_700_000_000_000).unwrap()
    }

    #[tokio::test]
    async fn test_plain_post() {
        let (addr, mut requests) = spawn_scripted(|_| Response::ok()).await;
        let base = format!("http://{}", addr);
        let mut client = BackendClient::new("SENTINEL-001", &config(AuthMode::None, &base));

        let doc = document();
        assert_eq!(client.send(&doc).await.unwrap(), "OK");

        let request = requests.recv().await.unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/data");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert!(request.header("authorization").is_none());
        assert_eq!(request.body, doc.as_str());
    }

    #[tokio::test]
    async fn test_error_status() {
        let (addr, _requests) = spawn_scripted(|_| Response::new(500, "boom")).await;
        let base = format!("http://{}", addr);
        let client = BackendClient::new("dev", &config(AuthMode::None, &base));

        let err = client
            .send_json_plain(&format!("{}/data", base), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 500, ref body } if body == "boom"));
    }

    #[tokio::test]
    async fn test_rejected_token_retried_once() {
        let issued = Arc::new(AtomicU32::new(0));
        let counter = issued.clone();
        let (addr, mut requests) = spawn_scripted(move |request| {
            if request.path == "/auth" {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                return Response::new(200, format!(r#"{{"token":"t{}"}}"#, n));
            }
            // only the second token is accepted
            match request.header("authorization") {
                Some("Bearer t2") => Response::ok(),
                _ => Response::new(401, "expired"),
            }
        })
        .await;
        let base = format!("http://{}", addr);
        let mut client = BackendClient::new("dev", &config(AuthMode::Backend, &base));

        assert_eq!(client.send(&document()).await.unwrap(), "OK");
        assert_eq!(issued.load(Ordering::SeqCst), 2);

        let paths: Vec<String> = std::iter::from_fn(|| requests.try_recv().ok())
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, ["/auth", "/data", "/auth", "/data"]);
        assert!(!client.tokens_mut().needs_refresh());
    }

    #[tokio::test]
    async fn test_persistent_rejection_surfaces_status() {
        let (addr, _requests) = spawn_scripted(|request| {
            if request.path == "/auth" {
                Response::new(200, r#"{"token":"t"}"#)
            } else {
                Response::new(401, "no")
            }
        })
        .await;
        let base = format!("http://{}", addr);
        let mut client = BackendClient::new("dev", &config(AuthMode::LocalJwt, &base));

        let err = client.send(&document()).await.unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 401, .. }));
    }
}
