//! Bearer tokens for the backend
//!
//! A token is either issued by the backend's auth endpoint in exchange for the
//! device secret, or minted on the device as an HS256 JWT signed with it.

use crate::config::{AuthMode, BackendConfig};
use crate::error::BackendError;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

const AUTH_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct AuthRequest<'a> {
    device_id: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    /// Seconds
    expires_in: Option<u64>,
}

/// Claims of a device-minted token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn new(value: String, lifetime: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + lifetime,
        }
    }

    fn needs_refresh(&self, margin: Duration) -> bool {
        Instant::now() + margin >= self.expires_at
    }
}

pub struct TokenManager {
    http: reqwest::Client,
    mode: AuthMode,
    device_id: String,
    secret: Option<String>,
    auth_url: String,
    timeout: Duration,
    attempts: u32,
    retry_delay: Duration,
    refresh_margin: Duration,
    default_expiry: Duration,
    token: Option<CachedToken>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, device_id: &str, config: &BackendConfig) -> Self {
        Self {
            http,
            mode: config.auth_mode,
            device_id: device_id.to_string(),
            secret: config.secret.clone(),
            auth_url: config.auth_url.clone(),
            timeout: Duration::from_millis(config.auth_timeout_ms),
            attempts: config.auth_retry_attempts.max(1),
            retry_delay: AUTH_RETRY_DELAY,
            refresh_margin: Duration::from_millis(config.token_refresh_margin_ms),
            default_expiry: Duration::from_millis(config.default_token_expiry_ms),
            token: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// True when there is no token or it expires within the refresh margin
    pub fn needs_refresh(&self) -> bool {
        self.token
            .as_ref()
            .map_or(true, |t| t.needs_refresh(self.refresh_margin))
    }

    /// Drop the cached token, e.g. after the backend rejected it
    pub fn invalidate(&mut self) {
        if self.token.take().is_some() {
            tracing::debug!("Cached token invalidated");
        }
    }

    /// Current token, refreshing it first when needed. `None` when auth is off.
    pub async fn token(&mut self) -> Result<Option<String>, BackendError> {
        if self.mode == AuthMode::None {
            return Ok(None);
        }

        if self.needs_refresh() {
            let secret = self
                .secret
                .clone()
                .ok_or(BackendError::MissingSecret(mode_name(self.mode)))?;
            let token = match self.mode {
                AuthMode::LocalJwt => self.mint_local(&secret)?,
                _ => self.fetch_from_backend(&secret).await?,
            };
            self.token = Some(token);
        }

        Ok(self.token.as_ref().map(|t| t.value.clone()))
    }

    fn mint_local(&self, secret: &str) -> Result<CachedToken, BackendError> {
        let iat = chrono::Utc::now().timestamp() as usize;
        let claims = DeviceClaims {
            sub: self.device_id.clone(),
            iat,
            exp: iat + self.default_expiry.as_secs() as usize,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )?;
        tracing::info!("Minted local token for {}", self.device_id);
        Ok(CachedToken::new(token, self.default_expiry))
    }

    async fn fetch_from_backend(&self, secret: &str) -> Result<CachedToken, BackendError> {
        let mut reason = String::new();
        for attempt in 1..=self.attempts {
            tracing::info!(
                "Requesting token from backend (attempt {}/{})",
                attempt,
                self.attempts
            );
            match self.request_token(secret).await {
                Ok(token) => {
                    tracing::info!("Authenticated with backend");
                    return Ok(token);
                }
                Err(e) => {
                    tracing::warn!("Authentication attempt {} failed: {}", attempt, e);
                    reason = e.to_string();
                }
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(BackendError::Auth {
            attempts: self.attempts,
            reason,
        })
    }

    async fn request_token(&self, secret: &str) -> Result<CachedToken, BackendError> {
        let response = self
            .http
            .post(&self.auth_url)
            .timeout(self.timeout)
            .json(&AuthRequest {
                device_id: &self.device_id,
                secret,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let auth: AuthResponse = response.json().await?;
        let lifetime = auth
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(self.default_expiry);
        Ok(CachedToken::new(auth.token, lifetime))
    }
}

fn mode_name(mode: AuthMode) -> &'static str {
    match mode {
        AuthMode::None => "none",
        AuthMode::Backend => "backend",
        AuthMode::LocalJwt => "local_jwt",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::echo::{spawn_scripted, Response};
    use jsonwebtoken::{decode, DecodingKey, Validation};

    fn backend_config(mode: AuthMode, auth_url: String) -> BackendConfig {
        BackendConfig {
            auth_mode: mode,
            auth_url,
            secret: Some("hunter2".to_string()),
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_auth_off_has_no_token() {
        let config = backend_config(AuthMode::None, String::new());
        let mut tokens = TokenManager::new(reqwest::Client::new(), "dev", &config);
        assert_eq!(tokens.token().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let mut config = backend_config(AuthMode::LocalJwt, String::new());
        config.secret = None;
        let mut tokens = TokenManager::new(reqwest::Client::new(), "dev", &config);
        assert!(matches!(
            tokens.token().await,
            Err(BackendError::MissingSecret("local_jwt"))
        ));
    }

    #[tokio::test]
    async fn test_local_jwt_claims() {
        let config = backend_config(AuthMode::LocalJwt, String::new());
        let mut tokens = TokenManager::new(reqwest::Client::new(), "SENTINEL-001", &config);

        let token = tokens.token().await.unwrap().unwrap();
        let decoded = decode::<DeviceClaims>(
            &token,
            &DecodingKey::from_secret(b"hunter2"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(decoded.claims.sub, "SENTINEL-001");
        assert_eq!(decoded.claims.exp - decoded.claims.iat, 3600);

        // cached until close to expiry
        assert!(!tokens.needs_refresh());
        assert_eq!(tokens.token().await.unwrap().unwrap(), token);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_inside_margin() {
        let config = backend_config(AuthMode::LocalJwt, String::new());
        let mut tokens = TokenManager::new(reqwest::Client::new(), "dev", &config);
        tokens.token().await.unwrap();

        tokio::time::advance(Duration::from_millis(
            config.default_token_expiry_ms - config.token_refresh_margin_ms - 1000,
        ))
        .await;
        assert!(!tokens.needs_refresh());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(tokens.needs_refresh());
        tokens.token().await.unwrap();
        assert!(!tokens.needs_refresh());
    }

    #[tokio::test]
    async fn test_backend_token_and_invalidate() {
        let (addr, mut requests) = spawn_scripted(|_| {
            Response::new(200, r#"{"token":"abc","expires_in":600}"#)
        })
        .await;
        let config = backend_config(AuthMode::Backend, format!("http://{}/auth", addr));
        let mut tokens = TokenManager::new(reqwest::Client::new(), "SENTINEL-001", &config);

        assert_eq!(tokens.token().await.unwrap().as_deref(), Some("abc"));
        let request = requests.recv().await.unwrap();
        assert_eq!(request.path, "/auth");
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["device_id"], "SENTINEL-001");
        assert_eq!(body["secret"], "hunter2");

        tokens.token().await.unwrap();
        assert!(requests.try_recv().is_err());

        tokens.invalidate();
        tokens.token().await.unwrap();
        assert!(requests.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_backend_gives_up_after_attempts() {
        let (addr, mut requests) = spawn_scripted(|_| Response::new(500, "down")).await;
        let config = backend_config(AuthMode::Backend, format!("http://{}/auth", addr));
        let mut tokens = TokenManager::new(reqwest::Client::new(), "dev", &config)
            .with_retry_delay(Duration::ZERO);

        let err = tokens.token().await.unwrap_err();
        assert!(matches!(err, BackendError::Auth { attempts: 3, .. }));
        for _ in 0..3 {
            assert!(requests.recv().await.is_some());
        }
        assert!(tokens.needs_refresh());
    }
}
