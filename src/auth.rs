//! Credential provider
//!
//! Two mutually exclusive strategies produce the `Authorization` header:
//! a static personal access token, or a GitHub App installation token that
//! is minted from a signed JWT and refreshed once it expires.

use crate::config::{AuthConfig, DeployConfig};
use crate::error::{DeployError, Result};
use crate::github::{read_json, send, JSON_ACCEPT};
use crate::types::{AppInfo, AuthMode, Credential, Installation, InstallationToken};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Validity assumed for a static token, it never actually changes.
const STATIC_TOKEN_VALIDITY_SECS: i64 = 3600;
/// Backdated `iat` to tolerate clock drift between us and GitHub.
const JWT_CLOCK_SKEW_SECS: i64 = 30;
const JWT_LIFETIME_SECS: i64 = 300;
/// Refresh this long before the server-declared expiry.
const REFRESH_MARGIN_SECS: i64 = 30;

#[derive(Debug, Clone)]
enum AuthStrategy {
    Token(String),
    App {
        app_id: u64,
        private_key: PathBuf,
        account: String,
    },
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: u64,
}

pub struct CredentialProvider {
    strategy: AuthStrategy,
    cached: Mutex<Option<Credential>>,
}

impl CredentialProvider {
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::with_strategy(AuthStrategy::Token(token.into()))
    }

    /// `account` is the login the app must be installed on.
    pub fn installed_app(app_id: u64, private_key: impl Into<PathBuf>, account: impl Into<String>) -> Self {
        Self::with_strategy(AuthStrategy::App {
            app_id,
            private_key: private_key.into(),
            account: account.into(),
        })
    }

    pub fn from_config(config: &DeployConfig) -> Self {
        match &config.auth {
            AuthConfig::Token(token) => Self::static_token(token.clone()),
            AuthConfig::App {
                private_key,
                app_id,
            } => Self::installed_app(*app_id, private_key.clone(), config.username.clone()),
        }
    }

    fn with_strategy(strategy: AuthStrategy) -> Self {
        Self {
            strategy,
            cached: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> AuthMode {
        match self.strategy {
            AuthStrategy::Token(_) => AuthMode::StaticToken,
            AuthStrategy::App { .. } => AuthMode::InstalledApp,
        }
    }

    /// Current header value, refreshed first when absent or expired.
    pub async fn authorization_header(&self, http: &reqwest::Client, api_url: &str) -> Result<String> {
        let mut cached = self.cached.lock().await;

        let now = Utc::now();
        if let Some(credential) = cached.as_ref() {
            if !credential.is_expired(now, Duration::seconds(REFRESH_MARGIN_SECS)) {
                return Ok(credential.value.clone());
            }
            tracing::debug!("Cached credential expired at {}, refreshing", credential.expires_at);
        }

        let credential = self.refresh(http, api_url, now).await?;
        let value = credential.value.clone();
        *cached = Some(credential);
        Ok(value)
    }

    async fn refresh(&self, http: &reqwest::Client, api_url: &str, now: DateTime<Utc>) -> Result<Credential> {
        match &self.strategy {
            AuthStrategy::Token(token) => Ok(Credential {
                value: format!("token {}", token),
                expires_at: now + Duration::seconds(STATIC_TOKEN_VALIDITY_SECS),
                mode: AuthMode::StaticToken,
            }),
            AuthStrategy::App {
                app_id,
                private_key,
                account,
            } => {
                let pem = read_private_key(private_key)?;
                let jwt = app_jwt(*app_id, &pem, now)?;
                let token = exchange_installation_token(http, api_url, &jwt, account).await?;
                tracing::info!(
                    "Obtained installation token for {} (expires {})",
                    account,
                    token.expires_at
                );
                Ok(Credential {
                    value: format!("token {}", token.token),
                    expires_at: token.expires_at,
                    mode: AuthMode::InstalledApp,
                })
            }
        }
    }
}

pub fn read_private_key(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        DeployError::Auth(format!(
            "Private Key not found in: {} ({})",
            path.display(),
            e
        ))
    })
}

/// Sign the short-lived JWT that identifies the app itself.
pub fn app_jwt(app_id: u64, private_key_pem: &[u8], now: DateTime<Utc>) -> Result<String> {
    let claims = AppClaims {
        iat: (now - Duration::seconds(JWT_CLOCK_SKEW_SECS)).timestamp(),
        exp: (now + Duration::seconds(JWT_LIFETIME_SECS)).timestamp(),
        iss: app_id,
    };

    let key = EncodingKey::from_rsa_pem(private_key_pem)
        .map_err(|e| DeployError::Auth(format!("invalid RSA private key: {}", e)))?;

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| DeployError::Auth(format!("could not sign app JWT: {}", e)))
}

/// Token exchange failures are authentication failures, whatever the cause.
fn as_auth_error(step: &str, err: DeployError) -> DeployError {
    match err {
        DeployError::Http { url, status, body } => {
            DeployError::Auth(format!("{} ({}) returned {}: {}", step, url, status, body))
        }
        other => DeployError::Auth(format!("{}: {}", step, other)),
    }
}

async fn app_get<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
    jwt: &str,
    step: &str,
) -> Result<T> {
    let request = http
        .get(url)
        .header(ACCEPT, JSON_ACCEPT)
        .header(AUTHORIZATION, format!("Bearer {}", jwt));
    let response = send(request, url).await.map_err(|e| as_auth_error(step, e))?;
    read_json(response, url)
        .await
        .map_err(|e| as_auth_error(step, e))?
        .ok_or_else(|| DeployError::Auth(format!("{}: unexpected response from {}", step, url)))
}

async fn exchange_installation_token(
    http: &reqwest::Client,
    api_url: &str,
    jwt: &str,
    account: &str,
) -> Result<InstallationToken> {
    let installations_url = format!("{}/app/installations", api_url);
    let installations: Vec<Installation> =
        app_get(http, &installations_url, jwt, "listing app installations").await?;

    let installation = installations
        .iter()
        .find(|i| {
            i.account
                .as_ref()
                .is_some_and(|a| a.login.eq_ignore_ascii_case(account))
        })
        .ok_or_else(|| {
            DeployError::Auth(format!(
                "app is not installed on account '{}' ({} installation(s) found)",
                account,
                installations.len()
            ))
        })?;

    tracing::debug!("Using installation {} for {}", installation.id, account);

    let token_url = format!("{}/app/installations/{}/access_tokens", api_url, installation.id);
    let request = http
        .post(&token_url)
        .header(ACCEPT, JSON_ACCEPT)
        .header(AUTHORIZATION, format!("Bearer {}", jwt));
    let response = send(request, &token_url)
        .await
        .map_err(|e| as_auth_error("creating installation token", e))?;

    read_json(response, &token_url)
        .await
        .map_err(|e| as_auth_error("creating installation token", e))?
        .ok_or_else(|| DeployError::Auth(format!("unexpected installation token response from {}", token_url)))
}

/// Check that `private_key` is accepted for `app_id` by calling `GET /app`.
pub async fn check_app_key(
    http: &reqwest::Client,
    api_url: &str,
    app_id: u64,
    private_key: &Path,
) -> Result<AppInfo> {
    let pem = read_private_key(private_key)?;
    let jwt = app_jwt(app_id, &pem, Utc::now())?;
    let url = format!("{}/app", api_url.trim_end_matches('/'));
    app_get(http, &url, &jwt, "fetching app").await
}
