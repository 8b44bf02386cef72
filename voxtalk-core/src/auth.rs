//! Account endpoints and credential persistence.
//!
//! The backend issues a bearer token pair on login; the access token is
//! attached to every subsequent request and the refresh token trades for a
//! new pair when the access token goes stale. Tokens are kept in a JSON
//! file under the config directory so a restart does not force a re-login.

use serde::{Deserialize, Serialize};

use config::PathManager;

use crate::error::{ClientError, Result};

/// Token pair returned by the account endpoints.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

#[derive(Serialize)]
struct CredentialsBody<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RegisterBody<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

/// Error body shape used by the backend for every rejected request.
#[derive(Deserialize)]
struct ErrorDetail {
    detail: String,
}

async fn error_detail(response: reqwest::Response) -> String {
    let fallback = format!("status {}", response.status());
    match response.text().await {
        Ok(body) => serde_json::from_str::<ErrorDetail>(&body)
            .map(|e| e.detail)
            .unwrap_or(fallback),
        Err(_) => fallback,
    }
}

/// Client for the `/auth` endpoints.
pub struct AuthClient {
    client: reqwest::Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str) -> Self {
        AuthClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Create a new account. The backend logs the account in as part of
    /// registration and returns the token pair; its rejection message
    /// (duplicate username or email) is surfaced verbatim.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Credential> {
        let response = self
            .client
            .post(format!("{}/auth/register", self.base_url))
            .json(&RegisterBody {
                username,
                email,
                password,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::RegistrationFailed(error_detail(response).await));
        }

        Ok(response.json::<Credential>().await?)
    }

    /// Exchange username and password for a token pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let response = self
            .client
            .post(format!("{}/auth/login", self.base_url))
            .json(&CredentialsBody { username, password })
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::InvalidCredentials);
        }
        if !response.status().is_success() {
            return Err(ClientError::Server(error_detail(response).await));
        }

        Ok(response.json::<Credential>().await?)
    }

    /// Trade the refresh token for a fresh pair. A rejected refresh means
    /// the session is over and the user must log in again.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        let response = self
            .client
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&RefreshBody { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Unauthenticated);
        }

        Ok(response.json::<Credential>().await?)
    }

    /// Revoke the refresh token server-side. Best effort: local logout
    /// proceeds even if the backend is unreachable.
    pub async fn logout(&self, refresh_token: &str) {
        let result = self
            .client
            .post(format!("{}/auth/logout", self.base_url))
            .json(&RefreshBody { refresh_token })
            .send()
            .await;
        if let Err(err) = result {
            tracing::warn!("token revocation failed: {}", err);
        }
    }
}

/// On-disk credential storage under the config directory.
pub struct CredentialStore;

impl CredentialStore {
    fn path() -> Result<std::path::PathBuf> {
        PathManager::credential_path()
            .ok_or_else(|| ClientError::Storage("no config directory available".to_string()))
    }

    pub fn load() -> Option<Credential> {
        let path = PathManager::credential_path()?;
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(credential) => Some(credential),
            Err(err) => {
                tracing::warn!("ignoring unreadable credential file: {}", err);
                None
            }
        }
    }

    pub fn save(credential: &Credential) -> Result<()> {
        PathManager::ensure_dirs_exist()
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        let json = serde_json::to_string_pretty(credential)
            .map_err(|e| ClientError::Storage(e.to_string()))?;
        std::fs::write(Self::path()?, json).map_err(|e| ClientError::Storage(e.to_string()))
    }

    pub fn clear() -> Result<()> {
        let path = Self::path()?;
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| ClientError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}
