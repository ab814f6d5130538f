use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::HostError;
use crate::workspace::write_atomic;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// Refresh this long before the access token actually expires
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Credential persisted between runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub refresh_token: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl StoredToken {
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// File-backed credential store
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<StoredToken>, HostError> {
        if !self.path.is_file() {
            return Ok(None);
        }

        let content = fs_err::read_to_string(&self.path)
            .map_err(|e| HostError::Auth(format!("cannot read stored credential: {}", e)))?;
        let token = serde_json::from_str(&content).map_err(|e| {
            HostError::Auth(format!(
                "stored credential at {} is malformed: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(token))
    }

    pub fn save(&self, token: &StoredToken) -> Result<(), HostError> {
        let json = serde_json::to_vec_pretty(token)
            .map_err(|e| HostError::Auth(format!("cannot encode credential: {}", e)))?;
        write_atomic(&self.path, &json)
            .map_err(|e| HostError::Auth(format!("cannot save credential: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs_err::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Google OAuth2 client for the installed-app code flow
pub struct OAuthClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl OAuthClient {
    pub fn new(http: Client, client_id: String, client_secret: String, redirect_uri: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            redirect_uri,
        }
    }

    /// Consent page the user opens once to authorize uploads
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(UPLOAD_SCOPE)
        )
    }

    /// Trade the code from the consent redirect for a stored credential
    pub async fn exchange_code(&self, code: &str) -> Result<StoredToken, HostError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let token = self.token_request(&params).await?;
        let refresh_token = token.refresh_token.ok_or_else(|| {
            HostError::Auth("authorization server did not return a refresh token".to_string())
        })?;

        Ok(StoredToken {
            refresh_token,
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }

    /// New access token for an existing credential
    pub async fn refresh(&self, token: &StoredToken) -> Result<StoredToken, HostError> {
        let params = [
            ("refresh_token", token.refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let fresh = self.token_request(&params).await?;
        Ok(StoredToken {
            refresh_token: fresh.refresh_token.unwrap_or_else(|| token.refresh_token.clone()),
            access_token: fresh.access_token,
            expires_at: Utc::now() + Duration::seconds(fresh.expires_in),
        })
    }

    /// A usable access token, refreshing and persisting it when it is about to expire
    pub async fn access_token(&self, store: &TokenStore) -> Result<String, HostError> {
        let token = store.load()?.ok_or_else(|| {
            HostError::Auth(format!(
                "no stored credential at {}; run `holocron auth url` first",
                store.path().display()
            ))
        })?;

        if !token.needs_refresh(Utc::now()) {
            return Ok(token.access_token);
        }

        tracing::info!("Refreshing upload access token");
        let fresh = self.refresh(&token).await?;
        store.save(&fresh)?;
        Ok(fresh.access_token)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenResponse, HostError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(params)
            .send()
            .await
            .map_err(|e| HostError::Transient(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<TokenResponse>()
                .await
                .map_err(|e| HostError::Transient(format!("unreadable token response: {}", e)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_token_failure(status.as_u16(), &body))
    }
}

/// `invalid_grant` means the stored credential is dead and needs a new consent
pub fn classify_token_failure(status: u16, body: &str) -> HostError {
    let parsed = serde_json::from_str::<TokenErrorResponse>(body).ok();
    let message = parsed
        .as_ref()
        .map(|e| match &e.error_description {
            Some(description) => format!("{}: {}", e.error, description),
            None => e.error.clone(),
        })
        .unwrap_or_else(|| format!("token endpoint returned {}", status));

    match (status, parsed.as_ref().map(|e| e.error.as_str())) {
        (_, Some("invalid_grant" | "invalid_client" | "unauthorized_client")) => HostError::Auth(message),
        (401 | 403, _) => HostError::Auth(message),
        (429, _) => HostError::Quota {
            message,
            retry_after: None,
        },
        (s, _) if s >= 500 => HostError::Transient(message),
        _ => HostError::Rejected(message),
    }
}
