use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::oauth::{OAuthClient, TokenStore};
use super::{HostError, VideoHost, VideoMetadata};
use crate::config::RetryConfig;
use crate::http::parse_retry_after;
use crate::retry::with_retry;

const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";

/// Reasons YouTube reports when a quota or rate limit was hit
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "rateLimitExceeded", "userRateLimitExceeded", "dailyLimitExceeded"];

/// YouTube Data API v3 resumable uploader
pub struct YouTubeUploader {
    session: YouTubeSession,
    retry: RetryConfig,
}

/// Where an open upload session stands
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// The platform accepted the whole file under this id
    Complete(String),
    /// The platform holds bytes up to this offset
    Resume(u64),
}

/// The three calls of the resumable upload protocol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResumableSession: Send + Sync {
    /// Start an upload session and return its URI
    async fn open(&self, metadata: &VideoMetadata, length: u64) -> Result<String, HostError>;

    /// Send `chunk`, which starts at `offset` of a `total`-byte file
    async fn send(&self, session: &str, chunk: &[u8], offset: u64, total: u64) -> Result<SessionState, HostError>;

    /// Ask how much of a `total`-byte file the session already holds
    async fn status(&self, session: &str, total: u64) -> Result<SessionState, HostError>;
}

/// HTTP side of [`ResumableSession`]
pub struct YouTubeSession {
    http: Client,
    oauth: OAuthClient,
    tokens: TokenStore,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: Status<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    category_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Status<'a> {
    privacy_status: &'a str,
    self_declared_made_for_kids: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    id: Option<String>,
    status: Option<UploadStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadStatus {
    upload_status: Option<String>,
    rejection_reason: Option<String>,
    failure_reason: Option<String>,
}

impl YouTubeUploader {
    pub fn new(http: Client, oauth: OAuthClient, tokens: TokenStore, retry: RetryConfig) -> Self {
        Self {
            session: YouTubeSession { http, oauth, tokens },
            retry,
        }
    }
}

#[async_trait]
impl VideoHost for YouTubeUploader {
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, HostError> {
        let bytes = tokio::fs::read(video)
            .await
            .map_err(|e| HostError::Rejected(format!("cannot read {}: {}", video.display(), e)))?;

        upload_resumable(&self.session, &self.retry, metadata, &bytes).await
    }
}

/// Open one session, then send and resume against it until the platform
/// confirms the file. A failed transfer never opens a second session.
pub async fn upload_resumable(
    api: &dyn ResumableSession,
    retry: &RetryConfig,
    metadata: &VideoMetadata,
    bytes: &[u8],
) -> Result<String, HostError> {
    let total = bytes.len() as u64;
    let session = with_retry(retry, "upload session", || api.open(metadata, total)).await?;
    tracing::debug!("Upload session opened for '{}'", metadata.title);

    let session = session.as_str();
    let mut attempted = false;

    with_retry(retry, "video upload", || {
        let resume = std::mem::replace(&mut attempted, true);
        async move {
            let offset = if resume {
                match api.status(session, total).await? {
                    SessionState::Complete(id) => return Ok(id),
                    SessionState::Resume(offset) => offset,
                }
            } else {
                0
            };

            let chunk = usize::try_from(offset)
                .ok()
                .and_then(|start| bytes.get(start..))
                .ok_or_else(|| {
                    HostError::Rejected(format!("platform reports offset {} of a {}-byte file", offset, total))
                })?;

            if resume {
                tracing::info!("Resuming upload at byte {} of {}", offset, total);
            }

            match api.send(session, chunk, offset, total).await? {
                SessionState::Complete(id) => Ok(id),
                SessionState::Resume(held) => Err(HostError::Transient(format!(
                    "upload stopped at byte {} of {}",
                    held, total
                ))),
            }
        }
    })
    .await
}

#[async_trait]
impl ResumableSession for YouTubeSession {
    async fn open(&self, metadata: &VideoMetadata, length: u64) -> Result<String, HostError> {
        let token = self.oauth.access_token(&self.tokens).await?;
        let resource = VideoResource {
            snippet: Snippet {
                title: &metadata.title,
                description: &metadata.description,
                tags: &metadata.tags,
                category_id: &metadata.category_id,
            },
            status: Status {
                privacy_status: metadata.privacy.as_str(),
                self_declared_made_for_kids: false,
            },
        };

        let response = self
            .http
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .bearer_auth(&token)
            .header("X-Upload-Content-Type", "video/mp4")
            .header("X-Upload-Content-Length", length.to_string())
            .json(&resource)
            .send()
            .await
            .map_err(transport_failure)?;

        let response = ensure_success(response).await?;
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| HostError::Transient("upload session has no Location header".to_string()))
    }

    async fn send(&self, session: &str, chunk: &[u8], offset: u64, total: u64) -> Result<SessionState, HostError> {
        let token = self.oauth.access_token(&self.tokens).await?;
        let mut request = self
            .http
            .put(session)
            .bearer_auth(&token)
            .header(header::CONTENT_TYPE, "video/mp4")
            .header(header::CONTENT_LENGTH, chunk.len().to_string());
        if total > 0 {
            request = request.header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", offset, total - 1, total),
            );
        }

        let response = request
            .body(chunk.to_vec())
            .send()
            .await
            .map_err(transport_failure)?;
        session_state(response).await
    }

    async fn status(&self, session: &str, total: u64) -> Result<SessionState, HostError> {
        let token = self.oauth.access_token(&self.tokens).await?;
        let response = self
            .http
            .put(session)
            .bearer_auth(&token)
            .header(header::CONTENT_LENGTH, "0")
            .header(header::CONTENT_RANGE, format!("bytes */{}", total))
            .send()
            .await
            .map_err(transport_failure)?;
        session_state(response).await
    }
}

/// 308 means incomplete, with the held range in `Range`; 2xx carries the video
async fn session_state(response: Response) -> Result<SessionState, HostError> {
    if response.status() == StatusCode::PERMANENT_REDIRECT {
        let range = response.headers().get(header::RANGE).and_then(|v| v.to_str().ok());
        return Ok(SessionState::Resume(next_offset(range)));
    }

    let response = ensure_success(response).await?;
    let body: UploadResponse = response
        .json()
        .await
        .map_err(|e| HostError::Transient(format!("unreadable upload response: {}", e)))?;

    confirmed_id(body).map(SessionState::Complete)
}

/// First byte the session does not hold yet, from a `Range: bytes=0-N` header
pub fn next_offset(range: Option<&str>) -> u64 {
    range
        .and_then(|r| r.trim().strip_prefix("bytes="))
        .and_then(|r| r.split('-').nth(1))
        .and_then(|last| last.trim().parse::<u64>().ok())
        .map_or(0, |last| last + 1)
}

fn transport_failure(err: reqwest::Error) -> HostError {
    HostError::Transient(format!("upload request failed: {}", err))
}

async fn ensure_success(response: Response) -> Result<Response, HostError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(status.as_u16(), &body, retry_after))
}

/// Map an error response from the upload API onto the failure taxonomy
pub fn classify_failure(status: u16, body: &str, retry_after: Option<std::time::Duration>) -> HostError {
    let error: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    let message = error
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload API returned {}", status));

    let reasons: Vec<&str> = error
        .pointer("/error/errors")
        .and_then(|e| e.as_array())
        .map(|errors| errors.iter().filter_map(|e| e["reason"].as_str()).collect())
        .unwrap_or_default();
    let quota_hit = reasons.iter().any(|r| QUOTA_REASONS.contains(r));

    match status {
        401 => HostError::Auth(message),
        429 => HostError::Quota { message, retry_after },
        403 if quota_hit => HostError::Quota { message, retry_after },
        408 => HostError::Transient(message),
        s if s >= 500 => HostError::Transient(message),
        _ => HostError::Rejected(message),
    }
}

/// Platform id, but only once the platform has accepted the upload
fn confirmed_id(body: UploadResponse) -> Result<String, HostError> {
    if let Some(status) = &body.status {
        if let Some(state @ ("rejected" | "failed")) = status.upload_status.as_deref() {
            let reason = status
                .rejection_reason
                .as_deref()
                .or(status.failure_reason.as_deref())
                .unwrap_or("no reason given");
            return Err(HostError::Rejected(format!("upload {}: {}", state, reason)));
        }
    }

    body.id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HostError::Rejected("upload finished without a video id".to_string()))
}
