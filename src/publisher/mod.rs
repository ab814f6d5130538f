//! Publisher stage: upload the rendered video exactly once.
//!
//! The SHA-256 of the video file is the idempotence key. Before anything is
//! sent, the upload ledger is consulted; a file that was already confirmed
//! by the platform is never uploaded again.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use std::time::Duration;

pub mod oauth;
pub mod youtube;

use crate::config::PublisherConfig;
use crate::error::{Classify, ErrorCategory};
use crate::records::{ArticleRecord, Privacy, RenderedVideo, Script, UploadRecord};
use crate::state::UploadLedger;
use crate::workspace::{JobDir, WorkspaceError};

pub use oauth::{OAuthClient, StoredToken, TokenStore};
pub use youtube::YouTubeUploader;

/// Longest title the platform accepts
const MAX_TITLE_CHARS: usize = 100;

/// Failures reported by the video platform
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("temporary upload failure: {0}")]
    Transient(String),

    #[error("upload quota exhausted: {message}")]
    Quota {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("upload rejected: {0}")]
    Rejected(String),
}

impl Classify for HostError {
    fn category(&self) -> ErrorCategory {
        match self {
            HostError::Auth(_) | HostError::Rejected(_) => ErrorCategory::Permanent,
            HostError::Transient(_) => ErrorCategory::Transient,
            HostError::Quota { .. } => ErrorCategory::RateLimited,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HostError::Quota { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Title, description and tags sent with an upload
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: Privacy,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoHost: Send + Sync {
    /// Upload `video` and return the platform id once the platform confirms it
    async fn upload(&self, video: &Path, metadata: &VideoMetadata) -> Result<String, HostError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("upload ledger error: {0}")]
    Ledger(std::io::Error),

    #[error("cannot hash video: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for PublishError {
    fn category(&self) -> ErrorCategory {
        match self {
            PublishError::Host(e) => e.category(),
            PublishError::Workspace(e) => e.category(),
            PublishError::Ledger(_) | PublishError::Io(_) => ErrorCategory::Permanent,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            PublishError::Host(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub struct Publisher {
    host: Box<dyn VideoHost>,
    config: PublisherConfig,
}

impl Publisher {
    pub fn new(host: Box<dyn VideoHost>, config: PublisherConfig) -> Self {
        Self { host, config }
    }

    /// Upload the job's video unless this exact file was already published
    pub async fn run(&self, job: &JobDir, ledger: &mut UploadLedger) -> Result<UploadRecord, PublishError> {
        if job.has::<UploadRecord>() {
            let record = job.load::<UploadRecord>()?;
            tracing::info!("'{}' is already published as {}", job.id, record.video_id);
            return Ok(record);
        }

        let video = job.load::<RenderedVideo>()?;
        let content_hash = hash_file(&video.path)?;

        if let Some(existing) = ledger.find_by_hash(&content_hash) {
            tracing::info!(
                "Video for '{}' was already uploaded as {}; not uploading again",
                job.id,
                existing.video_id
            );
            let record = existing.clone();
            job.store(&record)?;
            return Ok(record);
        }

        let article = job.load::<ArticleRecord>()?;
        let script = job.load::<Script>()?;
        let metadata = build_metadata(&article, &script, &self.config);

        tracing::info!("Uploading '{}' ({})", metadata.title, metadata.privacy.as_str());
        let video_id = self.host.upload(&video.path, &metadata).await?;

        let record = UploadRecord {
            article_id: article.id.clone(),
            video_id,
            title: metadata.title,
            description: metadata.description,
            tags: metadata.tags,
            privacy: metadata.privacy,
            content_hash,
            uploaded_at: Utc::now(),
        };

        ledger.append(record.clone()).map_err(PublishError::Ledger)?;
        job.store(&record)?;

        tracing::info!("Published '{}' as {}", job.id, record.video_id);
        Ok(record)
    }
}

/// Hex SHA-256 of a file, read in chunks
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs_err::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Upload metadata: the article title, the narration followed by the
/// hashtags, and the category plus hashtags as tags
pub fn build_metadata(article: &ArticleRecord, script: &Script, config: &PublisherConfig) -> VideoMetadata {
    let title: String = article.title.chars().take(MAX_TITLE_CHARS).collect();

    let mut hashtags: Vec<String> = Vec::new();
    for h in &config.hashtags {
        let h = h.trim();
        let tag = if h.starts_with('#') { h.to_string() } else { format!("#{}", h) };
        if tag.len() > 1 && !hashtags.contains(&tag) {
            hashtags.push(tag);
        }
    }

    let description = if hashtags.is_empty() {
        script.text.trim().to_string()
    } else {
        format!("{}\n\n{}", script.text.trim(), hashtags.join(" "))
    };

    let mut tags: Vec<String> = Vec::new();
    let category = article.category.replace('_', " ").to_lowercase();
    for tag in std::iter::once(category).chain(hashtags.iter().map(|h| h.trim_start_matches('#').to_string())) {
        if !tag.trim().is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    VideoMetadata {
        title,
        description,
        tags,
        category_id: config.category_id.clone(),
        privacy: config.privacy,
    }
}
