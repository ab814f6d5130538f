//! Typed contracts handed from one stage to the next.
//!
//! Every record is persisted as JSON inside a job directory and validated
//! when it is loaded, so a stage never trusts its input blindly.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::{normalize_whitespace, word_count};

/// Slack allowed when comparing floating point timings
pub const TIMING_EPSILON: f64 = 1e-6;

/// Validation of a record at a stage boundary
pub trait Validate {
    fn validate(&self) -> std::result::Result<(), String>;
}

/// A record that lives in a fixed file inside a job directory
pub trait StageRecord: Serialize + DeserializeOwned + Validate {
    /// File name inside the job directory
    const FILE: &'static str;

    /// Human-readable name used in errors
    const NAME: &'static str;
}

/// One named section of an article body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleSection {
    pub heading: String,
    pub text: String,
}

/// One scraped source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Unique identifier in the knowledge source (the page title)
    pub id: String,

    /// Display title
    pub title: String,

    /// Canonical page URL
    pub url: String,

    /// Body text, sections joined
    pub body: String,

    /// Body broken down by section
    pub sections: Vec<ArticleSection>,

    /// Flattened infobox (`key: value; ...`), if the page had one
    pub infobox: Option<String>,

    /// Works the subject appears in
    pub appearances: Vec<String>,

    /// Image URLs in article order
    pub image_urls: Vec<String>,

    /// All category tags of the page
    pub categories: Vec<String>,

    /// Category chosen to file the job under
    pub category: String,

    /// When the collector picked the article
    pub collected_at: DateTime<Utc>,
}

impl ArticleRecord {
    /// Text handed to the generative-text service
    pub fn narration_source(&self) -> String {
        let mut parts = vec![format!("Title: {}", self.title)];

        for section in &self.sections {
            parts.push(format!("{}: {}", section.heading, section.text));
        }

        if let Some(infobox) = &self.infobox {
            parts.push(format!("Table: {}", infobox));
        }

        if !self.appearances.is_empty() {
            parts.push(format!("Appearances: {}", self.appearances.join(", ")));
        }

        parts.join("\n")
    }
}

impl Validate for ArticleRecord {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("article id is empty".to_string());
        }
        if self.body.trim().is_empty() {
            return Err(format!("article '{}' has no body text", self.id));
        }
        Ok(())
    }
}

impl StageRecord for ArticleRecord {
    const FILE: &'static str = "article.json";
    const NAME: &'static str = "article record";
}

/// Narration text produced from an article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub article_id: String,
    pub text: String,
    pub word_count: usize,
    pub word_limit: usize,

    /// Number of generation requests it took
    pub attempts: u32,

    /// Whether the text was cut down locally to fit the limit
    pub truncated: bool,
    pub created_at: DateTime<Utc>,
}

impl Validate for Script {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("script text is empty".to_string());
        }
        let actual = word_count(&self.text);
        if actual != self.word_count {
            return Err(format!(
                "script word count mismatch: recorded {}, actual {}",
                self.word_count, actual
            ));
        }
        if actual > self.word_limit {
            return Err(format!(
                "script has {} words, limit is {}",
                actual, self.word_limit
            ));
        }
        Ok(())
    }
}

impl StageRecord for Script {
    const FILE: &'static str = "script.json";
    const NAME: &'static str = "script";
}

/// Synthesized voice track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAsset {
    pub article_id: String,
    pub path: PathBuf,
    pub duration_secs: f64,
    /// Voice name used for synthesis
    pub voice: String,
    pub created_at: DateTime<Utc>,
}

impl Validate for AudioAsset {
    fn validate(&self) -> std::result::Result<(), String> {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(format!("audio duration {} is not positive", self.duration_secs));
        }
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() > 0 => Ok(()),
            Ok(_) => Err(format!("audio file {} is empty", self.path.display())),
            Err(e) => Err(format!("audio file {} is unreadable: {}", self.path.display(), e)),
        }
    }
}

impl StageRecord for AudioAsset {
    const FILE: &'static str = "audio.json";
    const NAME: &'static str = "audio asset";
}

/// One caption and the window it is visible in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    /// Start time in seconds
    pub start: f64,
    /// End time in seconds (exclusive)
    pub end: f64,
    pub text: String,
}

/// Words whose timing came from even division instead of the aligner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackSpan {
    pub first_word: usize,
    pub last_word: usize,
    pub start: f64,
    pub end: f64,
}

/// Timed captions for one audio asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub article_id: String,
    pub audio_duration_secs: f64,
    pub segments: Vec<SubtitleSegment>,
    #[serde(default)]
    pub fallback_spans: Vec<FallbackSpan>,
}

impl SubtitleTrack {
    /// Segment texts joined with single spaces
    pub fn text(&self) -> String {
        let joined = self
            .segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        normalize_whitespace(&joined)
    }

    /// End of the last caption, or zero for an empty track
    pub fn end_time(&self) -> f64 {
        self.segments.last().map(|s| s.end).unwrap_or(0.0)
    }
}

impl Validate for SubtitleTrack {
    fn validate(&self) -> std::result::Result<(), String> {
        let mut previous_end = 0.0_f64;
        for (index, segment) in self.segments.iter().enumerate() {
            if !(segment.start.is_finite() && segment.end.is_finite()) {
                return Err(format!("segment {} has non-finite timing", index));
            }
            if segment.start < -TIMING_EPSILON || segment.start > segment.end + TIMING_EPSILON {
                return Err(format!(
                    "segment {} has invalid window {:.3}..{:.3}",
                    index, segment.start, segment.end
                ));
            }
            if segment.end > self.audio_duration_secs + TIMING_EPSILON {
                return Err(format!(
                    "segment {} ends at {:.3}s, past the audio end {:.3}s",
                    index, segment.end, self.audio_duration_secs
                ));
            }
            if segment.start + TIMING_EPSILON < previous_end {
                return Err(format!(
                    "segment {} starts at {:.3}s before the previous one ends at {:.3}s",
                    index, segment.start, previous_end
                ));
            }
            previous_end = segment.end;
        }
        Ok(())
    }
}

impl StageRecord for SubtitleTrack {
    const FILE: &'static str = "subtitles.json";
    const NAME: &'static str = "subtitle track";
}

/// Final output media
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedVideo {
    pub article_id: String,
    pub path: PathBuf,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub created_at: DateTime<Utc>,
}

impl Validate for RenderedVideo {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.duration_secs <= 0.0 {
            return Err("video duration is not positive".to_string());
        }
        if !self.path.is_file() {
            return Err(format!("video file {} is missing", self.path.display()));
        }
        Ok(())
    }
}

impl StageRecord for RenderedVideo {
    const FILE: &'static str = "video.json";
    const NAME: &'static str = "rendered video";
}

/// Visibility of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Unlisted => "unlisted",
            Privacy::Private => "private",
        }
    }
}

/// Result of a confirmed publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub article_id: String,
    /// Platform-assigned identifier
    pub video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy: Privacy,
    /// SHA-256 of the uploaded file
    pub content_hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl Validate for UploadRecord {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.video_id.is_empty() {
            return Err("upload record has no platform id".to_string());
        }
        Ok(())
    }
}

impl StageRecord for UploadRecord {
    const FILE: &'static str = "upload.json";
    const NAME: &'static str = "upload record";
}
