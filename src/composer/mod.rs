//! Composer stage: background footage, narration, captions and article
//! images rendered into one vertical video.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use std::path::{Path, PathBuf};

pub mod ffmpeg;
pub mod images;
pub mod plan;

use crate::config::ComposerConfig;
use crate::error::{Classify, ErrorCategory};
use crate::media::{MediaInspector, ProbeError, ToolError};
use crate::records::{ArticleRecord, AudioAsset, RenderedVideo, SubtitleTrack};
use crate::workspace::{staging_file, JobDir, WorkspaceError};

pub use ffmpeg::FfmpegRenderer;
pub use images::HttpImageFetcher;
pub use plan::{ImageWindow, RenderPlan};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    /// Render `plan` into `output`
    async fn render(&self, plan: &RenderPlan, output: &Path) -> Result<(), ToolError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Download what it can of `urls` into `dir`, in order, skipping failures
    async fn fetch(&self, urls: &[String], dir: &Path) -> Vec<PathBuf>;
}

#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("background footage not found at {0}")]
    MissingBackground(PathBuf),

    #[error("background footage is unreadable: {0}")]
    BackgroundUnreadable(String),

    #[error("narration audio is corrupt or unreadable: {0}")]
    CorruptAudio(String),

    #[error("caption {index} ({start:.3}s..{end:.3}s) is outside the video (0..{duration:.3}s)")]
    SubtitleOutOfBounds {
        index: usize,
        start: f64,
        end: f64,
        duration: f64,
    },

    #[error("rendering failed: {0}")]
    Render(#[from] ToolError),

    #[error("rendered video is {rendered:.3}s, shorter than the {audio:.3}s narration")]
    ClippedAudio { rendered: f64, audio: f64 },

    #[error("rendered video is {rendered:.3}s, longer than the planned {planned:.3}s")]
    PaddedRender { rendered: f64, planned: f64 },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for ComposeError {
    fn category(&self) -> ErrorCategory {
        match self {
            ComposeError::MissingBackground(_) | ComposeError::BackgroundUnreadable(_) => {
                ErrorCategory::Permanent
            }
            ComposeError::CorruptAudio(_) => ErrorCategory::Invariant,
            ComposeError::SubtitleOutOfBounds { .. }
            | ComposeError::ClippedAudio { .. }
            | ComposeError::PaddedRender { .. } => ErrorCategory::Invariant,
            ComposeError::Render(ToolError::Timeout { .. }) => ErrorCategory::Transient,
            ComposeError::Render(_) => ErrorCategory::Permanent,
            ComposeError::Workspace(e) => e.category(),
            ComposeError::Io(_) => ErrorCategory::Permanent,
        }
    }
}

pub struct Composer {
    renderer: Box<dyn VideoRenderer>,
    inspector: Box<dyn MediaInspector>,
    fetcher: Box<dyn ImageFetcher>,
    config: ComposerConfig,
}

impl Composer {
    pub fn new(
        renderer: Box<dyn VideoRenderer>,
        inspector: Box<dyn MediaInspector>,
        fetcher: Box<dyn ImageFetcher>,
        config: ComposerConfig,
    ) -> Self {
        Self {
            renderer,
            inspector,
            fetcher,
            config,
        }
    }

    /// Render the job's video and write `video.json`
    pub async fn run(&self, job: &JobDir) -> Result<RenderedVideo, ComposeError> {
        let article = job.load::<ArticleRecord>()?;
        let audio = job.load::<AudioAsset>()?;
        let track = job.load::<SubtitleTrack>()?;

        if !self.config.background.is_file() {
            return Err(ComposeError::MissingBackground(self.config.background.clone()));
        }

        let audio_secs = self.audio_duration(&audio).await?;
        let background_secs = self.background_duration().await?;

        let duration = plan::output_duration(audio_secs, self.config.min_duration_secs, self.config.fps);
        if let Some((index, segment)) = plan::out_of_bounds(&track, duration) {
            return Err(ComposeError::SubtitleOutOfBounds {
                index,
                start: segment.start,
                end: segment.end,
                duration,
            });
        }

        let image_dir = tempfile::Builder::new().prefix("holocron-images-").tempdir()?;
        let urls: Vec<String> = article
            .image_urls
            .iter()
            .take(self.config.max_images)
            .cloned()
            .collect();
        let image_paths = if urls.is_empty() {
            Vec::new()
        } else {
            self.fetcher.fetch(&urls, image_dir.path()).await
        };
        tracing::info!("Using {} of {} images for '{}'", image_paths.len(), urls.len(), job.id);

        let (background_offset, loop_background) =
            plan::background_start(background_secs, duration, rand::rng().random::<f64>());

        let render_plan = RenderPlan {
            title: article.title.clone(),
            background: self.config.background.clone(),
            audio: audio.path.clone(),
            duration_secs: duration,
            background_offset,
            loop_background,
            images: plan::image_windows(image_paths, duration),
            captions: track.segments.clone(),
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            font: self.config.font.clone(),
        };

        self.render(job, &render_plan, audio_secs).await
    }

    async fn audio_duration(&self, audio: &AudioAsset) -> Result<f64, ComposeError> {
        let info = self
            .inspector
            .probe(&audio.path)
            .await
            .map_err(|e| match e {
                ProbeError::Tool(tool @ ToolError::NotFound { .. }) => ComposeError::Render(tool),
                other => ComposeError::CorruptAudio(other.to_string()),
            })?;

        if !info.has_audio || !info.duration_secs.is_finite() || info.duration_secs <= 0.0 {
            return Err(ComposeError::CorruptAudio(format!(
                "{} has no playable audio",
                audio.path.display()
            )));
        }
        Ok(info.duration_secs)
    }

    async fn background_duration(&self) -> Result<f64, ComposeError> {
        let info = self
            .inspector
            .probe(&self.config.background)
            .await
            .map_err(|e| match e {
                ProbeError::Tool(tool @ ToolError::NotFound { .. }) => ComposeError::Render(tool),
                other => ComposeError::BackgroundUnreadable(other.to_string()),
            })?;

        if !info.has_video || !info.duration_secs.is_finite() || info.duration_secs <= 0.0 {
            return Err(ComposeError::BackgroundUnreadable(format!(
                "{} has no video stream",
                self.config.background.display()
            )));
        }
        Ok(info.duration_secs)
    }

    async fn render(&self, job: &JobDir, plan: &RenderPlan, audio_secs: f64) -> Result<RenderedVideo, ComposeError> {
        let target = job.video_file();
        let staging = staging_file(&target)?;

        tracing::info!(
            "Rendering {:.2}s video for '{}' (background from {:.2}s{})",
            plan.duration_secs,
            job.id,
            plan.background_offset,
            if plan.loop_background { ", looped" } else { "" }
        );
        self.renderer.render(plan, staging.path()).await?;

        let info = self
            .inspector
            .probe(staging.path())
            .await
            .map_err(|e| ComposeError::Render(ToolError::Failed {
                program: "renderer".to_string(),
                status: "unreadable output".to_string(),
                stderr: e.to_string(),
            }))?;

        let frame = 1.0 / f64::from(plan.fps.max(1));
        if !info.has_audio || info.duration_secs + frame < audio_secs {
            return Err(ComposeError::ClippedAudio {
                rendered: info.duration_secs,
                audio: audio_secs,
            });
        }
        if info.duration_secs > plan.duration_secs + frame {
            return Err(ComposeError::PaddedRender {
                rendered: info.duration_secs,
                planned: plan.duration_secs,
            });
        }

        staging.persist(&target).map_err(|e| e.error)?;

        let video = RenderedVideo {
            article_id: job.id.clone(),
            path: target,
            duration_secs: info.duration_secs,
            width: info.width.unwrap_or(plan.width),
            height: info.height.unwrap_or(plan.height),
            fps: plan.fps,
            created_at: Utc::now(),
        };
        job.store(&video)?;

        tracing::info!("Rendered {} ({:.2}s)", video.path.display(), video.duration_secs);
        Ok(video)
    }
}
