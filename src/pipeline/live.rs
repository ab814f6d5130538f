use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::StageSet;
use crate::aligner::{Aligner, ExternalAligner};
use crate::collector::{wiki::WikiClient, CollectOutcome, Collector};
use crate::composer::{Composer, FfmpegRenderer, HttpImageFetcher};
use crate::config::{
    env_secret, Config, GEMINI_API_KEY_ENV, TTS_API_KEY_ENV, YOUTUBE_CLIENT_ID_ENV,
    YOUTUBE_CLIENT_SECRET_ENV,
};
use crate::error::{Classify, ErrorCategory, Stage, StageFailure};
use crate::http::build_client;
use crate::media::FfprobeInspector;
use crate::narrator::{GeminiClient, GoogleTts, Narrator};
use crate::publisher::{OAuthClient, Publisher, TokenStore, YouTubeUploader};
use crate::state::{SeenSet, UploadLedger};
use crate::workspace::{JobDir, Workspace};

/// A stage could not be set up from the configuration or environment
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SetupError(pub String);

impl Classify for SetupError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

fn require_secret(var: &str) -> std::result::Result<String, SetupError> {
    env_secret(var).ok_or_else(|| SetupError(format!("environment variable {} is not set", var)))
}

/// Stages wired to the real services and tools
pub struct LiveStages {
    config: Config,
    client: Client,
    workspace: Workspace,
}

impl LiveStages {
    pub fn new(config: Config, workspace: Workspace) -> Result<Self> {
        let client = build_client(&config.http).context("Failed to build HTTP client")?;
        Ok(Self {
            config,
            client,
            workspace,
        })
    }

    fn collector(&self) -> Collector {
        let source = WikiClient::new(
            self.client.clone(),
            self.config.collector.api_url.clone(),
            self.config.retry.clone(),
        );
        Collector::new(Box::new(source), self.config.collector.clone())
    }

    fn narrator(&self) -> std::result::Result<Narrator, SetupError> {
        let gemini_key = require_secret(GEMINI_API_KEY_ENV)?;
        let tts_key = env_secret(TTS_API_KEY_ENV).unwrap_or_else(|| gemini_key.clone());

        let generator = GeminiClient::new(
            self.client.clone(),
            &self.config.narrator,
            gemini_key,
            self.config.retry.clone(),
        );
        let synthesizer = GoogleTts::new(
            self.client.clone(),
            self.config.narrator.tts_url.clone(),
            tts_key,
            self.config.narrator.voice.clone(),
            self.config.retry.clone(),
        );

        Ok(Narrator::new(
            Box::new(generator),
            Box::new(synthesizer),
            Box::new(FfprobeInspector::new(&self.config.tools)),
            self.config.narrator.clone(),
        ))
    }

    fn aligner(&self) -> Aligner {
        Aligner::new(
            Box::new(ExternalAligner::new(&self.config.aligner)),
            self.config.aligner.clone(),
        )
    }

    fn composer(&self) -> Composer {
        let renderer = FfmpegRenderer::new(
            self.config.tools.ffmpeg.clone(),
            Duration::from_secs(self.config.composer.render_timeout_secs),
        );
        Composer::new(
            Box::new(renderer),
            Box::new(FfprobeInspector::new(&self.config.tools)),
            Box::new(HttpImageFetcher::new(self.client.clone())),
            self.config.composer.clone(),
        )
    }

    /// OAuth client for the publication platform
    pub fn oauth(&self) -> std::result::Result<OAuthClient, SetupError> {
        Ok(OAuthClient::new(
            self.client.clone(),
            require_secret(YOUTUBE_CLIENT_ID_ENV)?,
            require_secret(YOUTUBE_CLIENT_SECRET_ENV)?,
            self.config.publisher.redirect_uri.clone(),
        ))
    }

    pub fn token_store(&self) -> TokenStore {
        TokenStore::new(self.workspace.token_path())
    }

    fn publisher(&self) -> std::result::Result<Publisher, SetupError> {
        let uploader = YouTubeUploader::new(
            self.client.clone(),
            self.oauth()?,
            self.token_store(),
            self.config.retry.clone(),
        );
        Ok(Publisher::new(Box::new(uploader), self.config.publisher.clone()))
    }
}

#[async_trait]
impl StageSet for LiveStages {
    async fn collect(&self, seen: &mut SeenSet, workspace: &Workspace) -> std::result::Result<CollectOutcome, StageFailure> {
        self.collector()
            .collect(seen, workspace)
            .await
            .map_err(|e| StageFailure::new(Stage::Collector, e))
    }

    async fn narrate(&self, job: &JobDir) -> std::result::Result<(), StageFailure> {
        let narrator = self.narrator().map_err(|e| StageFailure::new(Stage::Narrator, e))?;
        narrator
            .run(job)
            .await
            .map(|_| ())
            .map_err(|e| StageFailure::new(Stage::Narrator, e))
    }

    async fn align(&self, job: &JobDir) -> std::result::Result<(), StageFailure> {
        self.aligner()
            .run(job)
            .await
            .map(|_| ())
            .map_err(|e| StageFailure::new(Stage::Aligner, e))
    }

    async fn compose(&self, job: &JobDir) -> std::result::Result<(), StageFailure> {
        self.composer()
            .run(job)
            .await
            .map(|_| ())
            .map_err(|e| StageFailure::new(Stage::Composer, e))
    }

    async fn publish(&self, job: &JobDir, ledger: &mut UploadLedger) -> std::result::Result<(), StageFailure> {
        let publisher = self.publisher().map_err(|e| StageFailure::new(Stage::Publisher, e))?;
        publisher
            .run(job, ledger)
            .await
            .map(|_| ())
            .map_err(|e| StageFailure::new(Stage::Publisher, e))
    }
}
