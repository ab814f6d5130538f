//! Narrator stage: article text to a word-capped script, then to speech.

use async_trait::async_trait;
use chrono::Utc;
use std::io::Write;

pub mod gemini;
pub mod tts;

use crate::config::NarratorConfig;
use crate::error::{Classify, ErrorCategory};
use crate::http::ServiceError;
use crate::media::{MediaInspector, ProbeError};
use crate::records::{ArticleRecord, AudioAsset, Script};
use crate::utils::{normalize_whitespace, word_count};
use crate::workspace::{staging_file, JobDir, WorkspaceError};

pub use gemini::GeminiClient;
pub use tts::GoogleTts;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Encoded MP3 audio for `text`
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, ServiceError>;

    fn voice_name(&self) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum NarrateError {
    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("script still has {words} words after {attempts} attempts (limit {limit})")]
    Overlong {
        words: usize,
        limit: usize,
        attempts: u32,
    },

    #[error("speech synthesis returned no audio")]
    EmptyAudio,

    #[error("synthesized audio is unusable: {0}")]
    UnusableAudio(String),

    #[error("could not measure synthesized audio: {0}")]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for NarrateError {
    fn category(&self) -> ErrorCategory {
        match self {
            NarrateError::Service(e) => e.category(),
            NarrateError::Overlong { .. } => ErrorCategory::Transient,
            NarrateError::EmptyAudio | NarrateError::UnusableAudio(_) => ErrorCategory::Invariant,
            NarrateError::Probe(_) => ErrorCategory::Permanent,
            NarrateError::Workspace(e) => e.category(),
            NarrateError::Io(_) => ErrorCategory::Permanent,
        }
    }

    fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            NarrateError::Service(e) => e.retry_after(),
            _ => None,
        }
    }
}

pub struct Narrator {
    generator: Box<dyn TextGenerator>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    inspector: Box<dyn MediaInspector>,
    config: NarratorConfig,
}

impl Narrator {
    pub fn new(
        generator: Box<dyn TextGenerator>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        inspector: Box<dyn MediaInspector>,
        config: NarratorConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            inspector,
            config,
        }
    }

    /// Produce the script and the audio for a job, reusing a script that is
    /// already on disk
    pub async fn run(&self, job: &JobDir) -> Result<AudioAsset, NarrateError> {
        let script = if job.has::<Script>() {
            tracing::info!("Reusing existing script for '{}'", job.id);
            job.load::<Script>()?
        } else {
            let article = job.load::<ArticleRecord>()?;
            let script = self.write_script(&article).await?;
            job.store(&script)?;
            script
        };

        self.synthesize(job, &script).await
    }

    /// Ask the generator for a narration of at most `word_limit` words
    pub async fn write_script(&self, article: &ArticleRecord) -> Result<Script, NarrateError> {
        let limit = self.config.word_limit;
        let source = article.narration_source();
        let mut attempts = 0u32;
        let mut last = String::new();

        while attempts < self.config.max_rewrite_attempts {
            attempts += 1;
            let prompt = if attempts == 1 {
                first_prompt(&self.config.style, limit, &source)
            } else {
                rewrite_prompt(limit, word_count(&last), &last)
            };

            let text = clean_generated_text(&self.generator.generate(&prompt).await?);
            let words = word_count(&text);
            tracing::debug!("Generation attempt {} for '{}': {} words", attempts, article.id, words);

            if words == 0 {
                return Err(ServiceError::rejected("text generation", "generated script is empty").into());
            }
            if words <= limit {
                return Ok(self.script(article, text, attempts, false));
            }

            tracing::warn!(
                "Script for '{}' has {} words, limit is {} (attempt {}/{})",
                article.id,
                words,
                limit,
                attempts,
                self.config.max_rewrite_attempts
            );
            last = text;
        }

        let words = word_count(&last);
        if !self.config.truncate_overlong {
            return Err(NarrateError::Overlong { words, limit, attempts });
        }

        let cut = truncate_to_words(&last, limit);
        tracing::info!(
            "Truncated script for '{}' from {} to {} words",
            article.id,
            words,
            word_count(&cut)
        );
        Ok(self.script(article, cut, attempts, true))
    }

    fn script(&self, article: &ArticleRecord, text: String, attempts: u32, truncated: bool) -> Script {
        Script {
            article_id: article.id.clone(),
            word_count: word_count(&text),
            text,
            word_limit: self.config.word_limit,
            attempts,
            truncated,
            created_at: Utc::now(),
        }
    }

    /// Synthesize speech for `script` into the job's audio file
    pub async fn synthesize(&self, job: &JobDir, script: &Script) -> Result<AudioAsset, NarrateError> {
        tracing::info!("Synthesizing {} words for '{}'", script.word_count, job.id);

        let bytes = self.synthesizer.synthesize(&script.text).await?;
        if bytes.is_empty() {
            return Err(NarrateError::EmptyAudio);
        }

        let target = job.audio_file();
        let mut staging = staging_file(&target)?;
        staging.write_all(&bytes)?;
        staging.as_file().sync_all()?;

        let info = self.inspector.probe(staging.path()).await?;
        if !info.has_audio {
            return Err(NarrateError::UnusableAudio("no audio stream".to_string()));
        }
        if !info.duration_secs.is_finite() || info.duration_secs <= 0.0 {
            return Err(NarrateError::UnusableAudio(format!(
                "duration {} is not positive",
                info.duration_secs
            )));
        }

        staging.persist(&target).map_err(|e| e.error)?;

        let asset = AudioAsset {
            article_id: script.article_id.clone(),
            path: target,
            duration_secs: info.duration_secs,
            voice: self.synthesizer.voice_name(),
            created_at: Utc::now(),
        };
        job.store(&asset)?;

        tracing::info!("Narration for '{}' is {:.2}s long", job.id, asset.duration_secs);
        Ok(asset)
    }
}

fn first_prompt(style: &str, limit: usize, source: &str) -> String {
    format!(
        "{} Use plain sentences without headings, lists or markup. \
         The narration must not exceed {} words.\n\n{}",
        style.trim(),
        limit,
        source
    )
}

fn rewrite_prompt(limit: usize, words: usize, previous: &str) -> String {
    format!(
        "The following narration has {} words. Rewrite it so that it has at most {} words. \
         Keep the most important facts, use plain sentences and return only the narration.\n\n{}",
        words, limit, previous
    )
}

/// Drop markdown decoration the model sometimes adds
fn clean_generated_text(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !matches!(c, '*' | '#' | '_' | '`')).collect();
    normalize_whitespace(&stripped)
}

/// Cut `text` to at most `limit` words, preferring the last complete
/// sentence within the cap and falling back to a plain word cut.
pub fn truncate_to_words(text: &str, limit: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(limit).collect();

    let sentence_end = words.iter().rposition(|w| {
        w.trim_end_matches(['"', '\'', ')', '”', '’'])
            .ends_with(['.', '!', '?'])
    });

    match sentence_end {
        Some(last) => words[..=last].join(" "),
        None => words.join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaInfo, MockMediaInspector};
    use crate::test_support::{article, words};
    use crate::workspace::Workspace;
    use mockall::Sequence;
    use tempfile::TempDir;

    fn config() -> NarratorConfig {
        NarratorConfig {
            word_limit: 150,
            max_rewrite_attempts: 3,
            truncate_overlong: true,
            ..NarratorConfig::default()
        }
    }

    fn narrator(generator: MockTextGenerator, synthesizer: MockSpeechSynthesizer, inspector: MockMediaInspector) -> Narrator {
        Narrator::new(Box::new(generator), Box::new(synthesizer), Box::new(inspector), config())
    }

    fn probe_ok(duration_secs: f64) -> MockMediaInspector {
        let mut inspector = MockMediaInspector::new();
        inspector.expect_probe().returning(move |_| {
            Ok(MediaInfo {
                duration_secs,
                has_audio: true,
                ..MediaInfo::default()
            })
        });
        inspector
    }

    #[test]
    fn test_truncate_prefers_sentence_boundary() {
        let text = "One two three. Four five six! Seven eight nine ten";
        assert_eq!(truncate_to_words(text, 8), "One two three. Four five six!");
        assert_eq!(truncate_to_words(text, 2), "One two");
        assert_eq!(truncate_to_words("He said \"go.\" Then left", 4), "He said \"go.\"");
    }

    #[test]
    fn test_clean_generated_text() {
        assert_eq!(clean_generated_text("**Yoda** was\n\n a *Jedi*."), "Yoda was a Jedi.");
    }

    #[tokio::test]
    async fn test_overlong_response_is_capped() {
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(3)
            .returning(|_| Ok(words(300)));

        let narrator = narrator(generator, MockSpeechSynthesizer::new(), MockMediaInspector::new());
        let script = narrator.write_script(&article("Yoda")).await.unwrap();

        assert!(script.word_count <= 150);
        assert_eq!(script.word_count, 150);
        assert!(script.truncated);
        assert_eq!(script.attempts, 3);
    }

    #[tokio::test]
    async fn test_rewrite_succeeds_on_second_attempt() {
        let mut seq = Sequence::new();
        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(words(200)));
        generator
            .expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|prompt: &str| prompt.contains("has 200 words"))
            .returning(|_| Ok("Yoda trained Jedi for eight centuries.".to_string()));

        let narrator = narrator(generator, MockSpeechSynthesizer::new(), MockMediaInspector::new());
        let script = narrator.write_script(&article("Yoda")).await.unwrap();

        assert_eq!(script.text, "Yoda trained Jedi for eight centuries.");
        assert_eq!(script.attempts, 2);
        assert!(!script.truncated);
    }

    #[tokio::test]
    async fn test_overlong_without_truncation_is_transient() {
        let mut generator = MockTextGenerator::new();
        generator.expect_generate().returning(|_| Ok(words(151)));

        let mut narrator = narrator(generator, MockSpeechSynthesizer::new(), MockMediaInspector::new());
        narrator.config.truncate_overlong = false;

        let err = narrator.write_script(&article("Yoda")).await.unwrap_err();
        assert!(matches!(err, NarrateError::Overlong { words: 151, limit: 150, attempts: 3 }));
        assert_eq!(err.category(), ErrorCategory::Transient);
    }

    #[tokio::test]
    async fn test_run_writes_script_and_audio() {
        let dir = TempDir::new().unwrap();
        let job = Workspace::new(dir.path()).create_job("Yoda").unwrap();
        job.store(&article("Yoda")).unwrap();

        let mut generator = MockTextGenerator::new();
        generator
            .expect_generate()
            .returning(|_| Ok("Yoda was a legendary Jedi Master.".to_string()));

        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer
            .expect_synthesize()
            .returning(|_| Ok(b"ID3 audio bytes".to_vec()));
        synthesizer
            .expect_voice_name()
            .return_const("en-US-Wavenet-D".to_string());

        let narrator = narrator(generator, synthesizer, probe_ok(3.25));
        let asset = narrator.run(&job).await.unwrap();

        assert_eq!(asset.duration_secs, 3.25);
        assert_eq!(fs_err::read(job.audio_file()).unwrap(), b"ID3 audio bytes");
        assert!(job.has::<Script>());
        assert!(job.has::<AudioAsset>());
        assert_eq!(job.next_stage(), Some(crate::error::Stage::Aligner));
    }

    #[tokio::test]
    async fn test_empty_audio_fails_loudly() {
        let dir = TempDir::new().unwrap();
        let job = Workspace::new(dir.path()).create_job("Yoda").unwrap();

        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_synthesize().returning(|_| Ok(Vec::new()));

        let narrator = narrator(MockTextGenerator::new(), synthesizer, MockMediaInspector::new());
        let script = crate::test_support::script("Yoda", "Hello there.");
        let err = narrator.synthesize(&job, &script).await.unwrap_err();

        assert!(matches!(err, NarrateError::EmptyAudio));
        assert!(!job.audio_file().exists());
    }

    #[tokio::test]
    async fn test_zero_duration_audio_is_rejected() {
        let dir = TempDir::new().unwrap();
        let job = Workspace::new(dir.path()).create_job("Yoda").unwrap();

        let mut synthesizer = MockSpeechSynthesizer::new();
        synthesizer.expect_synthesize().returning(|_| Ok(b"garbage".to_vec()));

        let narrator = narrator(MockTextGenerator::new(), synthesizer, probe_ok(0.0));
        let script = crate::test_support::script("Yoda", "Hello there.");
        let err = narrator.synthesize(&job, &script).await.unwrap_err();

        assert!(matches!(err, NarrateError::UnusableAudio(_)));
        assert!(!job.audio_file().exists());
        assert!(!job.has::<AudioAsset>());
    }
}
