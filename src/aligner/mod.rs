//! Aligner stage: word timings for the narration, grouped into captions.
//!
//! Word timings come from a force aligner run against the script. Words the
//! aligner is unsure about are re-timed by dividing the time between the
//! nearest trusted neighbours evenly, and when the aligner output cannot be
//! matched to the script at all the whole narration is divided evenly. Every
//! re-timed run of words is recorded in the track's `fallback_spans`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod external;
pub mod segmenter;

use crate::config::AlignerConfig;
use crate::error::{Classify, ErrorCategory};
use crate::media::ToolError;
use crate::output::format_as_srt;
use crate::records::{
    AudioAsset, FallbackSpan, Script, SubtitleTrack, Validate, TIMING_EPSILON,
};
use crate::utils::normalize_whitespace;
use crate::workspace::{write_atomic, JobDir, WorkspaceError};

pub use external::ExternalAligner;
pub use segmenter::{segment, SegmentRules, TimedWord};

/// One aligned word as reported by the force aligner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    #[serde(rename = "start")]
    pub start_time: f64,
    #[serde(rename = "end")]
    pub end_time: f64,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum AlignToolError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("unreadable aligner output: {0}")]
    Output(String),

    #[error("could not prepare aligner input: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for AlignToolError {
    fn category(&self) -> ErrorCategory {
        match self {
            AlignToolError::Tool(ToolError::Timeout { .. }) => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ForceAligner: Send + Sync {
    /// Word timings for `transcript` spoken in `audio`
    async fn align(&self, audio: &Path, transcript: &str) -> Result<Vec<WordTimestamp>, AlignToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AlignError {
    #[error("alignment failed: {0}")]
    Aligner(#[from] AlignToolError),

    #[error("subtitle track is inconsistent: {0}")]
    InvalidTrack(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("could not write subtitles: {0}")]
    Io(#[from] std::io::Error),
}

impl Classify for AlignError {
    fn category(&self) -> ErrorCategory {
        match self {
            AlignError::Aligner(e) => e.category(),
            AlignError::InvalidTrack(_) => ErrorCategory::Invariant,
            AlignError::Workspace(e) => e.category(),
            AlignError::Io(_) => ErrorCategory::Permanent,
        }
    }
}

pub struct Aligner {
    aligner: Box<dyn ForceAligner>,
    config: AlignerConfig,
}

impl Aligner {
    pub fn new(aligner: Box<dyn ForceAligner>, config: AlignerConfig) -> Self {
        Self { aligner, config }
    }

    /// Align the job's narration and write `subtitles.json` and `subtitles.srt`
    pub async fn run(&self, job: &JobDir) -> Result<SubtitleTrack, AlignError> {
        let script = job.load::<Script>()?;
        let audio = job.load::<AudioAsset>()?;

        let aligned = match self.aligner.align(&audio.path, &script.text).await {
            Ok(words) => Some(words),
            Err(e) if self.config.fallback_on_failure => {
                tracing::warn!("Aligner failed for '{}', dividing time evenly: {}", job.id, e);
                None
            }
            Err(e) => return Err(e.into()),
        };

        let track = self.build_track(&script, &audio, aligned.as_deref())?;

        write_atomic(&job.srt_file(), format_as_srt(&track).as_bytes())?;
        job.store(&track)?;

        tracing::info!(
            "Aligned {} captions for '{}' ({} re-timed spans)",
            track.segments.len(),
            job.id,
            track.fallback_spans.len()
        );
        Ok(track)
    }

    /// Turn aligner output into a checked subtitle track
    pub fn build_track(
        &self,
        script: &Script,
        audio: &AudioAsset,
        aligned: Option<&[WordTimestamp]>,
    ) -> Result<SubtitleTrack, AlignError> {
        let tokens: Vec<&str> = script.text.split_whitespace().collect();
        let (words, fallback_spans) = retime(&tokens, aligned, audio.duration_secs, self.config.min_confidence);

        let rules = SegmentRules {
            max_words: self.config.max_words_per_segment,
            pause_threshold: self.config.pause_threshold_secs,
        };

        let track = SubtitleTrack {
            article_id: script.article_id.clone(),
            audio_duration_secs: audio.duration_secs,
            segments: segment(&words, rules),
            fallback_spans,
        };

        track.validate().map_err(AlignError::InvalidTrack)?;
        if track.text() != normalize_whitespace(&script.text) {
            return Err(AlignError::InvalidTrack(
                "caption text does not reproduce the script".to_string(),
            ));
        }

        Ok(track)
    }
}

/// Final timing for every script token.
///
/// Aligner words are matched to tokens by position. A word is trusted when
/// its confidence is at least `min_confidence` (or unreported) and its window
/// lies inside the audio after the previous trusted word. Untrusted runs are
/// spread evenly between the trusted neighbours.
pub fn retime(
    tokens: &[&str],
    aligned: Option<&[WordTimestamp]>,
    duration: f64,
    min_confidence: f64,
) -> (Vec<TimedWord>, Vec<FallbackSpan>) {
    let anchors = match aligned {
        Some(words) if words.len() == tokens.len() => trusted_anchors(words, duration, min_confidence),
        Some(words) => {
            tracing::warn!(
                "Aligner returned {} words for a {}-word script, dividing time evenly",
                words.len(),
                tokens.len()
            );
            vec![None; tokens.len()]
        }
        None => vec![None; tokens.len()],
    };

    let mut timed: Vec<TimedWord> = Vec::with_capacity(tokens.len());
    let mut spans = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if let Some((start, end)) = anchors[i] {
            timed.push(TimedWord {
                text: tokens[i].to_string(),
                start,
                end,
            });
            i += 1;
            continue;
        }

        let first = i;
        while i < tokens.len() && anchors[i].is_none() {
            i += 1;
        }
        let last = i - 1;

        let window_start = timed.last().map(|w| w.end).unwrap_or(0.0);
        let window_end = anchors
            .get(i)
            .copied()
            .flatten()
            .map(|(start, _)| start)
            .unwrap_or(duration)
            .max(window_start);

        let count = last - first + 1;
        let step = (window_end - window_start) / count as f64;
        for (k, token) in tokens[first..=last].iter().enumerate() {
            let start = (window_start + step * k as f64).min(window_end);
            let end = if k + 1 == count {
                window_end
            } else {
                (window_start + step * (k + 1) as f64).min(window_end)
            };
            timed.push(TimedWord {
                text: token.to_string(),
                start,
                end,
            });
        }

        spans.push(FallbackSpan {
            first_word: first,
            last_word: last,
            start: window_start,
            end: window_end,
        });
    }

    (timed, spans)
}

fn trusted_anchors(words: &[WordTimestamp], duration: f64, min_confidence: f64) -> Vec<Option<(f64, f64)>> {
    let mut previous_end = 0.0_f64;

    words
        .iter()
        .map(|w| {
            let confident = w.confidence.map_or(true, |c| c >= min_confidence);
            let valid = w.start_time.is_finite()
                && w.end_time.is_finite()
                && w.start_time <= w.end_time
                && w.start_time + TIMING_EPSILON >= previous_end
                && w.end_time <= duration + TIMING_EPSILON;

            if !(confident && valid) {
                return None;
            }

            let start = w.start_time.max(previous_end).min(duration);
            let end = w.end_time.max(start).min(duration);
            previous_end = end;
            Some((start, end))
        })
        .collect()
}
