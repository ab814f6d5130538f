use async_trait::async_trait;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use super::{AlignToolError, ForceAligner, WordTimestamp};
use crate::config::AlignerConfig;
use crate::media::run_tool;

/// Force aligner run as an external program.
///
/// Invoked as `<command> [args..] <audio> <transcript.txt>`; it must print a
/// JSON array of `{"word", "start", "end", "confidence"?}` objects to stdout.
pub struct ExternalAligner {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ExternalAligner {
    pub fn new(config: &AlignerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

pub fn parse_alignment(stdout: &[u8]) -> Result<Vec<WordTimestamp>, AlignToolError> {
    serde_json::from_slice(stdout).map_err(|e| AlignToolError::Output(e.to_string()))
}

#[async_trait]
impl ForceAligner for ExternalAligner {
    async fn align(&self, audio: &Path, transcript: &str) -> Result<Vec<WordTimestamp>, AlignToolError> {
        let mut transcript_file = tempfile::Builder::new()
            .prefix("holocron-transcript-")
            .suffix(".txt")
            .tempfile()?;
        transcript_file.write_all(transcript.as_bytes())?;
        transcript_file.flush()?;

        let mut args: Vec<String> = self.args.clone();
        args.push(audio.to_string_lossy().into_owned());
        args.push(transcript_file.path().to_string_lossy().into_owned());

        tracing::debug!("Running aligner: {} {}", self.command, args.join(" "));
        let output = run_tool(&self.command, &args, self.timeout).await?;

        let words = parse_alignment(&output.stdout)?;
        tracing::debug!("Aligner returned {} words", words.len());
        Ok(words)
    }
}
