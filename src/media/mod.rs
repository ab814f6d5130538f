//! Running external media tools and probing media files.

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;

use crate::config::ToolsConfig;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{program} is not installed or not in PATH")]
    NotFound { program: String },

    #[error("{program} did not finish within {}s", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("could not run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `program` to completion, killing it if `timeout` elapses
pub async fn run_tool<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output, ToolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Err(_) => {
            return Err(ToolError::Timeout {
                program: program.to_string(),
                timeout,
            })
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound {
                program: program.to_string(),
            })
        }
        Ok(Err(source)) => {
            return Err(ToolError::Io {
                program: program.to_string(),
                source,
            })
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: tail(&String::from_utf8_lossy(&output.stderr), 20),
        });
    }

    Ok(output)
}

/// Last `lines` lines of tool output, enough to explain a failure
fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Stream and container facts about a media file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub has_audio: bool,
    pub has_video: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("unreadable probe output for {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError>;
}

/// [`MediaInspector`] backed by ffprobe
pub struct FfprobeInspector {
    program: String,
    timeout: Duration,
}

impl FfprobeInspector {
    pub fn new(tools: &ToolsConfig) -> Self {
        Self {
            program: tools.ffprobe.clone(),
            timeout: Duration::from_secs(tools.probe_timeout_secs),
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, ProbeError> {
        tracing::debug!("Probing {}", path.display());

        let path_arg = path.to_string_lossy();
        let output = run_tool(
            &self.program,
            [
                "-v", "quiet",
                "-print_format", "json",
                "-show_format",
                "-show_streams",
                &*path_arg,
            ],
            self.timeout,
        )
        .await?;

        parse_probe_output(&output.stdout).map_err(|message| ProbeError::Unreadable {
            path: path.to_path_buf(),
            message,
        })
    }
}

/// Interpret ffprobe's `-print_format json -show_format -show_streams` output
pub fn parse_probe_output(stdout: &[u8]) -> Result<MediaInfo, String> {
    let info: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| e.to_string())?;

    let duration_secs = info["format"]["duration"]
        .as_str()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| "no container duration".to_string())?;

    let empty_vec = vec![];
    let streams = info["streams"].as_array().unwrap_or(&empty_vec);
    let has_audio = streams.iter().any(|s| s["codec_type"].as_str() == Some("audio"));
    let video = streams.iter().find(|s| s["codec_type"].as_str() == Some("video"));

    Ok(MediaInfo {
        duration_secs,
        has_audio,
        has_video: video.is_some(),
        width: video.and_then(|s| s["width"].as_u64()).map(|w| w as u32),
        height: video.and_then(|s| s["height"].as_u64()).map(|h| h as u32),
    })
}
