//! Holocron - turn wiki articles into narrated, captioned short videos
//!
//! The pipeline has five stages: the collector picks an unseen article, the
//! narrator writes and voices a script, the aligner times captions against the
//! audio, the composer renders a vertical video and the publisher uploads it.
//! Each stage reads the previous stage's records from the job directory and
//! writes its own, so the orchestrator can resume any interrupted job.

pub mod aligner;
pub mod cli;
pub mod collector;
pub mod composer;
pub mod config;
pub mod error;
pub mod http;
pub mod media;
pub mod narrator;
pub mod output;
pub mod pipeline;
pub mod publisher;
pub mod records;
pub mod retry;
pub mod state;
pub mod utils;
pub mod workspace;

#[cfg(test)]
mod test_support;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{Classify, ErrorCategory, PipelineError, Stage, StageFailure};
pub use pipeline::{LiveStages, Orchestrator, RunReport, StageSet};
pub use workspace::{JobDir, Workspace};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
