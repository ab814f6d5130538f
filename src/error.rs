use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Stages of the pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Collector,
    Narrator,
    Aligner,
    Composer,
    Publisher,
}

impl Stage {
    /// All stages in the order the orchestrator runs them
    pub const ALL: [Stage; 5] = [
        Stage::Collector,
        Stage::Narrator,
        Stage::Aligner,
        Stage::Composer,
        Stage::Publisher,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Collector => "collector",
            Stage::Narrator => "narrator",
            Stage::Aligner => "aligner",
            Stage::Composer => "composer",
            Stage::Publisher => "publisher",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a failure should be treated by the retry layer and the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// No unseen input remains. Terminal, but not a failure.
    Exhausted,
    /// Network timeout, 5xx and similar. Retried with backoff.
    Transient,
    /// Quota or rate limit. Retried after a delay.
    RateLimited,
    /// Bad credentials, policy rejection, malformed request. Never retried.
    Permanent,
    /// A local contract was broken (timings out of bounds, empty script, ...)
    Invariant,
    /// The user interrupted the run
    Cancelled,
}

impl ErrorCategory {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Transient | ErrorCategory::RateLimited)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Exhausted => "exhausted",
            ErrorCategory::Transient => "transient",
            ErrorCategory::RateLimited => "rate-limited",
            ErrorCategory::Permanent => "permanent",
            ErrorCategory::Invariant => "invariant",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that know which [`ErrorCategory`] they belong to
pub trait Classify {
    fn category(&self) -> ErrorCategory;

    /// Server-provided delay before the next attempt, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// A typed failure surfaced by one stage to the orchestrator
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed [{category}]: {source}")]
pub struct StageFailure {
    pub stage: Stage,
    pub category: ErrorCategory,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl StageFailure {
    pub fn new<E>(stage: Stage, error: E) -> Self
    where
        E: Classify + std::error::Error + Send + Sync + 'static,
    {
        Self {
            stage,
            category: error.category(),
            source: Box::new(error),
        }
    }
}

/// Errors reported by the orchestrator
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("nothing to do: {0}")]
    Exhausted(String),

    #[error("run cancelled before the {0} stage finished")]
    Cancelled(Stage),

    #[error(transparent)]
    Stage(#[from] StageFailure),

    #[error(transparent)]
    Workspace(#[from] crate::workspace::WorkspaceError),

    #[error("{stage} reported success but its output is missing in job '{job}'")]
    NoProgress { stage: Stage, job: String },

    #[error("job '{0}' not found")]
    UnknownJob(String),
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PipelineError::Exhausted(_) => ErrorCategory::Exhausted,
            PipelineError::Cancelled(_) => ErrorCategory::Cancelled,
            PipelineError::Stage(failure) => failure.category,
            PipelineError::Workspace(e) => e.category(),
            PipelineError::NoProgress { .. } => ErrorCategory::Invariant,
            PipelineError::UnknownJob(_) => ErrorCategory::Permanent,
        }
    }

    /// The stage that failed, when the failure belongs to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Cancelled(stage) => Some(*stage),
            PipelineError::Stage(failure) => Some(failure.stage),
            PipelineError::NoProgress { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Exhausted => 2,
            ErrorCategory::Cancelled => 130,
            _ => 1,
        }
    }
}
