use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::Stage;

#[derive(Parser)]
#[command(
    name = "holocron",
    about = "Holocron - Turn wiki articles into narrated, captioned short videos",
    version,
    long_about = "Picks a random unseen wiki article, writes a short narration for it, synthesizes speech, aligns captions to the audio, renders a vertical video and uploads it. Every stage leaves its output on disk, so an interrupted run picks up where it stopped."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to ./holocron.yaml or the user config dir)
    #[arg(short, long, global = true, value_name = "FILE", env = "HOLOCRON_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Produce one video end to end, resuming an unfinished job if there is one
    Run,

    /// Pick a new unseen article and start a job for it
    Collect,

    /// Write the narration script and synthesize speech
    Narrate {
        /// Job id (defaults to the oldest unfinished job)
        #[arg(value_name = "JOB")]
        job: Option<String>,
    },

    /// Align captions to the narration audio
    Align {
        #[arg(value_name = "JOB")]
        job: Option<String>,
    },

    /// Render the vertical video
    Compose {
        #[arg(value_name = "JOB")]
        job: Option<String>,
    },

    /// Upload the rendered video
    Publish {
        #[arg(value_name = "JOB")]
        job: Option<String>,
    },

    /// List jobs and how far each has progressed
    Status,

    /// Authorize uploads to the video platform
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Write the default configuration, or show the current one
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// Check that the external tools are installed
    Doctor,
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// Print the consent URL to open in a browser
    Url,

    /// Exchange the code from the consent redirect for a stored credential
    Exchange {
        #[arg(value_name = "CODE")]
        code: String,
    },
}

impl Commands {
    /// The stage a single-stage command runs, with its job argument
    pub fn single_stage(&self) -> Option<(Stage, Option<&str>)> {
        match self {
            Commands::Collect => Some((Stage::Collector, None)),
            Commands::Narrate { job } => Some((Stage::Narrator, job.as_deref())),
            Commands::Align { job } => Some((Stage::Aligner, job.as_deref())),
            Commands::Compose { job } => Some((Stage::Composer, job.as_deref())),
            Commands::Publish { job } => Some((Stage::Publisher, job.as_deref())),
            _ => None,
        }
    }
}
