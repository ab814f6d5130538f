use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use holocron::cli::{AuthAction, Cli, Commands};
use holocron::config::Config;
use holocron::output::{self, JobStatus};
use holocron::pipeline::{LiveStages, Orchestrator};
use holocron::utils;
use holocron::workspace::Workspace;

fn init_tracing(cli: &Cli) {
    let default = if cli.verbose { "holocron=debug" } else { "holocron=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let registry = tracing_subscriber::registry().with(filter);

    if cli.log_json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Flips to `true` on the first Ctrl-C
fn cancellation() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after cleanup");
            let _ = tx.send(true);
        }
    });
    rx
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(&cli);

    let config = Config::load(cli.config.as_deref()).await?;
    let workspace = Workspace::new(&config.paths.data_dir);
    let show_progress = !cli.quiet && console::Term::stderr().is_term();

    match &cli.command {
        Commands::Run => {
            let stages = LiveStages::new(config, workspace.clone())?;
            let orchestrator = Orchestrator::new(Box::new(stages), workspace, cancellation())
                .with_progress(show_progress);

            match orchestrator.run().await {
                Ok(report) => output::print_run_summary(&report),
                Err(err) => {
                    output::print_failure(&err);
                    std::process::exit(err.exit_code());
                }
            }
        }
        command @ (Commands::Collect
        | Commands::Narrate { .. }
        | Commands::Align { .. }
        | Commands::Compose { .. }
        | Commands::Publish { .. }) => {
            if let Some((stage, job)) = command.single_stage() {
                let stages = LiveStages::new(config, workspace.clone())?;
                let orchestrator = Orchestrator::new(Box::new(stages), workspace, cancellation())
                    .with_progress(show_progress);

                match orchestrator.run_single(stage, job).await {
                    Ok(job) => println!("{} finished for job '{}'", stage, job.id),
                    Err(err) => {
                        output::print_failure(&err);
                        std::process::exit(err.exit_code());
                    }
                }
            }
        }
        Commands::Status => {
            let rows: Vec<JobStatus> = workspace
                .list_jobs()?
                .iter()
                .map(|(job, article)| JobStatus::from_job(job, article))
                .collect();
            output::print_status(&rows);
        }
        Commands::Auth { action } => {
            let stages = LiveStages::new(config, workspace.clone())?;
            let oauth = stages.oauth()?;

            match action {
                AuthAction::Url => {
                    println!("Open this URL, approve access, then run `holocron auth exchange <CODE>`:");
                    println!("{}", oauth.authorize_url());
                }
                AuthAction::Exchange { code } => {
                    workspace.ensure_layout()?;
                    let token = oauth.exchange_code(code).await?;
                    let store = stages.token_store();
                    store.save(&token)?;
                    println!("Credential saved to {}", store.path().display());
                }
            }
        }
        Commands::Config { show } => {
            if *show {
                config.display();
            } else {
                let path = match &cli.config {
                    Some(path) => path.clone(),
                    None => Config::config_path()?,
                };
                config.save(&path).await?;
                println!("Configuration written to {}", path.display());
            }
        }
        Commands::Doctor => {
            let tools = [
                (config.tools.ffmpeg.as_str(), "video rendering"),
                (config.tools.ffprobe.as_str(), "media probing"),
                (config.aligner.command.as_str(), "caption alignment"),
            ];
            let missing = utils::check_dependencies(&tools).await;

            if missing.is_empty() {
                println!("All external tools are available");
            } else {
                eprintln!("Missing tools:");
                for dep in &missing {
                    eprintln!("   • {}", dep);
                }
                anyhow::bail!("{} required tool(s) not found", missing.len());
            }

            config.validate().context("Configuration is invalid")?;
        }
    }

    Ok(())
}
