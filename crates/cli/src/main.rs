//! Beacon CLI
//!
//! Runs the marketing campaign pipeline from the terminal and prints the
//! campaign package as JSON.

use anyhow::{Context, Result};
use beacon_core::config::WorkflowConfig;
use beacon_core::models::LlmProvider;
use beacon_core::state::io::get_runtime_path;
use beacon_core::workflow::{Capabilities, MarketingWorkflow, WorkflowEvent, WorkflowEventKind};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(author, version, about = "Beacon - Multi-stage marketing campaign generator")]
struct Args {
    /// Workflow configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate a campaign for a topic
    Run {
        /// What the campaign is about
        topic: String,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Finish an interrupted run from its latest checkpoint
    Resume {
        run_id: String,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ClapArgs)]
struct RunOptions {
    /// Replace the strategy stage with plan/research/synthesis
    #[arg(long)]
    deep_research: bool,
    /// Generate images for the image prompts
    #[arg(long)]
    images: bool,
    /// Generate video clips for the script
    #[arg(long)]
    video: bool,
    /// Where campaign folders are written
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
    /// Skip writing the campaign folder
    #[arg(long)]
    no_persist: bool,
    /// openai, azure, openrouter or deepseek
    #[arg(long)]
    provider: Option<String>,
    #[arg(short, long)]
    model: Option<String>,
    /// SQLite checkpoint database (required for resume across processes)
    #[arg(long)]
    checkpoint_db: Option<PathBuf>,
    /// Print progress events to stderr
    #[arg(long)]
    debug: bool,
}

impl RunOptions {
    fn apply(self, mut config: WorkflowConfig) -> Result<WorkflowConfig> {
        config.enable_deep_research |= self.deep_research;
        config.enable_image_generation |= self.images;
        config.enable_video_generation |= self.video;
        config.debug |= self.debug;
        if self.no_persist {
            config.persist_output = false;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(provider) = self.provider {
            let provider: LlmProvider = serde_json::from_value(serde_json::Value::String(provider.clone()))
                .with_context(|| format!("Unknown provider: {}", provider))?;
            config.global_model.provider = provider;
            config.global_model.model = provider.default_model().to_string();
        }
        if let Some(model) = self.model {
            config.global_model.model = model;
        }
        if self.checkpoint_db.is_some() {
            config.checkpoint_db = self.checkpoint_db;
        }
        Ok(config)
    }
}

fn print_event(event: &WorkflowEvent) {
    match event.kind {
        WorkflowEventKind::StreamedToken => {
            if let Some(delta) = event.data.as_ref().and_then(|d| d["delta"].as_str()) {
                eprint!("{}", delta);
            }
        }
        WorkflowEventKind::StageCompleted => eprintln!("\n[{}] done", event.source()),
        kind => {
            let data = event.data.as_ref().map(|d| d.to_string()).unwrap_or_default();
            eprintln!("[{}] {:?} {}", event.source(), kind, data);
        }
    }
}

async fn workflow(config_path: &Path, options: RunOptions) -> Result<MarketingWorkflow> {
    let config = options.apply(WorkflowConfig::load(config_path).await)?;
    let debug = config.debug;
    let capabilities = Capabilities::from_env(&config);
    let mut workflow = MarketingWorkflow::new(config, capabilities)?;

    if debug {
        let (tx, mut rx) = mpsc::channel::<WorkflowEvent>(256);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                print_event(&event);
            }
        });
        workflow = workflow.with_event_channel(tx);
    }
    Ok(workflow)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_core=info,beacon_cli=info".into()),
        )
        .init();

    let runtime_dir = get_runtime_path();
    let _ = dotenvy::dotenv();
    let _ = dotenvy::from_path(runtime_dir.join(".env"));

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| runtime_dir.join("config.json"));

    let package = match args.command {
        CliCommand::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
            }
            WorkflowConfig::default().save(&config_path).await?;
            println!("Wrote {}", config_path.display());
            return Ok(());
        }
        CliCommand::Run { topic, options } => {
            let mut workflow = workflow(&config_path, options).await?;
            let result = workflow.run(&topic).await;
            if let (Err(_), Some(run_id)) = (&result, workflow.last_run_id()) {
                tracing::error!(run_id = %run_id, "Run failed; resume with `beacon resume {}`", run_id);
            }
            result?
        }
        CliCommand::Resume { run_id, options } => workflow(&config_path, options).await?.resume(&run_id).await?,
    };

    println!("{}", serde_json::to_string_pretty(&package)?);
    if let Some(path) = &package.package_path {
        tracing::info!(path = %path, campaign_id = %package.campaign_id, "Campaign saved");
    }
    Ok(())
}
