//! Operator-facing command line.
//!
//! Each subcommand validates its input and loads configuration before the
//! store is opened, so bad arguments never leave partial effects behind.

pub mod content;
pub mod episodes;
pub mod settings;
pub mod stats;
pub mod worker;

use crate::config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH};
use crate::database::Database;
use crate::error::{AppError, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Parakeet Podcast Processor: podcast feeds to transcripts, digests and blog posts.
#[derive(Parser, Debug)]
#[command(name = "p3")]
#[command(version)]
pub struct Cli {
    /// Configuration file path.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Database file path.
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the directory layout and a starter config.
    Init {
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },

    /// Download new episodes from the configured feeds.
    Fetch {
        /// Max episodes per feed (defaults to settings.max_episodes_per_feed).
        #[arg(long)]
        max_episodes: Option<usize>,
    },

    /// Transcribe downloaded episodes.
    Transcribe {
        /// Whisper model to use (defaults to settings.whisper_model).
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Summarize transcribed episodes into the daily digest.
    Digest {
        /// LLM provider: ollama, openai or basic.
        #[arg(long)]
        provider: Option<String>,

        /// LLM model name.
        #[arg(long)]
        model: Option<String>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Export a day's digest.
    Export {
        /// Digest date (YYYY-MM-DD), defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Export format: markdown, json or html. Repeatable.
        #[arg(long = "format")]
        formats: Vec<String>,

        /// Output directory.
        #[arg(long, default_value = "exports")]
        output: PathBuf,
    },

    /// Write a graded blog post from a day's digest.
    Write {
        /// Blog post topic or angle.
        #[arg(long)]
        topic: String,

        /// Digest date (YYYY-MM-DD), defaults to today.
        #[arg(long)]
        date: Option<String>,

        /// Target score out of 100 (defaults to settings.target_grade).
        #[arg(long)]
        target_grade: Option<f64>,
    },

    /// Show episode counts per status.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// List episodes with errors.
    Errors {
        /// Include the last error and its timestamp.
        #[arg(long)]
        show_all: bool,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Force episodes to processed without touching their error history.
    #[command(group(ArgGroup::new("target").required(true).args(["episode_id", "podcast"])))]
    MarkProcessed {
        #[arg(long)]
        episode_id: Option<i64>,

        /// Errored episodes whose podcast title contains this text.
        #[arg(long)]
        podcast: Option<String>,

        /// Informational note stored on the episode.
        #[arg(long)]
        reason: Option<String>,
    },

    /// Rewind episodes to downloaded so they are attempted again.
    #[command(group(ArgGroup::new("target").required(true).args(["episode_id", "all", "podcast"])))]
    Retry {
        #[arg(long)]
        episode_id: Option<i64>,

        /// Every errored or failed episode.
        #[arg(long)]
        all: bool,

        /// Errored or failed episodes whose podcast title contains this text.
        #[arg(long)]
        podcast: Option<String>,

        /// Also clear error count, last error and timestamp.
        #[arg(long)]
        reset_errors: bool,
    },
}

/// Selection flags shared by stage runs.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Process a single episode.
    #[arg(long)]
    pub episode_id: Option<i64>,

    /// Skip episodes with any recorded error.
    #[arg(long)]
    pub skip_errors: bool,

    /// Retry ceiling (defaults to settings.max_retries).
    #[arg(long)]
    pub max_retries: Option<i64>,
}

pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Paths shared by every command.
pub struct GlobalArgs {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
}

impl GlobalArgs {
    pub fn load_config(&self) -> Result<Config> {
        if !self.config_path.exists() {
            return Err(AppError::Config(format!(
                "config file not found: {} (run 'p3 init' to create one)",
                self.config_path.display()
            )));
        }
        Config::load(&self.config_path)
    }

    pub fn open_db(&self) -> Result<Arc<Database>> {
        open_db(&self.db_path)
    }
}

pub fn open_db(path: &Path) -> Result<Arc<Database>> {
    let db = Database::new(path)?;
    log::debug!("Opened store at {}", path.display());
    Ok(Arc::new(db))
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let global = GlobalArgs {
        config_path: cli.config,
        db_path: cli.db,
    };

    match cli.command {
        Commands::Init { force } => settings::init(&global, force)?,
        Commands::Fetch { max_episodes } => episodes::fetch(&global, max_episodes).await?,
        Commands::Transcribe { model, batch } => worker::transcribe(&global, model, &batch).await?,
        Commands::Digest {
            provider,
            model,
            batch,
        } => worker::digest(&global, provider, model, &batch).await?,
        Commands::Export {
            date,
            formats,
            output,
        } => content::export(&global, date.as_deref(), &formats, &output)?,
        Commands::Write {
            topic,
            date,
            target_grade,
        } => content::write(&global, &topic, date.as_deref(), target_grade).await?,
        Commands::Status { json } => stats::status(&global, json)?,
        Commands::Errors { show_all, json } => stats::errors(&global, show_all, json)?,
        Commands::MarkProcessed {
            episode_id,
            podcast,
            reason,
        } => episodes::mark_processed(&global, episode_id, podcast, reason.as_deref())?,
        Commands::Retry {
            episode_id,
            all,
            podcast,
            reset_errors,
        } => episodes::retry(&global, episode_id, all, podcast, reset_errors)?,
    }
    Ok(())
}
