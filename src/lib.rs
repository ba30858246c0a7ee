// Declare the modules
pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod history;
pub mod image;
pub mod markup;
pub mod models;
pub mod session;
pub mod storage;

use crate::api::{ChatApiProvider, OpenAICompatibleProvider};
use crate::commands::TerminalTranscript;
use crate::config::{AppConfig, ConfigOverrides, HistoryWindow};
use crate::history::HistoryManager;
use crate::session::ChatSession;
use crate::storage::StorageManager;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Chat with an OpenAI-compatible model from the terminal; history is kept between runs.
#[derive(Parser, Debug)]
#[command(name = "studychat", version, about)]
pub struct Cli {
    /// Path to the history database
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Keep history in memory only for this run
    #[arg(long, global = true)]
    ephemeral: bool,
    /// API base URL (default https://api.openai.com/v1)
    #[arg(long, global = true)]
    base_url: Option<String>,
    /// Model for text-only messages
    #[arg(long, global = true)]
    model: Option<String>,
    /// Model for messages with an image
    #[arg(long, global = true)]
    vision_model: Option<String>,
    /// Prior turns to send: `full`, `recent` (last 10) or a number
    #[arg(long, global = true, value_parser = parse_window)]
    window: Option<HistoryWindow>,
    /// Sampling temperature (default 0.7)
    #[arg(long, global = true)]
    temperature: Option<f32>,
    /// More log output (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Send one message and print the reply
    Send {
        text: String,
        /// Attach an image (JPEG, PNG, GIF or WebP, up to 20 MiB)
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Print the stored conversation
    History {
        /// Only the last N messages
        #[arg(long)]
        last: Option<usize>,
    },
    /// Delete the stored conversation
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Save the API key in the OS keyring
    SetKey { key: String },
}

fn parse_window(raw: &str) -> Result<HistoryWindow, String> {
    raw.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}

/// Runs the CLI. A failed `send` exits non-zero without an error value,
/// because the transcript has already printed the failure.
pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    log::debug!("Parsed arguments: {:?}", cli.command);

    let command = cli.command.unwrap_or(Command::Chat);
    let ephemeral = cli.ephemeral;
    let config = AppConfig::load(ConfigOverrides {
        base_url: cli.base_url,
        model: cli.model,
        vision_model: cli.vision_model,
        history_window: cli.window,
        temperature: cli.temperature,
        db_path: cli.db,
    })?;

    match command {
        Command::SetKey { key } => {
            crate::config::set_api_key_in_keyring(&key)?;
            println!("API key saved to the OS keyring.");
        }
        Command::History { last } => {
            let history = open_history(&config, ephemeral).await?;
            commands::show_history(&history, last);
        }
        Command::Clear { yes } => {
            let mut history = open_history(&config, ephemeral).await?;
            commands::clear_history(&mut history, yes).await?;
        }
        Command::Chat => {
            let session = build_session(&config, open_history(&config, ephemeral).await?)?;
            commands::run_repl(&session).await?;
        }
        Command::Send { text, image } => {
            let session = build_session(&config, open_history(&config, ephemeral).await?)?;
            if commands::send_message(&session, &text, image.as_deref()).await?.is_none() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn open_history(config: &AppConfig, ephemeral: bool) -> anyhow::Result<HistoryManager> {
    let storage = if ephemeral {
        StorageManager::in_memory()
            .await
            .context("Failed to create in-memory history store")?
    } else {
        StorageManager::open(&config.db_path)
            .await
            .with_context(|| format!("Failed to open history database {}", config.db_path.display()))?
    };
    Ok(HistoryManager::new(storage).await)
}

fn build_session(config: &AppConfig, history: HistoryManager) -> anyhow::Result<ChatSession> {
    let api_config = config.api_config()?;
    log::info!("Using API configuration: {:?}", api_config);
    let api_provider: Arc<dyn ChatApiProvider> = Arc::new(OpenAICompatibleProvider::new(&api_config));
    Ok(ChatSession::new(history, api_provider, config.session.clone())
        .with_transcript(Arc::new(TerminalTranscript)))
}
