//! Relay Bot - Main entry point.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use relay_bot::RunOptions;
use relay_common::config::{load_env_file, Config};
use relay_common::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "relay-bot")]
#[command(version)]
#[command(about = "Telegram relay to an OpenAI-compatible chat completion service", long_about = None)]
struct Cli {
    /// Config file (defaults to $RELAY_CONFIG, then ~/.tg-relay/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load environment variables from .env.dev before reading config
    #[arg(long)]
    dev: bool,

    /// Keep existing KV data instead of flushing it at startup
    #[arg(long)]
    no_flush: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_loaded = if cli.dev {
        Some(load_env_file(&PathBuf::from(".env.dev"))?)
    } else {
        None
    };

    // Load configuration
    let config = Config::load_with_env(cli.config.as_deref())?;
    config.validate()?;

    // Initialize logging
    init_logging(&config.observability.log_level, &config.observability.log_format);

    tracing::info!("Relay Bot v{}", env!("CARGO_PKG_VERSION"));
    if let Some(count) = env_loaded {
        tracing::info!(count, "Loaded variables from .env.dev");
    }
    tracing::info!(
        admins = config.admin.user_ids.len(),
        presets = config.presets.len(),
        "Configuration loaded"
    );

    relay_bot::run(
        config,
        RunOptions {
            flush_on_start: !cli.no_flush,
        },
    )
    .await
}
