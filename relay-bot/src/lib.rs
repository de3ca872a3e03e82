//! Relay Bot - Telegram front end for an OpenAI-compatible completion service.
//!
//! This crate provides the session and admission core of the relay:
//! - Per-user fixed-window rate limiting
//! - An expiring allow-list with admin commands
//! - Per-user presets and a trimmed, auto-expiring conversation history
//! - A bounded-concurrency event dispatcher
//!
//! ## Architecture
//!
//! ```text
//! Telegram → Dispatcher → RateLimiter → (commands | AuthorizationGate →
//!            SessionStore → build_prompt → CompletionClient → SessionStore) → Telegram
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod allowlist;
pub mod auth;
pub mod commands;
pub mod completion;
pub mod dispatcher;
pub mod presets;
pub mod rate_limit;
pub mod relay;
pub mod session;

pub use allowlist::{AllowList, AllowListEntry, SqliteAllowList};
pub use auth::AuthorizationGate;
pub use commands::{AdminAction, AdminKind, Command};
pub use completion::{CompletionClient, CompletionError, OpenAiCompatibleClient};
pub use dispatcher::{DispatchStats, Dispatcher, EventHandler};
pub use presets::PresetCatalog;
pub use rate_limit::RateLimiter;
pub use relay::Relay;
pub use session::{build_prompt, ChatMessage, PromptWindow, SessionStore};

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use relay_channels::{TelegramChannel, Transport};
use relay_common::{create_store, Config};
use tokio::sync::mpsc;

/// Startup switches not carried by the config file.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Clear the KV database before serving.
    pub flush_on_start: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            flush_on_start: true,
        }
    }
}

/// Connect every dependency and serve until Ctrl-C or the listener stops.
pub async fn run(config: Config, options: RunOptions) -> anyhow::Result<()> {
    let allow_list = Arc::new(
        SqliteAllowList::open(&config.database.path).with_context(|| {
            format!(
                "Failed to open allow-list database {}",
                config.database.path.display()
            )
        })?,
    );
    allowlist::bootstrap_admins(allow_list.as_ref(), &config.admin.user_ids, Utc::now()).await;

    let kv = create_store(config.redis.backend, &config.redis.url)
        .await
        .context("Failed to connect to the KV store")?;
    tracing::info!(backend = kv.name(), "KV store connected");

    if options.flush_on_start {
        kv.flush_db().await.context("Failed to flush the KV store")?;
        tracing::info!("KV store flushed");
    }

    let mut telegram = TelegramChannel::from_config(&config.telegram);
    telegram
        .init()
        .await
        .context("Failed to initialize Telegram")?;
    let transport: Arc<dyn Transport> = Arc::new(telegram);

    let completion = Arc::new(OpenAiCompatibleClient::from_config(&config.completion));
    tracing::info!(model = %completion.model(), "Completion client ready");

    let relay = Arc::new(Relay::new(
        &config,
        transport.clone(),
        kv,
        allow_list,
        completion,
    ));

    let (tx, rx) = mpsc::channel(config.dispatcher.queue_capacity.max(1));
    let listener = {
        let transport = transport.clone();
        tokio::spawn(async move { transport.listen(tx).await })
    };

    let shutdown = {
        let transport = transport.clone();
        let listener = listener.abort_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                if let Err(e) = transport.shutdown().await {
                    tracing::warn!(error = %e, "Transport shutdown failed");
                }
                listener.abort();
            }
        })
    };

    let dispatcher = Dispatcher::new(relay, config.dispatcher.max_concurrent);
    let stats = dispatcher.run(rx).await;
    shutdown.abort();

    tracing::info!(events = stats.total(), "Relay stopped");

    match listener.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(anyhow::Error::new(e).context("Telegram listener stopped")),
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Telegram listener panicked: {e}")),
    }
}
