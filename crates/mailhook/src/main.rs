//! `mailhook` - SMTP ingestion server
//!
//! Accepts authenticated SMTP submissions, stores each message in `SQLite`
//! and posts the raw message to a webhook.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context;
use mailhook_core::{Config, IngestBackend, SqliteMailStore, WebhookNotifier};
use mailhook_smtp::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the environment may already be set.
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mailhook=info,mailhook_core=info,mailhook_smtp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        table = %config.mail_table,
        timezone = %config.timezone,
        "Starting mailhook"
    );

    let store = SqliteMailStore::new(&config.database_url, &config.mail_table)
        .await
        .with_context(|| format!("Failed to open store at {}", config.database_url))?;
    let notifier = WebhookNotifier::with_timeout(config.webhook_timeout)
        .context("Failed to build webhook client")?;
    let backend = IngestBackend::from_config(&config, Arc::new(store), Arc::new(notifier));
    let server = Server::new(backend, config.server_config());

    tokio::select! {
        result = server.listen_and_serve() => {
            result.with_context(|| format!("SMTP server on {} failed", config.listen_addr()))?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl-C")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
