//! Herald broadcast binary: one run over the subscriber list, then exit.
//!
//! Exits non-zero only when the run could not start (bad configuration,
//! database unreachable, subscriber query failed). Failed sends do not change
//! the exit status.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_notifier::dispatcher::{Dispatcher, DispatcherConfig};
use herald_notifier::payload_from_config;
use herald_notifier::source::PgSubscriberSource;
use herald_notifier::transport::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_notifier=info,herald_common=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald broadcast starting...");

    // Load configuration
    let config = AppConfig::from_env().inspect_err(|e| {
        tracing::error!(error = %e, "Invalid configuration, broadcast not started");
    })?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .inspect_err(|e| {
            tracing::error!(error = %e, "Database unreachable, broadcast not started");
        })?;

    let transport = Arc::new(TelegramTransport::new(
        &config.telegram_api_url,
        &config.telegram_bot_token,
        config.telegram_timeout,
    )?);

    // Ctrl+C stops new sends; in-flight ones still finish and are reported
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing in-flight sends...");
            shutdown_tx.send_replace(true);
        }
    });

    let dispatcher = Dispatcher::new(
        transport,
        DispatcherConfig {
            max_concurrency: config.dispatch_max_concurrency,
            deadline: config.dispatch_deadline,
        },
    )
    .with_shutdown(shutdown_rx);

    let source = PgSubscriberSource::new(pool);
    let payload = payload_from_config(&config);

    match dispatcher.broadcast(&source, &payload).await {
        Ok(_) => {
            tracing::info!("Herald broadcast finished");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Broadcast aborted before sending");
            Err(e.into())
        }
    }
}
