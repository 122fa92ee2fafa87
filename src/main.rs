use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use roomlog::config::{self, Cli};
use roomlog::formatter::HtmlFormatter;
use roomlog::{ingest, logger, MatrixHook, MatrixHttpClient};
use std::sync::Arc;
use std::time::Duration;
use std::io::{stdin, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config(&cli)?;

    let client = MatrixHttpClient::new(
        &config.homeserver_url,
        config.access_token.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("Failed to create Matrix client")?;

    let hook = MatrixHook::builder()
        .client(client)
        .room_id(config.room_id.clone())
        .level(config.level)
        .batch_period(config.batch_period_secs)
        .max_queued_messages(config.max_queued_messages)
        .formatter(HtmlFormatter::new().with_bold_messages(config.bold_messages))
        .build()
        .context("Failed to create room log hook")?;
    let hook = Arc::new(hook);

    logger::init(config.console_level, Arc::clone(&hook)).context("Failed to install logger")?;
    logger::install_panic_hook(Arc::clone(&hook));

    info!("Starting roomlog");
    info!("Configuration loaded from {:?}", cli.config);

    // Stdin is read on its own thread so Ctrl-C can return from main while a
    // read is still blocked
    let lines = ingest::spawn_reader(BufReader::new(stdin()));

    // Wait for input to end or Ctrl-C, whichever comes first
    tokio::select! {
        count = ingest::pipe(lines, config.format, &hook) => {
            info!("Forwarded {} log lines", count);
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, flushing pending log lines");
        }
    }

    hook.shutdown().await;

    let stats = hook.stats();
    info!(
        "Sent {} messages, {} lines pending, {} dropped, {} truncated, {} failed flushes",
        stats.messages_sent,
        hook.pending().len(),
        stats.dropped,
        stats.truncated,
        stats.flushes_failed
    );

    Ok(())
}
