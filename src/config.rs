use crate::hook::DEFAULT_BATCH_PERIOD_SECS;
use crate::ingest::LineFormat;
use crate::types::{Severity, DEFAULT_MAX_QUEUED};
use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(name = "roomlog", version, about = "Pipe log lines into a Matrix room")]
pub struct Cli {
    /// Path to configuration file
    #[clap(long, default_value = "./roomlog.toml")]
    pub config: PathBuf,

    /// Override homeserver URL
    #[clap(long)]
    pub homeserver_url: Option<String>,

    /// Override target room ID
    #[clap(long)]
    pub room_id: Option<String>,

    /// Override minimum severity sent to the room
    #[clap(long)]
    pub level: Option<Severity>,

    /// Override seconds between batches
    #[clap(long)]
    pub batch_period: Option<i64>,

    /// Override input line format
    #[clap(long, value_enum)]
    pub format: Option<LineFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub homeserver_url: String,
    pub access_token: String,
    pub room_id: String,
    #[serde(default = "default_level")]
    pub level: Severity,
    #[serde(default = "default_batch_period")]
    pub batch_period_secs: i64,
    #[serde(default = "default_max_queued")]
    pub max_queued_messages: usize,
    #[serde(default = "default_console_level")]
    pub console_level: LevelFilter,
    #[serde(default)]
    pub bold_messages: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub format: LineFormat,
}

fn default_level() -> Severity {
    Severity::Info
}

fn default_batch_period() -> i64 {
    DEFAULT_BATCH_PERIOD_SECS as i64
}

fn default_max_queued() -> usize {
    DEFAULT_MAX_QUEUED
}

fn default_console_level() -> LevelFilter {
    LevelFilter::Info
}

fn default_request_timeout() -> u64 {
    30
}

pub fn load_config(cli: &Cli) -> Result<Config> {
    let config_content = fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config file: {:?}", cli.config))?;

    let mut config = parse_config(&config_content)?;
    apply_overrides(&mut config, cli);
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse config file")
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(ref homeserver_url) = cli.homeserver_url {
        config.homeserver_url = homeserver_url.clone();
    }

    if let Some(ref room_id) = cli.room_id {
        config.room_id = room_id.clone();
    }

    if let Some(level) = cli.level {
        config.level = level;
    }

    if let Some(batch_period) = cli.batch_period {
        config.batch_period_secs = batch_period;
    }

    if let Some(format) = cli.format {
        config.format = format;
    }
}
