//! cloudnap - scheduled start/stop of cloud resources
//!
//! CLI entry point for the cloudnap daemon.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod cli;
mod config;
mod loader;
mod manifest;
mod metrics;
mod web;
mod yc;

use cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_format);

    cli::run(cli).await
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("cloudnap={level},cloudnap_core={level},tower_http=info").into()
    });

    let (text, json) = match format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}
