//! Dispatch Worker - route construction and timing service for delivery days
//!
//! This worker connects to NATS and answers route planning requests. The
//! `plan` subcommand runs a single request offline.

mod cli;
mod config;
mod handlers;
mod services;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::types::PlanRequest;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logs_dir = config::logs_dir_from_env();
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Initialize logging - both stdout and file
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,dispatch_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)) // console
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = config::Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Plan { input, refine } => plan_once(config, input, refine).await,
    }
}

async fn serve(config: config::Config) -> Result<()> {
    info!("Starting Dispatch Worker...");

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    if let Err(e) = handlers::start_handlers(nats_client, &config).await {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn plan_once(config: config::Config, input: std::path::PathBuf, refine: bool) -> Result<()> {
    let raw = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let mut request: PlanRequest = serde_json::from_slice(&raw)
        .with_context(|| format!("Failed to parse plan request in {}", input.display()))?;
    request.refine_with_traffic |= refine;

    let setup = handlers::build_planner(&config).await?;
    let plan = setup.planner.optimize(request).await?;

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
