//! rf - Retroframe polling client
//!
//! CLI entry point for fetching images once or on a schedule.

use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use retroframe::cli::{Cli, Command};
use retroframe::config::Config;
use retroframe::{DrainingHandler, RefreshLoop};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .try_init()
        .map_err(|e| eyre::eyre!("Failed to install subscriber: {}", e))?;

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Fold CLI overrides into the loaded config
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(width) = cli.width {
        config.image.width = width;
    }
    if let Some(height) = cli.height {
        config.image.height = height;
    }
    if let Some(Command::Watch {
        delay_ms: Some(delay_ms),
    }) = cli.command
    {
        config.refresh.delay_ms = delay_ms;
    }
}

fn build_loop(config: &Config, handler: Arc<DrainingHandler>) -> RefreshLoop {
    RefreshLoop::new(
        config.server.clone(),
        Arc::new(config.image.dimension()),
        Arc::new(config.refresh.delay()),
        handler,
    )
}

fn print_summary(handler: &DrainingHandler) {
    if handler.images_received() == 0 {
        println!("{} No image received (see log for details)", "✗".red());
    } else {
        println!(
            "{} Received {} image(s), {} bytes",
            "✓".green(),
            handler.images_received(),
            handler.bytes_received()
        );
    }
}

async fn cmd_once(config: &Config) -> Result<()> {
    let handler = Arc::new(DrainingHandler::new());
    let rl = build_loop(config, handler.clone());

    rl.refresh_once().await;
    print_summary(&handler);
    Ok(())
}

async fn cmd_watch(config: &Config) -> Result<()> {
    let handler = Arc::new(DrainingHandler::new());
    let rl = build_loop(config, handler.clone());

    info!(
        addr = %rl.server().addr(),
        dimension = %config.image.dimension(),
        delay_ms = config.refresh.delay_ms,
        "Watching"
    );
    rl.start().await;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!(cycles = rl.completed_cycles(), "Interrupted, exiting");
    print_summary(&handler);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Some(Command::Once) => cmd_once(&config).await,
        Some(Command::Watch { .. }) | None => cmd_watch(&config).await,
    }
}
