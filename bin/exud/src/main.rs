//! ---
//! exu_section: "01-core-functionality"
//! exu_subsection: "binary"
//! exu_type: "source"
//! exu_scope: "code"
//! exu_description: "Binary entrypoint for the extension update daemon."
//! exu_version: "v0.1.0"
//! exu_owner: "tbd"
//! ---
mod console;
mod exporter;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use exu_common::config::AppConfig;
use exu_common::logging::init_tracing;
use exu_core::{
    EngineContext, EngineHandle, EngineOptions, InventoryStore, Reconciler, UpdaterMetrics,
};
use exu_host::LocalExtensionHost;
use exu_persistence::JsonSettingsStore;
use exu_repository::HttpRepositoryClient;
use prometheus::Registry;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use crate::console::{print_pending, print_status, ConsoleNotificationSink};
use crate::exporter::spawn_http_server;

#[derive(Debug, Parser)]
#[command(author, version, about = "Extension update daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the update engine until interrupted")]
    Run {
        #[arg(long, help = "Install updates without asking")]
        auto_update: bool,
    },
    #[command(about = "Query the repository once and print available updates")]
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/exud.toml"));
    candidates.push(PathBuf::from("configs/exud.example.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    init_tracing("exud", &config.logging)?;
    info!(source = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run { auto_update: false }) {
        Commands::Run { auto_update } => {
            config.update.auto_update |= auto_update;
            run_daemon(config).await
        }
        Commands::Check => check_once(&config).await,
    }
}

async fn check_once(config: &AppConfig) -> Result<()> {
    let host = LocalExtensionHost::from_config(&config.host)?;
    let mut inventory = InventoryStore::new(config.update.self_id.clone());
    let tracked = inventory.reload(&host)?;
    let client = HttpRepositoryClient::from_config(&config.repository)?;
    let reconciler = Reconciler::new(
        config.host.version.clone(),
        config.repository.installed_payload,
    );
    let pending = reconciler
        .check_for_updates(&client, &inventory)
        .await
        .context("update check failed")?;

    info!(tracked, available = pending.len(), "update check complete");
    if pending.is_empty() {
        println!("All {tracked} extensions are up to date.");
    } else {
        println!("Updates available:");
        print_pending(&pending);
    }
    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = Arc::new(Registry::new());
    let metrics = UpdaterMetrics::new(registry.clone())?;
    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry, config.metrics.listen)?)
    } else {
        None
    };
    let host = Arc::new(LocalExtensionHost::from_config(&config.host)?);
    let repository = Arc::new(HttpRepositoryClient::from_config(&config.repository)?);
    let settings = Arc::new(
        JsonSettingsStore::open(&config.settings.path).with_context(|| {
            format!(
                "unable to open settings store {}",
                config.settings.path.display()
            )
        })?,
    );

    let handle = EngineContext::new(
        EngineOptions::from_config(&config),
        host,
        repository,
        settings,
        Arc::new(ConsoleNotificationSink::default()),
    )
    .with_metrics(metrics)
    .start()?;

    info!(
        auto_update = config.update.auto_update,
        "daemon running; waiting for termination signal"
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("ctrl-c received; shutting down");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => dispatch(&handle, line.trim()).await,
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(error = %err, "stdin closed");
                    stdin_open = false;
                }
            },
        }
    }
    handle.shutdown().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn dispatch(handle: &EngineHandle, line: &str) {
    let mut words = line.split_whitespace();
    let accepted = match (words.next(), words.next()) {
        (None, _) => return,
        (Some("update"), None) => handle.update_all().await,
        (Some("ignore"), None) => handle.ignore().await,
        (Some("check"), None) => handle.check_now().await,
        (Some("retry"), Some(id)) => handle.retry(id).await,
        (Some("status"), None) => match handle.status().await {
            Some(status) => {
                print_status(&status);
                true
            }
            None => false,
        },
        _ => {
            println!("commands: update | ignore | check | retry <id> | status");
            return;
        }
    };
    if !accepted {
        warn!(command = line, "engine is no longer running");
    }
}
