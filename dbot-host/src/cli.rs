//! dbot-host CLI: `run` hosts the configured bots, `check` validates the config offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbot_telegram::{TelegramClientFactory, TelegramConfig};
use serde_json::Value;
use tokio::io::BufReader;
use tracing::{error, info};

use crate::application::AppSettings;
use crate::apps::builtin_registry;
use crate::config::{ConfigStore, JsonConfigStore, DEFAULT_CONFIG_FILE};
use crate::control::ControlPlane;
use crate::log_forward::{log_channel, spawn_log_forwarder};
use crate::logger::init_tracing;
use crate::manager::LifecycleManager;
use crate::registry::Registry;
use crate::stdio::{serve_console, StdioSink};

#[derive(Parser, Debug)]
#[command(name = "dbot-host")]
#[command(about = "Host several Telegram bots in one process", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Boot the configured applications and serve the JSON-lines console on stdin/stdout.
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
        /// Also append the process log to this file.
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Resolve every module and validate every argument set without connecting to Telegram.
    Check {
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,
    },
}

pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { config, log_file } => run(&config, log_file.as_deref()).await,
        Commands::Check { config } => check(&config).await,
    }
}

async fn run(config_path: &Path, log_file: Option<&Path>) -> Result<()> {
    let store = Arc::new(
        JsonConfigStore::open(config_path)
            .await
            .with_context(|| format!("Failed to load {}", config_path.display()))?,
    );

    let (forward_layer, log_rx) = log_channel();
    init_tracing(&store.snapshot().await, log_file, forward_layer)?;

    let telegram = TelegramConfig::from_env()?;
    let manager = Arc::new(LifecycleManager::new(
        Arc::new(builtin_registry()),
        store.clone(),
        Arc::new(TelegramClientFactory::new(telegram)),
    ));
    let sink = Arc::new(StdioSink::stdout());
    let control = ControlPlane::new(manager.clone(), sink.clone());

    let forwarder_cancel = tokio_util::sync::CancellationToken::new();
    let forwarder = spawn_log_forwarder(log_rx, sink, forwarder_cancel.clone());

    let failed = control
        .boot()
        .await
        .iter()
        .filter(|(_, result)| result.is_err())
        .count();
    info!(apps = manager.len().await, failed, "Host started");

    let console = serve_console(BufReader::new(tokio::io::stdin()), &control);
    tokio::select! {
        result = console => {
            if let Err(e) = result {
                error!(error = %e, "Console stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    for (id, result) in manager.destroy_apps(None).await {
        if let Err(e) = result {
            error!(app_id = %id, error = %e, "Failed to shut down application");
        }
    }
    info!("Host stopped");

    forwarder_cancel.cancel();
    forwarder.await.context("Log forwarder panicked")?;
    Ok(())
}

/// Outcome of checking one application config: its display type name or the problem.
pub async fn check_store(
    registry: &Registry,
    store: &dyn ConfigStore,
) -> Vec<(String, crate::error::Result<String>)> {
    let mut outcomes = Vec::new();
    for config in store.app_configs().await {
        let outcome = AppSettings::validate(&config).and_then(|_| {
            let kind = registry.resolve(&config.module)?;
            kind.validate(&Value::Object(config.arguments.clone()))?;
            Ok(kind.display_name())
        });
        outcomes.push((config.id, outcome));
    }
    outcomes
}

async fn check(config_path: &Path) -> Result<()> {
    let store = JsonConfigStore::open(config_path)
        .await
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let registry = builtin_registry();

    let outcomes = check_store(&registry, &store).await;
    let mut failures = 0usize;
    for (id, outcome) in &outcomes {
        match outcome {
            Ok(type_name) => println!("{}\tok\t{}", id, type_name),
            Err(e) => {
                failures += 1;
                println!("{}\terror\t{}", id, e);
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{} of {} application(s) failed the check", failures, outcomes.len());
    }
    println!("{} application(s) ok", outcomes.len());
    Ok(())
}
