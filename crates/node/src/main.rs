//! # Keel Node Entry Point
//!
//! Starts one session actor per configured controller and keeps them running
//! until Ctrl+C, or until every actor has failed fatally.
//!
//! ## Configuration
//!
//! Loaded by [`NodeConfig::load`]: defaults, then the first `keel.toml`
//! found (`KEEL_CONFIG_FILE`, `./keel.toml`, `.keel/keel.toml`,
//! `/etc/keel/keel.toml`), then `KEEL_*` environment overrides.
//!
//! ## Logging
//!
//! `RUST_LOG` controls verbosity (default `info`).
//!
//! ## Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Clean shutdown |
//! | 1 | Configuration error, or every controller session failed |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use keel_node::{
    HttpControllerClient, NodeConfig, NodeSessionGroup, SessionExit, WorkerSessionActor,
};

const FAILURE_CHECK_INTERVAL: Duration = Duration::from_millis(500);
const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    match run().await {
        Ok(()) => info!("node stopped cleanly"),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<()> {
    let mut config = NodeConfig::load().context("failed to load configuration")?;
    if config.node_id == "auto" {
        config.node_id = Uuid::new_v4().to_string();
    }
    config.validate().context("invalid configuration")?;
    if config.controllers.is_empty() {
        bail!("no controllers configured (set [node].controllers or KEEL_CONTROLLERS)");
    }

    info!("═══════════════════════════════════════════════════════════════");
    info!("Node ID:          {}", config.node_id);
    info!("Node version:     {}", config.node_software_version);
    info!("Min controller:   {}", config.minimum_controller_version);
    info!("Controllers:      {}", config.controllers.len());
    if let Some(path) = &config.loaded_from {
        info!("Config file:      {}", path.display());
    }
    info!("═══════════════════════════════════════════════════════════════");

    let config = Arc::new(config);
    let group = NodeSessionGroup::new();

    for endpoint in &config.controllers {
        let client = HttpControllerClient::new(endpoint.url.clone(), config.rpc_timeout)
            .with_context(|| format!("cannot build client for controller '{}'", endpoint.id))?;
        let actor = WorkerSessionActor::new(
            endpoint.id.clone(),
            config.clone(),
            Box::new(client),
            group.clone(),
        );
        info!(controller = %endpoint.id, url = %endpoint.url, "starting session");
        group.spawn_actor(actor);
    }

    if let Some(mut commands) = group.take_command_receiver() {
        tokio::spawn(async move {
            while let Some(batch) = commands.recv().await {
                for cmd in &batch.commands {
                    info!(controller = %batch.controller_id, kind = %cmd.kind, "controller command received");
                }
            }
        });
    }

    let total = config.controllers.len();
    let mut all_failed = false;
    let mut ticker = tokio::time::interval(FAILURE_CHECK_INTERVAL);
    let mut metrics_ticker = tokio::time::interval(METRICS_LOG_INTERVAL);
    metrics_ticker.tick().await;
    loop {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("failed to listen for Ctrl+C: {}", e);
                }
                info!("shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                if group.all_failed(total) {
                    all_failed = true;
                    break;
                }
            }
            _ = metrics_ticker.tick() => {
                debug!("session metrics\n{}", group.to_prometheus());
            }
        }
    }

    group.shutdown();
    for (controller, exit) in group.join_all().await {
        match exit {
            SessionExit::Shutdown => info!(controller = %controller, "session stopped"),
            SessionExit::Failed(e) => warn!(controller = %controller, "session failed: {}", e),
        }
    }
    info!("final session metrics\n{}", group.to_prometheus());

    if all_failed {
        bail!("all {} controller sessions failed", total);
    }
    Ok(())
}
