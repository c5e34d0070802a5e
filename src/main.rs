// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! replication-relay - standalone runner
//!
//! # Usage
//!
//! ```bash
//! # Timed run (until schedule.replication_timeout or Ctrl-C)
//! replication-relay run
//!
//! # One topology sweep
//! replication-relay --config relay.toml once
//!
//! # Check configuration and print the effective direction and TTL
//! replication-relay validate
//!
//! # Also verify both namespaces are reachable
//! replication-relay validate --check-connections
//! ```
//!
//! Exits non-zero when any message failed or the run errored.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use replication_relay::config::{LogFormat, ReplicationConfig, Side};
use replication_relay::memory::{InMemoryNamespace, MEMORY_SCHEME};
use replication_relay::sanitize::sanitize_log_message;
use replication_relay::stats::ReplicationStats;
use replication_relay::{logging, Namespace, ReplicationEngine};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "replication-relay")]
#[command(version, about = "Relay topic messages between a primary and a secondary namespace")]
struct Cli {
    /// Configuration file (any format the config crate reads)
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (overrides logging.level)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Repeat replication cycles until the configured timeout
    Run,
    /// Run a single replication cycle
    Once,
    /// Load and validate configuration, then exit
    Validate {
        /// Also reach every namespace the direction uses
        #[arg(long)]
        check_connections: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            // Logging may not be up yet if configuration failed to load.
            let message = sanitize_log_message(&format!("{e:#}"));
            eprintln!("error: {message}");
            error!(error = %message, "Replication run failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = ReplicationConfig::load(cli.config.as_deref())
        .with_context(|| describe_source(cli.config.as_deref()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json_logs {
        config.logging.format = LogFormat::Json;
    }
    logging::init(&config.logging);

    let check_only = match cli.command {
        Commands::Validate { check_connections: false } => return validate(&config),
        Commands::Validate { check_connections: true } => true,
        _ => false,
    };
    if check_only {
        validate(&config)?;
    } else {
        config
            .validate_sources()
            .context("Configuration is missing a source connection")?;
    }

    let primary = resolve_namespace(&config, Side::Primary)?;
    let secondary = resolve_namespace(&config, Side::Secondary)?;
    let engine = ReplicationEngine::new(config, primary, secondary)
        .context("Failed to build replication engine")?;

    engine
        .check_connections()
        .await
        .context("Connection check failed")?;
    if check_only {
        println!("Connections verified");
        return Ok(ExitCode::SUCCESS);
    }

    let handle = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, shutting down gracefully");
            handle.shutdown();
        }
    });

    let stats = match cli.command {
        Commands::Once => engine.run_once().await?,
        _ => engine.run_timed().await?,
    };

    write_ci_outputs(&stats);

    if stats.has_failures() {
        error!(failed = stats.failed, "Replication finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_source(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("Failed to load configuration from {}", p.display()),
        None => "Failed to load configuration from environment".to_string(),
    }
}

fn validate(config: &ReplicationConfig) -> Result<ExitCode> {
    config.validate_sources()?;
    println!("Configuration valid");
    println!("  direction:    {}", config.direction.label());
    println!(
        "  ttl:          {}s (rto {}m + delta {}m)",
        config.ttl_seconds(),
        config.rto_minutes,
        config.delta_minutes
    );
    println!(
        "  topology:     {}",
        if config.discover_topology { "discovered" } else { "static" }
    );
    println!(
        "  retry:        {} attempts, base delay {}s",
        config.retry.max_attempts, config.retry.base_delay_secs
    );
    Ok(ExitCode::SUCCESS)
}

/// Build the namespace client for one side from its connection descriptor.
///
/// Sides that no route touches get an idle in-memory placeholder.
fn resolve_namespace(config: &ReplicationConfig, side: Side) -> Result<Arc<dyn Namespace>> {
    let connection = config.endpoint(side).connection.trim();
    let in_use = config
        .active_routes()
        .iter()
        .any(|r| r.source == side || r.destination == side);

    if connection.is_empty() && !in_use {
        return Ok(Arc::new(InMemoryNamespace::new(side.as_str())));
    }
    if let Some(ns) = InMemoryNamespace::from_descriptor(connection) {
        info!(side = side.as_str(), namespace = ns.name(), "Using in-memory namespace");
        return Ok(Arc::new(ns));
    }
    bail!(
        "No broker client for the {} connection; supported scheme: {MEMORY_SCHEME}<name>",
        side.as_str()
    )
}

/// Append job outputs when running under GitHub Actions.
fn write_ci_outputs(stats: &ReplicationStats) {
    if std::env::var_os("GITHUB_ACTIONS").is_none() {
        return;
    }
    let Some(path) = std::env::var_os("GITHUB_OUTPUT") else {
        return;
    };
    match stats.write_ci_outputs(Path::new(&path)) {
        Ok(()) => info!("CI outputs written"),
        Err(e) => warn!(error = %sanitize_log_message(&e.to_string()), "Failed to write CI outputs"),
    }
}
