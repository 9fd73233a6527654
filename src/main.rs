//! mysql-warden CLI Entry Point
//!
//! Subcommands:
//! - `serve` - MCP server over stdio (default)
//! - `check` - probe every configured connection
//! - `classify` - classify a SQL statement without touching any database
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use mysql_warden::config::CONFIG_ENV_VAR;
use mysql_warden::{
    classify, load_registry, logging, mcp, resolve_config_path, ConnectionManager,
    ConnectionRegistry, Connector, ErrorEnvelope, Metadata, MySqlConnector, ScriptedConnector,
    SuccessEnvelope,
};

/// mysql-warden - Policy-enforcing MySQL access for agents
#[derive(Parser)]
#[command(name = "mysql-warden")]
#[command(about = "Policy-enforcing MySQL access broker for AI agents")]
#[command(version)]
struct Cli {
    /// Path to config.json
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Serve {
        /// Answer every statement from the in-memory engine instead of MySQL
        #[arg(long)]
        dry_run: bool,
    },

    /// Connect to every configured connection and report its status
    Check,

    /// Classify a SQL statement
    Classify {
        /// Statement to classify
        sql: String,
    },
}

/// Per-connection payload printed by `check`
#[derive(Serialize)]
struct CheckReport<'a> {
    connection: &'a str,
    host: &'a str,
    port: u16,
    database: &'a str,
    read_only: bool,
    max_rows: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_stderr_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command.unwrap_or(Commands::Serve { dry_run: false }) {
        Commands::Classify { sql } => {
            let started = Instant::now();
            let classification = classify(&sql);
            print_json(&SuccessEnvelope::new("classify", classification, Metadata::since(started)))?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check => {
            let registry = load_config(cli.config)?;
            check(ConnectionManager::new(registry, MySqlConnector)).await
        }

        Commands::Serve { dry_run } => {
            let registry = load_config(cli.config)?;
            if dry_run {
                tracing::warn!("dry run: statements are answered in memory, never sent to MySQL");
                serve(ConnectionManager::new(registry, ScriptedConnector::new().without_recording()))
                    .await?;
            } else {
                serve(ConnectionManager::new(registry, MySqlConnector)).await?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(explicit: Option<PathBuf>) -> Result<ConnectionRegistry> {
    let path = resolve_config_path(explicit.as_deref());
    let registry = load_registry(&path)
        .with_context(|| format!("Error loading config from {}", path.display()))?;

    tracing::info!(path = %path.display(), connections = registry.len(), "configuration loaded");
    Ok(registry)
}

async fn serve<C: Connector>(manager: ConnectionManager<C>) -> Result<()> {
    let manager = Arc::new(manager);

    let outcome = tokio::select! {
        result = mcp::serve(Arc::clone(&manager)) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            Ok(())
        }
    };

    manager.close().await;
    outcome
}

async fn check<C: Connector>(manager: ConnectionManager<C>) -> Result<ExitCode> {
    let mut failed = false;

    for (name, policy) in manager.registry().iter() {
        let started = Instant::now();
        match manager.resolve(name).await {
            Ok(_) => {
                let report = CheckReport {
                    connection: name,
                    host: &policy.host,
                    port: policy.port,
                    database: &policy.database,
                    read_only: policy.read_only,
                    max_rows: policy.max_rows,
                };
                print_json(&SuccessEnvelope::new("check", report, Metadata::since(started)))?;
            }
            Err(e) => {
                failed = true;
                print_json(&ErrorEnvelope::from_error("check", &e))?;
            }
        }
    }

    manager.close().await;
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
