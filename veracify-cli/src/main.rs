//! veracify-telemetry - CLI tool for managing the telemetry sync engine
//!
//! This tool provides commands for:
//! - Checking sync configuration and queue status
//! - Forcing a sync cycle outside the normal schedule
//!
//! Uses XDG Base Directory specification for file locations:
//! - Store: $XDG_DATA_HOME/veracify/telemetry.db (~/.local/share/veracify/telemetry.db)
//! - Config: $XDG_CONFIG_HOME/veracify/config.toml (~/.config/veracify/config.toml)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use veracify_telemetry::store::keys;
use veracify_telemetry::{Config, SqliteStore, Store, TelemetryService};

#[derive(Parser)]
#[command(name = "veracify-telemetry")]
#[command(about = "Manage the Veracify telemetry sync engine")]
#[command(version)]
struct Args {
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show sync configuration and queue status
    Status,

    /// Run a sync cycle now, bypassing the schedule
    Sync,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;

    let _log_guard = if args.verbose {
        Some(
            veracify_telemetry::logging::init(&config.logging)
                .context("failed to initialize logging")?,
        )
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Sync => cmd_sync(config),
    }
}

fn open_store() -> Result<Arc<SqliteStore>> {
    let path = Config::database_path();
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open store at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Veracify Telemetry Status");
    println!("=========================");
    println!();

    println!("Share analytics: {}", config.telemetry.share_analytics);
    println!("Batch size:      {}", config.telemetry.batch_size);
    println!(
        "Sync interval:   {}s",
        config.telemetry.sync_interval_ms / 1000
    );
    println!(
        "Sink:            {}",
        if config.sink.is_ready() {
            config.sink.base_url.as_deref().unwrap_or("-")
        } else {
            "not configured"
        }
    );
    println!();

    let store = open_store()?;

    let pending_analytics = queue_len(store.as_ref(), keys::PENDING_ANALYTICS)?;
    let pending_feedback = queue_len(store.as_ref(), keys::PENDING_FEEDBACK)?;
    println!("Pending analytics: {}", pending_analytics);
    println!("Pending feedback:  {}", pending_feedback);

    match store.get(keys::LAST_SYNC_TIME)? {
        Some(serde_json::Value::String(ts)) => println!("Last sync:         {}", ts),
        _ => println!("Last sync:         never"),
    }

    if let Some(result) = store.get(keys::LAST_SYNC_RESULT)? {
        println!(
            "Last result:       {} delivered, {} retained",
            result["successful"], result["failed"]
        );
    }

    Ok(())
}

fn cmd_sync(config: Config) -> Result<()> {
    let store = open_store()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create runtime")?;

    runtime.block_on(async {
        let service = TelemetryService::new(config, store)
            .context("failed to start telemetry service")?;

        println!(
            "Forcing sync of {} pending event(s)...",
            service.sync_status().pending_count
        );

        match service.force_sync_now().await {
            Ok(report) => {
                if let Some(reason) = report.skipped {
                    println!("Sync skipped: {:?}", reason);
                } else {
                    println!(
                        "Sync complete: {} delivered, {} retained",
                        report.successful, report.failed
                    );
                }
            }
            Err(e) => {
                println!("Sync failed: {}", e);
            }
        }

        // Stop the background scheduler before the runtime goes away
        service.shutdown().await;
        Ok(())
    })
}

fn queue_len(store: &dyn Store, key: &str) -> Result<usize> {
    Ok(store
        .get(key)?
        .and_then(|v| v.as_array().map(|a| a.len()))
        .unwrap_or(0))
}
