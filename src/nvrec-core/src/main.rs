//! nvrec - scheduled multi-channel recording service

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

use nvrec_capture::{CaptureClient, SimulatedClient};
use nvrec_core::config::{Config, DEFAULT_CONFIG_FILE};
use nvrec_core::logging::init_logging;
use nvrec_core::service::Service;
use nvrec_core::session::SessionPlan;
use nvrec_storage::{storage_usage, CleanupEngine, PassOutcome, RECORDING_EXTENSION};

#[derive(Parser)]
#[command(name = "nvrec")]
#[command(about = "Scheduled recording of hub channels and standalone cameras")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recording service until interrupted
    Run,

    /// Validate the configuration and show what would be recorded
    Check,

    /// Run one retention, quota and log-cap cycle
    Cleanup,

    /// Show recording storage usage against the quota
    Usage,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)?;
    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    match cli.command {
        Commands::Run => {
            init_logging(level, Some(&config.log_file()))?;
            config.validate()?;
            cmd_run(config)?;
        }
        Commands::Check => {
            init_logging(level, None)?;
            config.validate()?;
            cmd_check(&config)?;
        }
        Commands::Cleanup => {
            init_logging(level, Some(&config.log_file()))?;
            config.validate()?;
            cmd_cleanup(&config);
        }
        Commands::Usage => {
            init_logging(level, None)?;
            cmd_usage(&config)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn cmd_run(config: Config) -> Result<()> {
    warn!("no vendor capture SDK is linked, recording through the simulated client");
    let client: Arc<dyn CaptureClient> = Arc::new(SimulatedClient::new());

    let service = Service::new(config, client);
    let shutdown = service.shutdown_flag();

    ctrlc::set_handler(move || {
        info!("received shutdown signal");
        shutdown.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    service.run().await
}

fn cmd_check(config: &Config) -> Result<()> {
    let clock = config.clock();

    println!("configuration OK\n");
    println!("  output root:   {}", config.output_root.display());
    println!("  window:        {}", clock.window);
    println!("  rotation:      every {} min", clock.rotation_interval.as_secs() / 60);
    println!("  retention:     {} days", config.retention.retention_days);
    println!("  storage quota: {}", format_bytes(clock.max_storage_bytes));
    println!("  log cap:       {}", format_bytes(clock.max_log_bytes));
    println!();

    match SessionPlan::from_config(config)? {
        SessionPlan::Hub {
            address,
            port,
            channels,
            ..
        } => {
            println!("hub {}:{}, {} channel(s):", address, port, channels.len());
            for channel in channels {
                println!("  ch{} -> {}", channel, config.output_root.display());
            }
        }
        SessionPlan::MultiCamera(specs) => {
            println!("{} camera(s):", specs.len());
            for spec in specs {
                println!("  {}:{} ch{}", spec.address, spec.port, spec.channel);
            }
        }
    }

    Ok(())
}

fn cmd_cleanup(config: &Config) {
    let clock = config.clock();
    let engine = CleanupEngine::new(
        &config.output_root,
        config.log_file(),
        clock.retention_policy(),
    );

    let policy = engine.policy();
    println!(
        "cleaning {} (retention {} days, quota {}, log cap {})",
        engine.root().display(),
        policy.retention.as_secs() / (24 * 60 * 60),
        format_bytes(policy.max_storage_bytes),
        format_bytes(policy.max_log_bytes)
    );

    let report = engine.run(Local::now());

    print_pass("expired", report.expired);
    print_pass("over quota", report.evicted);
    println!(
        "  service log: {}",
        if report.log_reset { "reset" } else { "within cap" }
    );
}

fn print_pass(name: &str, outcome: Option<PassOutcome>) {
    match outcome {
        Some(o) => println!(
            "  {}: {} file(s) deleted, {} freed, {} failure(s)",
            name,
            o.deleted_files,
            format_bytes(o.deleted_bytes),
            o.failures
        ),
        None => println!("  {}: pass failed, see log", name),
    }
}

fn cmd_usage(config: &Config) -> Result<()> {
    let clock = config.clock();
    let usage = storage_usage(&config.output_root, RECORDING_EXTENSION)?;

    println!("output root: {}", config.output_root.display());
    println!("recordings:  {} file(s)", usage.files);
    println!(
        "used:        {} of {}",
        format_bytes(usage.bytes),
        format_bytes(clock.max_storage_bytes)
    );

    if clock.max_storage_bytes > 0 {
        let percentage = usage.bytes as f64 / clock.max_storage_bytes as f64 * 100.0;
        println!("quota:       {:.1}%", percentage);
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
