//! Usage Agent CLI
//!
//! Host-resident app and network usage telemetry.

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing_subscriber::EnvFilter;
use usage_agent::{
    agent::Agent,
    capture::{check_permission, PlatformCapture},
    config::{Config, TransmissionConfig, TransmissionConfigFile},
    core::{cleanup_cutoff, cleanup_old_files, load_document, Interval, LoadError},
    network::SystemResolver,
    transmission::{
        create_shared_log_with_persistence, SendOutcome, SharedTransmissionLog, TransmitError,
        Transmitter, Transport,
    },
    COLLECTION_DECLARATION, VERSION,
};

#[derive(Parser)]
#[command(name = "usage-agent")]
#[command(version = VERSION)]
#[command(about = "Host usage telemetry agent", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start sampling until Ctrl+C
    Start {
        /// Run attached to a terminal (info-level logging)
        #[arg(long)]
        foreground: bool,

        /// Do not start the background DNS capture
        #[arg(long)]
        no_dns: bool,
    },

    /// Show today's usage and the last transmission
    Status,

    /// Transmit one interval now
    Send {
        /// Interval start (RFC 3339); defaults to the latest closed interval
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        /// Interval end (RFC 3339)
        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,
    },

    /// Show recent transmission log entries
    Logs {
        /// Number of entries to show
        #[arg(long, short, default_value = "10")]
        limit: usize,
    },

    /// Show configuration
    Config,

    /// Enable transmission
    Enable {
        /// Collector endpoint URL
        #[arg(long)]
        endpoint: Option<String>,

        /// Collector API key
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Disable transmission
    Disable,

    /// Set the transmission interval in minutes (1-1440)
    Interval { minutes: u32 },

    /// Send a sample payload to the collector
    TestConnection,

    /// Delete day documents and audit copies older than N days
    Cleanup {
        #[arg(long)]
        days: Option<u64>,
    },

    /// Display what the agent collects
    Declaration,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        _ if cli.verbose => "debug",
        Commands::Start {
            foreground: false, ..
        } => "warn",
        _ => "info",
    };
    init_logging(default_level);

    match cli.command {
        Commands::Start { no_dns, .. } => cmd_start(no_dns),
        Commands::Status => cmd_status(),
        Commands::Send { start, end } => cmd_send(start, end),
        Commands::Logs { limit } => cmd_logs(limit),
        Commands::Config => cmd_config(),
        Commands::Enable { endpoint, api_key } => cmd_enable(endpoint, api_key),
        Commands::Disable => cmd_disable(),
        Commands::Interval { minutes } => cmd_interval(minutes),
        Commands::TestConnection => cmd_test_connection(),
        Commands::Cleanup { days } => cmd_cleanup(days),
        Commands::Declaration => {
            println!("{COLLECTION_DECLARATION}");
            Ok(())
        }
    }
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_start(no_dns: bool) -> anyhow::Result<()> {
    println!("Usage Agent v{VERSION}");
    println!();

    // App enumeration needs Accessibility; without it app snapshots fail every tick
    if !check_permission() {
        eprintln!("Warning: Accessibility permission not granted.");
        eprintln!("App usage will not be recorded until it is granted in");
        eprintln!("System Settings > Privacy & Security > Accessibility.");
        eprintln!();
    }

    let config = Config::load().context("loading config")?;
    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }
    let transmission = TransmissionConfig::load().context("loading transmission config")?;

    println!("Starting collection...");
    println!("  Tick interval: {}s", config.tick_interval.as_secs());
    println!("  Data directory: {}", config.data_path.display());
    println!("  Device ID: {}", transmission.device_id);

    let mut agent = Agent::new(PlatformCapture::new(), &config, Box::new(SystemResolver))?;

    let log = create_shared_log_with_persistence(config.paths().log_path);
    if transmission.enabled {
        match make_transmitter(&config, &transmission, log.clone()) {
            Ok(transmitter) => {
                println!(
                    "  Transmission: every {} minutes to {}",
                    transmission.interval_minutes, transmission.endpoint_url
                );
                agent = agent.with_transmitter(Arc::new(transmitter));
            }
            Err(e) => eprintln!("Warning: Transmission unavailable: {e:#}"),
        }
    } else {
        println!("  Transmission: disabled");
    }

    if config.capture_dns && !no_dns {
        match agent.start_dns_capture() {
            Ok(true) => println!("  DNS capture: enabled"),
            Ok(false) => println!("  DNS capture: not available on this platform"),
            Err(e) => eprintln!("Warning: DNS capture failed to start: {e}"),
        }
    } else {
        println!("  DNS capture: disabled");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    agent.run(running);

    println!();
    println!("Stopped.");
    println!();
    println!("{}", agent.store().aggregate().summary());
    println!();
    println!("{}", log.summary());
    Ok(())
}

fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let transmission = TransmissionConfig::load().context("loading transmission config")?;
    let paths = config.paths();
    let today = config.calendar()?.date_of(Utc::now());

    println!("Usage Agent Status");
    println!("==================");
    println!();

    match load_document(&paths.daily_dir, today) {
        Ok(day) => println!("{}", day.summary()),
        Err(LoadError::Missing(_)) => println!("No usage recorded for {today}."),
        Err(e) => eprintln!("Error reading today's usage: {e}"),
    }
    println!();

    println!("Transmission:");
    println!("  Enabled: {}", transmission.enabled);
    println!("  Interval: {} minutes", transmission.interval_minutes);
    println!(
        "  Next interval: {}",
        Interval::aligned_ending_at(Utc::now(), transmission.interval())
    );
    println!();

    let log = create_shared_log_with_persistence(paths.log_path);
    println!("{}", log.summary());
    Ok(())
}

fn cmd_send(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let transmission = TransmissionConfig::load().context("loading transmission config")?;

    let interval = match (start, end) {
        (Some(start), Some(end)) => {
            anyhow::ensure!(start < end, "interval start must be before its end");
            Interval::new(start, end)
        }
        _ => Interval::aligned_ending_at(Utc::now(), transmission.interval()),
    };

    let log = create_shared_log_with_persistence(config.paths().log_path);
    let transmitter = make_transmitter(&config, &transmission, log)?;

    println!("Sending interval {interval}...");
    match transmitter.send(&interval) {
        Ok(SendOutcome::Sent {
            retry_count,
            payload_size,
        }) => {
            println!("Sent {payload_size} entries ({retry_count} retries).");
            Ok(())
        }
        Ok(SendOutcome::AlreadyTransmitted) => {
            println!("Interval was already transmitted.");
            Ok(())
        }
        Ok(SendOutcome::Failed { retry_count, error }) => {
            anyhow::bail!("transmission failed after {retry_count} attempts: {error}")
        }
        Err(TransmitError::Disabled) => {
            anyhow::bail!("transmission is disabled; run `usage-agent enable` first")
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_logs(limit: usize) -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let log = create_shared_log_with_persistence(config.paths().log_path);
    let entries = log.recent(limit);

    if entries.is_empty() {
        println!("No transmissions recorded.");
        return Ok(());
    }

    println!("Recent transmissions (newest first):");
    println!();
    for entry in entries {
        println!(
            "{} {} | interval {} | {} entries | {} retries",
            if entry.success { "[OK]    " } else { "[FAILED]" },
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.interval(),
            entry.payload_size,
            entry.retry_count
        );
        if let Some(error) = entry.error {
            println!("         error: {error}");
        }
    }
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let transmission = TransmissionConfig::load().context("loading transmission config")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!();
    println!("Transmission file: {:?}", TransmissionConfig::file_path());
    println!();
    println!("  Enabled: {}", transmission.enabled);
    println!("  Endpoint: {}", transmission.endpoint_url);
    println!("  API key: {}", transmission.masked_api_key());
    println!("  Device ID: {}", transmission.device_id);
    println!("  Interval: {} minutes", transmission.interval_minutes);
    println!("  Max attempts: {}", transmission.max_attempts);
    println!("  Timeout: {}s", transmission.timeout_secs);
    Ok(())
}

fn cmd_enable(endpoint: Option<String>, api_key: Option<String>) -> anyhow::Result<()> {
    let path = TransmissionConfig::file_path();
    let mut file = TransmissionConfigFile::load(&path)?;
    if endpoint.is_some() {
        file.endpoint_url = endpoint;
    }
    if api_key.is_some() {
        file.api_key = api_key;
    }
    file.enabled = Some(true);
    file.save(&path)?;

    let resolved = TransmissionConfig::load_from(&path)?;
    println!("Transmission enabled.");
    if let Err(e) = resolved.endpoint() {
        eprintln!("Warning: {e}; pass --endpoint and --api-key or set the environment.");
    }
    Ok(())
}

fn cmd_disable() -> anyhow::Result<()> {
    let path = TransmissionConfig::file_path();
    let mut file = TransmissionConfigFile::load(&path)?;
    file.enabled = Some(false);
    file.save(&path)?;
    println!("Transmission disabled.");
    Ok(())
}

fn cmd_interval(minutes: u32) -> anyhow::Result<()> {
    let path = TransmissionConfig::file_path();
    let mut file = TransmissionConfigFile::load(&path)?;
    file.set_interval_minutes(minutes)?;
    file.save(&path)?;
    println!("Transmission interval set to {minutes} minutes.");
    println!("Restart a running agent to apply it.");
    Ok(())
}

fn cmd_test_connection() -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let transmission = TransmissionConfig::load().context("loading transmission config")?;
    let log = create_shared_log_with_persistence(config.paths().log_path);
    let transmitter = make_transmitter(&config, &transmission, log)?;

    println!("Testing connection to {}...", transmission.endpoint_url);
    transmitter
        .test_connection()
        .context("connection test failed")?;
    println!("Connection OK.");
    Ok(())
}

fn cmd_cleanup(days: Option<u64>) -> anyhow::Result<()> {
    let config = Config::load().context("loading config")?;
    let days = days.unwrap_or(config.cleanup_after_days);
    let cutoff = cleanup_cutoff(SystemTime::now(), days);

    let paths = config.paths();
    let removed = cleanup_old_files(&[&paths.daily_dir, &paths.audit_dir], cutoff)?;
    println!("Removed {removed} files older than {days} days.");
    Ok(())
}

fn make_transmitter(
    config: &Config,
    transmission: &TransmissionConfig,
    log: SharedTransmissionLog,
) -> anyhow::Result<Transmitter> {
    let transport = make_transport(transmission)?;
    Ok(
        Transmitter::new(transmission.clone(), &config.paths(), log, transport)
            .with_calendar(config.calendar()?),
    )
}

#[cfg(feature = "http")]
fn make_transport(transmission: &TransmissionConfig) -> anyhow::Result<Arc<dyn Transport>> {
    let timeout = std::time::Duration::from_secs(transmission.timeout_secs);
    let transport = usage_agent::HttpTransport::new(timeout)?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "http"))]
fn make_transport(_transmission: &TransmissionConfig) -> anyhow::Result<Arc<dyn Transport>> {
    anyhow::bail!("built without the `http` feature; transmission is unavailable")
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");
}
