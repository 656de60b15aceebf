//! dualnet-relay - Main Entry Point
//!
//! Bridges telemetry from the local broker to the remote broker and offers a
//! few maintenance commands for the append log.

use clap::{Parser, Subcommand};
use dualnet_relay::config::{RelayConfig, WiredSection};
use dualnet_relay::observability::{init_default_logging, init_logging, metrics, LogFormat};
use dualnet_relay::relay::{self, FallbackSlot, RelayEngine, RetryLoop};
use dualnet_relay::storage::{self, FileAppendLog};
use dualnet_relay::supervisor::{ConnectionSupervisor, RetryPolicy};
use dualnet_relay::transport::{InterfaceLink, MqttLink};
use dualnet_relay::RelayError;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

/// Store-and-forward MQTT relay for dual-network nodes
#[derive(Parser)]
#[command(name = "dualnet-relay")]
#[command(about = "Relay telemetry from a local MQTT broker to a remote one")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "DUALNET_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until SIGINT or SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Print the append log
    Log {
        /// One JSON object per record
        #[arg(long)]
        json: bool,
        /// Only records that were not delivered
        #[arg(long)]
        undelivered: bool,
    },
    /// Move the append log aside so the relay starts a fresh one
    RotateLog {
        /// Destination path for the current log
        #[arg(value_name = "DEST")]
        destination: PathBuf,
    },
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize observability system
    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!("Starting dualnet-relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run => run_relay(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Log { json, undelivered } => handle_log_command(&config, json, undelivered),
        Commands::RotateLog { destination } => handle_rotate_command(&config, &destination).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> Result<RelayConfig, RelayError> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(RelayConfig::load_from_file(path)?);
    }

    // Try default locations
    let default_paths = ["relay.toml", "config/relay.toml", "/etc/dualnet-relay/relay.toml"];
    for path_str in default_paths {
        let path = Path::new(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(RelayConfig::load_from_file(path)?);
        }
    }

    error!("No configuration file found. Please provide one with -c/--config or create relay.toml");
    process::exit(1);
}

/// Report the static wired identity; bring-up itself is done by the OS
fn log_wired_identity(wired: &WiredSection) -> Result<(), RelayError> {
    let mac = wired.mac_bytes()?.map(|bytes| {
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    });
    info!(
        interface = wired.interface.as_deref().unwrap_or("-"),
        mac = mac.as_deref().unwrap_or("-"),
        address = ?wired.address,
        gateway = ?wired.gateway,
        subnet = ?wired.subnet,
        dns = ?wired.dns,
        "Wired interface identity"
    );
    Ok(())
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

/// Bring up both paths and drain anything left over from the previous run
async fn start_links(
    supervisor: &ConnectionSupervisor,
    retry: &RetryLoop,
) -> Result<(), RelayError> {
    supervisor.ensure_local_broker().await?;
    supervisor.ensure_wireless_link().await?;
    supervisor.ensure_remote_broker().await?;
    let redelivery = retry.redeliver().await;
    info!("Startup redelivery: {:?}", redelivery);
    Ok(())
}

async fn run_relay(config: RelayConfig) -> CliResult {
    let collector = metrics();
    log_wired_identity(&config.wired)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let log = Arc::new(FileAppendLog::new(&config.storage.log_path));
    let slot = Arc::new(FallbackSlot::new());
    if config.storage.restore_on_start {
        match log.read_all() {
            Ok(records) => {
                if relay::restore_from_log(&slot, records).is_none() {
                    info!("No undelivered message to restore");
                }
            }
            Err(e) => warn!(
                "Could not read {} to restore the fallback slot: {}",
                log.path().display(),
                e
            ),
        }
    }

    // Bootstrap: links first, then the engine that the local pump feeds
    let max_size = config.relay.max_message_size;
    let remote = Arc::new(
        MqttLink::new("remote", config.remote.clone(), max_size)
            .with_connect_timeout(config.relay.connect_timeout()),
    );
    let engine = Arc::new(RelayEngine::from_config(
        &config,
        remote.clone(),
        slot.clone(),
        log.clone(),
    ));
    let local = Arc::new(
        MqttLink::new("local", config.local.clone(), max_size)
            .with_connect_timeout(config.relay.connect_timeout())
            .with_subscription(config.local.topic.clone())
            .with_inbound_handler(engine),
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(InterfaceLink::wired(&config.wired)),
        local,
        Arc::new(InterfaceLink::wireless(&config.wireless)),
        remote.clone(),
        RetryPolicy::from_config(&config),
        shutdown_rx.clone(),
    ));
    let retry = Arc::new(RetryLoop::from_config(
        &config,
        supervisor.clone(),
        remote,
        slot,
        log,
    ));

    let signal = wait_for_signal();
    tokio::pin!(signal);

    let started = tokio::select! {
        result = start_links(&supervisor, &retry) => {
            result?;
            true
        }
        received = &mut signal => {
            info!("Received {} during startup, shutting down", received?);
            false
        }
    };

    let mut retry_task = None;
    if started {
        let retry = retry.clone();
        let shutdown_rx = shutdown_rx.clone();
        retry_task = Some(tokio::spawn(async move { retry.run(shutdown_rx).await }));

        info!("Relaying {} -> {}", config.local.topic, config.remote.topic);
        let received = signal.await?;
        info!("Received {}, shutting down gracefully...", received);
    }

    shutdown_tx.send_replace(true);
    if let Some(task) = retry_task {
        if let Err(e) = task.await {
            error!("Retry loop ended abnormally: {}", e);
        }
    }
    supervisor.disconnect_all().await;

    let snapshot = serde_json::to_string(&collector.snapshot())?;
    info!(metrics = %snapshot, "Final relay metrics");
    Ok(())
}

fn handle_config_command(config: &RelayConfig, show: bool) -> CliResult {
    log_wired_identity(&config.wired)?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

fn handle_log_command(config: &RelayConfig, json: bool, undelivered: bool) -> CliResult {
    let log = FileAppendLog::new(&config.storage.log_path);
    let mut records = Vec::new();
    for record in log.read_all()? {
        match record {
            Ok(record) => records.push(record),
            Err(e) => warn!("{}", e),
        }
    }

    for record in records.iter().filter(|r| !undelivered || !r.delivered) {
        if json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            print!("{}", record.to_line());
        }
    }

    if !json {
        match storage::recover_fallback(records) {
            Some(pending) => eprintln!(
                "Pending fallback message: {} bytes ({})",
                pending.payload_len(),
                pending.hex_payload
            ),
            None => eprintln!("No pending fallback message"),
        }
    }
    Ok(())
}

async fn handle_rotate_command(config: &RelayConfig, destination: &Path) -> CliResult {
    let log = FileAppendLog::new(&config.storage.log_path);
    log.rotate(destination).await?;
    info!("Rotated {} to {}", log.path().display(), destination.display());
    Ok(())
}
