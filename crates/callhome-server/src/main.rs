// ============================================
// File: crates/callhome-server/src/main.rs
// ============================================
//! # Call-Home Controller Entry Point
//!
//! ## Creation Reason
//! Binary wrapper around [`CallHomeController`]: CLI parsing, logging
//! setup and configuration loading.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Controller start and graceful stop on Ctrl-C
//!
//! ## Usage
//! ```bash
//! # Write a starter configuration
//! callhome-server init --config /etc/callhome/controller.toml
//!
//! # Start listening for call-home connections
//! callhome-server start --config /etc/callhome/controller.toml
//!
//! # Other commands
//! callhome-server validate             # Validate config file
//! callhome-server fingerprint <KEY>    # SHA256 fingerprint of a host key
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `start` needs the `russh` feature; without it there is no SSH client
//! - Logging starts at `info` and is reloaded to `[logging].level` once the
//!   config is read; `RUST_LOG` wins over both
//! - Configuration errors exit with status 2, everything else with 1
//! - The binary keeps configuration in memory; declared devices are
//!   re-seeded on every start
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

use callhome_server::{CallHomeController, ControllerConfig, MemoryConfigStore, ServerError};

/// Handle for swapping the log filter after startup.
type FilterHandle = reload::Handle<EnvFilter, Registry>;

// ============================================
// CLI Definition
// ============================================

/// NETCONF Call-Home Controller
///
/// Accepts reverse SSH connections from NETCONF devices and hands the
/// resulting sessions to the management layer.
#[derive(Parser, Debug)]
#[command(name = "callhome-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the controller
    Start {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/callhome/controller.toml")]
        config: PathBuf,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/callhome/controller.toml")]
        config: PathBuf,
    },

    /// Write a configuration file with default values
    Init {
        /// Path to configuration file
        #[arg(short, long, default_value = "/etc/callhome/controller.toml")]
        config: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the fingerprint of a device host key (for troubleshooting)
    #[command(hide = true)]
    Fingerprint {
        /// OpenSSH public key line or bare base64 key blob
        key: String,
    },
}

// ============================================
// Main
// ============================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = init_logging("info");

    let result = match cli.command {
        Commands::Start { config } => cmd_start(config, logging.as_ref()).await,
        Commands::Validate { config } => cmd_validate(config).await,
        Commands::Init { config, force } => cmd_init(config, force).await,
        Commands::Fingerprint { key } => cmd_fingerprint(&key),
    };

    if let Err(e) = result {
        error!("{}", e);
        let config_error = e
            .downcast_ref::<ServerError>()
            .is_some_and(ServerError::is_config_error);
        std::process::exit(if config_error { 2 } else { 1 });
    }
}

// ============================================
// Commands
// ============================================

/// Starts the controller and runs until Ctrl-C.
async fn cmd_start(config_path: PathBuf, logging: Option<&FilterHandle>) -> anyhow::Result<()> {
    let config = load_or_default_config(&config_path).await?;

    if let Some(handle) = logging {
        let filter = filter_for(&config.logging.level, env_directives().as_deref());
        if let Err(e) = handle.reload(filter) {
            warn!(error = %e, "Could not apply configured log level");
        }
    }

    info!("════════════════════════════════════════");
    info!("Listen:     {}:{}", config.listener.bind_addr, config.listener.port);
    info!("Reactive:   {}", if config.reactive.enabled { "enabled" } else { "disabled" });
    info!("Declared:   {} device(s)", config.devices.len());
    info!("════════════════════════════════════════");

    let store = Arc::new(MemoryConfigStore::new());
    let controller = CallHomeController::new(config, store, connector()?)?;
    controller.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating shutdown...");
    controller.stop().await;

    Ok(())
}

/// Validates configuration file.
async fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Controller will use default values.");
        return Ok(());
    }

    let config = ControllerConfig::load(&config_path).await?;

    println!("✅ Configuration is valid");
    println!();
    println!("Listener:");
    println!("   Address:    {}:{}", config.listener.bind_addr, config.listener.port);
    println!();
    println!("Timeouts:");
    println!("   Connect:    {}s", config.timeouts.connect_secs);
    println!("   Reply:      {}s", config.timeouts.reply_secs);
    println!("   Idle:       {}s", config.timeouts.idle_secs);
    println!();
    println!("Reactive provisioning:");
    println!("   Enabled:    {}", config.reactive.enabled);
    println!("   Username:   {}", config.reactive.username);
    println!("   Driver:     {}", config.reactive.device_driver);
    println!();
    println!("Declared devices:");
    for device in &config.devices {
        let provisioned = device.to_provisioned()?;
        println!("   {}", provisioned.id);
    }
    if config.devices.is_empty() {
        println!("   (none)");
    }
    println!();

    Ok(())
}

/// Writes the default configuration.
async fn cmd_init(config_path: PathBuf, force: bool) -> anyhow::Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&config_path, ControllerConfig::default().to_toml()).await?;
    println!("✅ Wrote {}", config_path.display());
    Ok(())
}

/// Prints the SHA256 fingerprint of a host key.
fn cmd_fingerprint(key: &str) -> anyhow::Result<()> {
    let key = CallHomeController::decode_public_key(key)?;
    println!("{} {}", key.algorithm(), key.fingerprint());
    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Initializes the tracing subscriber with a reloadable filter.
///
/// Returns `None` if a global subscriber was already installed.
fn init_logging(level: &str) -> Option<FilterHandle> {
    let (filter, handle) = reload::Layer::new(filter_for(level, env_directives().as_deref()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .ok()
        .map(|()| handle)
}

/// `RUST_LOG` directives when they parse, else `level`.
fn filter_for(level: &str, env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level))
}

fn env_directives() -> Option<String> {
    std::env::var(EnvFilter::DEFAULT_ENV).ok()
}

/// Loads config or returns default when the file is absent.
async fn load_or_default_config(path: &Path) -> anyhow::Result<ControllerConfig> {
    if path.exists() {
        Ok(ControllerConfig::load(path).await?)
    } else {
        info!("Config file not found, using defaults");
        Ok(ControllerConfig::default())
    }
}

#[cfg(feature = "russh")]
fn connector() -> anyhow::Result<Arc<dyn callhome_transport::SshConnector>> {
    Ok(Arc::new(callhome_transport::RusshConnector::default()))
}

#[cfg(not(feature = "russh"))]
fn connector() -> anyhow::Result<Arc<dyn callhome_transport::SshConnector>> {
    anyhow::bail!("built without an SSH client; rebuild with `--features russh`")
}
