//! PLG Relay - UDP game traffic relay

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plg_relay::{config::ConfigManager, RelayServer, ShutdownCoordinator};

/// CLI arguments for the PLG relay
#[derive(Parser, Debug)]
#[command(name = "plg-relay")]
#[command(about = "PLG Relay - UDP game traffic relay")]
#[command(version)]
#[command(long_about = "
PLG Relay - UDP game traffic relay

Forwards PLG-framed UDP packets from game clients to allow-listed game
servers. Sessions are registered by a trusted backend over the HTTP
control API.

Configuration sources: the --config file when it exists, otherwise
environment variables. Command-line arguments override both.

Environment variables:
  RELAY_API_KEY          - Shared secret for the control API (required)
  RELAY_BIND_ADDR        - Bind address for all listeners (default 0.0.0.0)
  RELAY_PORT             - UDP relay port (default 443)
  RELAY_API_PORT         - Control API port (default 8443)
  RELAY_METRICS_PORT     - Prometheus metrics port (default 9090)
  RELAY_MAX_SESSIONS     - Maximum concurrent sessions (default 1000)
  RELAY_SESSION_TIMEOUT  - Idle session timeout (e.g. 300, 5m)
  RELAY_REAPER_INTERVAL  - Idle sweep interval (e.g. 60, 1m)
  RELAY_SOCKET_BUFFER    - UDP socket buffer size in bytes
  RELAY_LOG_LEVEL        - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "relay.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// UDP relay port (overrides config)
    #[arg(long, help = "UDP relay port")]
    pub relay_port: Option<u16>,

    /// Control API port (overrides config)
    #[arg(long, help = "Control API port")]
    pub api_port: Option<u16>,

    /// Metrics port (overrides config)
    #[arg(long, help = "Prometheus metrics port")]
    pub metrics_port: Option<u16>,

    /// Shared API key (overrides config)
    #[arg(long, help = "Shared secret for the control API")]
    pub api_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

impl CliArgs {
    /// Log level asked for on the command line; `--verbose` wins
    fn requested_log_level(&self) -> Option<&str> {
        if self.verbose {
            Some("debug")
        } else {
            self.log_level.as_deref()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        ConfigManager::load_from_env()?
    };

    // Tracing must be up before the CLI merge logs its overrides
    let log_level = args.requested_log_level();
    init_tracing(log_level.unwrap_or(config.logging.level.as_str()))?;

    config.merge_with_cli_args(
        args.relay_port,
        args.api_port,
        args.metrics_port,
        args.api_key.as_deref(),
        log_level,
    );

    info!("Starting PLG relay v{}", env!("CARGO_PKG_VERSION"));

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  UDP relay: {}", config.udp_addr());
        info!("  Control API: {}", config.api_addr());
        info!("  Metrics: {}", config.metrics_addr());
        info!("  Max sessions: {}", config.sessions.max_sessions);
        info!("  Idle timeout: {:?}", config.sessions.idle_timeout);
        info!("  Reaper interval: {:?}", config.sessions.reaper_interval);
        info!("  Socket buffer: {} bytes", config.relay.socket_buffer);
        return Ok(());
    }

    let shutdown = ShutdownCoordinator::new(config.relay.shutdown_timeout);
    let server = RelayServer::bind(config).await?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
            signals.trigger();
        }
    });

    info!("Press Ctrl+C or send SIGTERM/SIGINT to shutdown gracefully");
    server.run(shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging. `RUST_LOG` takes precedence over `level`.
fn init_tracing(level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
