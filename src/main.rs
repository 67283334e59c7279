//! MCP Conduit - Main entrypoint.
//!
//! Runs a bare server endpoint over standard input and output, validates
//! configuration files, or writes a default one. Logs go to standard error.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use mcp_conduit::config::{self, ConfigLoader, EngineConfig, LogConfig};
use mcp_conduit::error::{McpError, McpResult};
use mcp_conduit::protocol::{Capability, EndpointBuilder, PingScheduler, Role};
use mcp_conduit::transport::LineTransport;

/// Command line arguments for MCP Conduit.
#[derive(Parser, Debug)]
#[clap(name = "MCP Conduit", version, author, about)]
struct Args {
    /// Path to configuration file
    #[clap(short, long, value_parser)]
    config: Option<PathBuf>,

    /// Command to execute
    #[clap(subcommand)]
    command: Option<Command>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Serve over stdin/stdout until the peer closes the stream
    Serve,

    /// Validate the configuration file
    Validate,

    /// Generate a default configuration file
    GenConfig {
        /// Path to output configuration file
        #[clap(short, long, value_parser)]
        output: PathBuf,
    },
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(log: &LogConfig) -> McpResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_error::ErrorLayer::default());

    let result = if log.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_file(log.source_location)
                    .with_line_number(log.source_location),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_file(log.source_location)
                    .with_line_number(log.source_location)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| McpError::Custom(format!("Failed to set global tracing subscriber: {e}")))
}

/// Main entry point for the application.
fn main() -> McpResult<()> {
    let args = Args::parse();
    let loader = ConfigLoader::new(args.config.as_deref(), config::ENV_PREFIX);
    let loaded = loader.load();

    init_logging(loaded.as_ref().map(|c| &c.log).unwrap_or(&LogConfig::default()))?;
    mcp_conduit::init();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let config = loaded.unwrap_or_else(|e| {
                error!("Configuration error: {}", e);
                process::exit(1);
            });

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.endpoint.worker_threads)
                .thread_name("conduit-worker")
                .enable_all()
                .build()?;
            runtime.block_on(serve(config))
        }
        Command::Validate => match loaded {
            Ok(_) => {
                info!("Configuration validated successfully");
                Ok(())
            }
            Err(e) => {
                error!("Configuration validation error: {}", e);
                process::exit(1);
            }
        },
        Command::GenConfig { output } => {
            info!("Generating default configuration");
            let default_config = EngineConfig::default();

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent).map_err(McpError::Io)?;
            }

            let toml = toml::to_string_pretty(&default_config)
                .map_err(|e| McpError::Custom(format!("Failed to serialize config: {e}")))?;
            std::fs::write(&output, toml).map_err(McpError::Io)?;

            info!("Default configuration written to {:?}", output);
            Ok(())
        }
    }
}

async fn serve(config: EngineConfig) -> McpResult<()> {
    let endpoint = EndpointBuilder::new(Role::Server, &config)
        .capabilities([Capability::Logging])
        .build(Arc::new(LineTransport::stdio()))?;

    info!(
        name = %config.protocol.server_name,
        versions = ?config.protocol.supported_versions,
        "Serving on stdio"
    );

    let _pinger = match config.endpoint.ping_interval() {
        Some(interval) => {
            let target = Arc::clone(&endpoint);
            Some(PingScheduler::start(
                Arc::clone(&endpoint),
                interval,
                config.endpoint.ping_timeout(),
                config.endpoint.max_ping_failures,
                move || {
                    warn!("Peer stopped answering pings, disconnecting");
                    let target = Arc::clone(&target);
                    tokio::spawn(async move {
                        if let Err(e) = target.shutdown().await {
                            warn!(error = %e, "Failed to close unresponsive connection");
                        }
                    });
                },
            )?)
        }
        None => None,
    };

    endpoint.run().await?;
    info!("Connection closed");
    Ok(())
}
