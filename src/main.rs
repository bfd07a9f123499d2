//! cloud-backend-mcp: MCP server exposing cloud backend tools over stdio or
//! Streamable HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use cloud_backend_mcp::config::{self, Config, TransportKind};
use cloud_backend_mcp::error::{ConfigError, StartupError};
use cloud_backend_mcp::mcp::ToolRegistry;
use cloud_backend_mcp::startup;

/// MCP server exposing cloud backend tools.
///
/// Speaks newline-delimited JSON-RPC on stdin/stdout when launched by a
/// client, or serves Streamable HTTP sessions on a single endpoint.
#[derive(Parser, Debug)]
#[command(name = "cloud-backend-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// Transport to serve on (stdio or http)
    #[arg(long, value_name = "KIND")]
    transport: Option<TransportKind>,

    /// HTTP host to bind, and to probe before starting on stdio
    #[arg(long)]
    host: Option<String>,

    /// HTTP port to bind, and to probe before starting on stdio
    #[arg(long)]
    port: Option<u16>,

    /// HTTP endpoint path
    #[arg(long)]
    path: Option<String>,

    /// Serve HTTP even when stdin and stdout are piped
    #[arg(long)]
    force_http: bool,
}

impl Args {
    /// Applies CLI flags on top of file and environment settings.
    fn apply_to(&self, cfg: &mut Config) {
        if let Some(kind) = self.transport {
            cfg.transport.kind = kind;
        }
        if let Some(host) = &self.host {
            cfg.transport.host.clone_from(host);
        }
        if let Some(port) = self.port {
            cfg.transport.port = port;
        }
        if let Some(path) = &self.path {
            cfg.transport.path.clone_from(path);
        }
        if self.force_http {
            cfg.transport.force_http = true;
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the file, then layers environment variables and CLI flags on top.
fn load_settings(args: &Args) -> Result<Config, ConfigError> {
    let mut cfg = config::load_config(args.config.as_deref())?;
    cfg.apply_env()?;
    args.apply_to(&mut cfg);
    cfg.validate()?;
    Ok(cfg)
}

/// Entry point for the cloud-backend-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match load_settings(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if args.config.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig is read from: {}", default_path.display());
                }
            }
            return ExitCode::FAILURE;
        }
    };

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = %cfg.transport.kind,
        endpoint = %cfg.transport.endpoint(),
        path = %cfg.transport.path,
        "Starting cloud-backend-mcp server"
    );

    // Backend tools register here; the transport layer serves whatever is present.
    let tools = Arc::new(ToolRegistry::new());
    info!(tools = tools.len(), "Tool registry ready");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(startup::run(&cfg, tools));

    // A blocked stdin read must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(StartupError::EndpointOccupied { .. }) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
