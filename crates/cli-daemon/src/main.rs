//! CLI entry point for the Loopcast daemon
//!
//! Parses command line arguments, initializes logging, and starts the
//! daemon with the dry-run platform.

use clap::Parser;
use loopcast_daemon::{Config, Daemon, DryRunPlatform};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Loopcast - push a looping local video into a live broadcast
#[derive(Parser, Debug)]
#[command(name = "loopcast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg availability). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("loopcast_daemon=info,loopcast=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    info!(config = %args.config.display(), "Loopcast starting");

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let platform = Arc::new(DryRunPlatform::new(config.platform.ingest_url.clone()));

    let daemon_result = if args.skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
        Daemon::new_without_checks(config, platform).await
    } else {
        Daemon::with_config(config, platform).await
    };

    let daemon = match daemon_result {
        Ok(daemon) => daemon,
        Err(e) => {
            error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        port = daemon.config.server.listen_port,
        "Starting API server on http://127.0.0.1:{}/live/status",
        daemon.config.server.listen_port
    );

    if let Err(e) = daemon.run_with_server().await {
        error!("Daemon error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
