//! Hostlink Agent - host telemetry collection
//!
//! Collects host records, buffers them in memory and ships them to the
//! console or to the ingestion service.

use clap::{Parser, Subcommand, ValueEnum};
use hostlink_cloud::{device_identifier, CloudConnector, CloudError};
use hostlink_core::config::{AgentConfig, ConfigLoader};
use hostlink_core::{AgentRuntime, ConfigWatcher, ConsoleEventOutput, EventOutput};
use hostlink_sources::default_factories;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Time allowed for services to stop and the final flush to finish
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "hostlink-agent")]
#[command(version)]
#[command(about = "Host telemetry agent", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "HOSTLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted (default)
    Run,

    /// Load and validate the configuration, then print it
    CheckConfig,

    /// Print this machine's device identifier
    DeviceId,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loader = ConfigLoader::new().with_cli_path(cli.config.clone());

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let config = loader.load()?;
            init_logging(cli.verbose, cli.log_format, &config.agent.log_level)?;
            run(config, loader).await
        }
        Commands::CheckConfig => {
            let config = loader.load()?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::DeviceId => {
            println!("{}", device_identifier());
            Ok(())
        }
    }
}

/// `RUST_LOG` wins, then `-v`, then the configured level
fn init_logging(verbose: u8, format: LogFormat, config_level: &str) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config_level.to_lowercase(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&level))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))
}

async fn run(config: AgentConfig, loader: ConfigLoader) -> anyhow::Result<()> {
    info!(
        version = hostlink_core::AGENT_VERSION,
        endpoint = %config.output.endpoint,
        "Hostlink agent starting"
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let output: Arc<dyn EventOutput> = if config.output.is_console() {
        Arc::new(ConsoleEventOutput::new())
    } else {
        let connector = CloudConnector::from_config(&config.output)?;
        info!(device_id = device_identifier(), "Performing agent handshake");
        match connector.handshake().perform(&shutdown).await {
            Ok(()) => {}
            Err(CloudError::Cancelled) => {
                info!("Shutdown requested before the handshake completed");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        connector.output()
    };

    let runtime = Arc::new(
        AgentRuntime::builder(config)
            .factories(default_factories())
            .output(output)
            .shutdown_grace(SHUTDOWN_GRACE)
            .build(),
    );
    runtime.start();

    let _watcher = match loader.find_config_file() {
        Some(path) => {
            match ConfigWatcher::spawn(path, loader, runtime.clone(), shutdown.child_token()) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(error = %e, "Configuration changes will not be picked up");
                    None
                }
            }
        }
        None => None,
    };

    shutdown.cancelled().await;
    info!("Shutting down");
    runtime.stop().await;
    info!("Hostlink agent stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
