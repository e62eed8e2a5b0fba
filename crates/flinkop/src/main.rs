use clap::{Parser, Subcommand, ValueEnum};
use flinkop_controller::{
    desired_state, ApiClient, ClusterController, ControllerConfig, FlinkRestClient, GatewayConfig,
};
use flinkop_core::FlinkCluster;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "flinkop", about = "Flink cluster operator")]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against an API server
    Run {
        /// API server URL
        #[arg(long, env = "FLINKOP_API_URL", default_value = "http://127.0.0.1:8001")]
        api_url: String,
        /// File holding the bearer token
        #[arg(long, env = "FLINKOP_TOKEN_FILE")]
        token_file: Option<PathBuf>,
        /// PEM bundle to verify the API server certificate
        #[arg(long, env = "FLINKOP_CA_FILE")]
        ca_file: Option<PathBuf>,
        /// Namespace to watch, all namespaces if omitted
        #[arg(long, env = "FLINKOP_NAMESPACE", default_value = "")]
        namespace: String,
        /// Seconds between resyncs
        #[arg(long, default_value_t = 10)]
        resync_interval: u64,
        /// Upper bound on one reconciliation pass, in seconds
        #[arg(long, default_value_t = 360)]
        pass_timeout: u64,
        /// Timeout for JobManager job listing, in seconds
        #[arg(long, default_value_t = 15)]
        probe_timeout: u64,
        /// How long to wait for a savepoint, in seconds
        #[arg(long, default_value_t = 300)]
        savepoint_timeout: u64,
        /// Failed passes tolerated before a cluster is marked Failed
        #[arg(long, default_value_t = 5)]
        max_write_retries: u32,
        /// Passes allowed to run at the same time
        #[arg(long, default_value_t = 4)]
        max_concurrent_passes: usize,
    },
    /// Print the resources a FlinkCluster manifest converts to
    Render {
        /// Path to a FlinkCluster manifest
        #[arg(short = 'f', long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            api_url,
            token_file,
            ca_file,
            namespace,
            resync_interval,
            pass_timeout,
            probe_timeout,
            savepoint_timeout,
            max_write_retries,
            max_concurrent_passes,
        } => {
            let gateway_config = GatewayConfig {
                api_url,
                token_file,
                ca_file,
                ..Default::default()
            };
            let controller_config = ControllerConfig {
                namespace,
                resync_interval: Duration::from_secs(resync_interval),
                pass_timeout: Duration::from_secs(pass_timeout),
                probe_timeout: Duration::from_secs(probe_timeout),
                savepoint_timeout: Duration::from_secs(savepoint_timeout),
                max_write_retries,
                max_concurrent_passes,
                ..Default::default()
            };
            run_controller(gateway_config, controller_config).await
        }
        Commands::Render { file } => render(&file),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Run the controller until ctrl-c
async fn run_controller(
    gateway_config: GatewayConfig,
    controller_config: ControllerConfig,
) -> miette::Result<()> {
    info!("Starting flinkop against {}", gateway_config.api_url);

    let gateway = Arc::new(ApiClient::from_config(&gateway_config)?);
    let manager = Arc::new(FlinkRestClient::new(controller_config.probe_timeout)?);
    let controller = ClusterController::new(gateway, manager, controller_config);

    let token = CancellationToken::new();
    let controller_token = token.clone();
    let controller_handle = tokio::spawn(async move {
        if let Err(e) = controller.run(controller_token).await {
            error!("Controller error: {}", e);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    token.cancel();

    // In-flight passes may be waiting on a savepoint
    let shutdown_timeout = Duration::from_secs(30);
    if tokio::time::timeout(shutdown_timeout, controller_handle)
        .await
        .is_err()
    {
        error!("Controller did not stop within {:?}", shutdown_timeout);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Convert a manifest offline and print the result as YAML
fn render(file: &std::path::Path) -> miette::Result<()> {
    let cluster = FlinkCluster::from_yaml_file(file)?;
    let desired = desired_state(Some(&cluster))?;
    print!("{}", desired.to_yaml()?);
    Ok(())
}
