//! TokenSmith - Envoy ext_authz service for cross-cluster token federation

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokensmith::authz::AuthzServer;
use tokensmith::config::{load_clusters_config, ClusterRegistry};
use tokensmith::token::{
    ExchangeConfig, Exchanger, JwksProvider, JwksValidator, KubeManagementClient, ReviewValidator,
    TokenValidator,
};

/// TokenSmith - federates Kubernetes service account tokens across clusters
#[derive(Parser, Debug)]
#[command(name = "tokensmith", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ext_authz gRPC server
    Serve(ServeArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Path to the workload clusters configuration file
    #[arg(long, env = "TOKENSMITH_CONFIG")]
    config: PathBuf,

    /// gRPC listen address
    #[arg(long, default_value = "0.0.0.0:50051")]
    listen: SocketAddr,

    /// Audience for minted management cluster tokens (repeatable)
    #[arg(long = "audience")]
    audiences: Vec<String>,

    /// Requested lifetime of minted tokens in seconds
    #[arg(long, default_value = "3600")]
    token_ttl_secs: i64,

    /// How inbound tokens are validated
    #[arg(long, value_enum, default_value_t = ValidationMode::Jwks)]
    validation_mode: ValidationMode,

    /// Kubeconfig for the workload cluster (token-review mode only).
    /// Empty means in-cluster configuration.
    #[arg(long, env = "WORKLOAD_KUBECONFIG")]
    workload_kubeconfig: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ValidationMode {
    /// Verify token signatures locally against configured JWKS
    Jwks,
    /// Defer verification to the workload cluster's TokenReview API
    TokenReview,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install crypto provider
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install crypto provider");

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => serve(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_clusters_config(&args.config)?;
    let registry = Arc::new(ClusterRegistry::new(config)?);

    info!(
        clusters = registry.clusters().len(),
        config = %args.config.display(),
        "Loaded workload cluster registry"
    );

    // In-cluster client for the management cluster.
    let management = Client::try_default().await?;

    let validator: Arc<dyn TokenValidator> = match args.validation_mode {
        ValidationMode::Jwks => Arc::new(JwksValidator::new(
            registry.clone(),
            Arc::new(JwksProvider::new()),
        )),
        ValidationMode::TokenReview => {
            let workload = workload_client(args.workload_kubeconfig.as_deref()).await?;
            Arc::new(ReviewValidator::new(workload))
        }
    };

    let exchange_config = ExchangeConfig {
        audiences: args.audiences,
        ttl_seconds: args.token_ttl_secs,
        ..ExchangeConfig::default()
    };
    let exchanger = Arc::new(Exchanger::new(
        Arc::new(KubeManagementClient::new(management)),
        exchange_config,
    ));

    let server = AuthzServer::new(validator, exchanger.clone(), args.listen);
    server
        .run_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    exchanger.stop();

    Ok(())
}

/// Build a client for the workload cluster
///
/// Loads the given kubeconfig when a path is provided, otherwise falls
/// back to the ambient (in-cluster or default) configuration.
async fn workload_client(kubeconfig_path: Option<&std::path::Path>) -> anyhow::Result<Client> {
    match kubeconfig_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(config)?)
        }
        None => Ok(Client::try_default().await?),
    }
}
