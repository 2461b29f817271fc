use clap::{Parser, ValueEnum};
use registry_station::config::{ConfigOverrides, DiscoveryKind, StationConfig};
use registry_station::lifecycle::{self, BackgroundTasks, StationContext};
use registry_station::logging;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DiscoveryArg {
    Registry,
    Static,
}

impl From<DiscoveryArg> for DiscoveryKind {
    fn from(arg: DiscoveryArg) -> Self {
        match arg {
            DiscoveryArg::Registry => DiscoveryKind::Registry,
            DiscoveryArg::Static => DiscoveryKind::Static,
        }
    }
}

/// Cluster-cooperating pull-through cache for container registries.
#[derive(Debug, Parser)]
#[command(name = "station", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "STATION_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "STATION_NODE_ID")]
    node_id: Option<String>,

    /// Host peers use to reach this node.
    #[arg(long, env = "STATION_ADVERTISE_HOST")]
    advertise_host: Option<String>,

    /// Registry API listener.
    #[arg(long, env = "STATION_BIND")]
    bind: Option<SocketAddr>,

    /// Node-to-node listener.
    #[arg(long, env = "STATION_PEER_BIND")]
    peer_bind: Option<SocketAddr>,

    #[arg(long, env = "STATION_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Peer endpoint of the node hosting the shared store. Omit to host it here.
    #[arg(long, env = "STATION_KV_ENDPOINT")]
    kv_endpoint: Option<String>,

    #[arg(long, value_enum, env = "STATION_DISCOVERY")]
    discovery: Option<DiscoveryArg>,

    /// Peer endpoint for static discovery. Repeatable.
    #[arg(long = "seed", value_delimiter = ',', env = "STATION_SEEDS")]
    seeds: Vec<String>,

    /// `text` or `json`
    #[arg(long, env = "STATION_LOG_FORMAT")]
    log_format: Option<String>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            node_id: self.node_id.clone(),
            advertise_host: self.advertise_host.clone(),
            bind: self.bind,
            peer_bind: self.peer_bind,
            data_dir: self.data_dir.clone(),
            kv_endpoint: self.kv_endpoint.clone(),
            discovery: self.discovery.map(Into::into),
            seeds: self.seeds.clone(),
            log_format: self.log_format.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = StationConfig::load(cli.config.as_deref()).await?;
    config.apply(cli.overrides());
    logging::init(&config.logging);

    let bind_addr = config.node.bind;
    let peer_addr = config.node.peer_bind;

    // 1. Components:
    let ctx = StationContext::build(config).await?;

    // 2. Listeners, so peers can reach the shared store before we register:
    let (stop_tx, stop_rx) = watch::channel(false);

    let registry_listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let peer_listener = tokio::net::TcpListener::bind(peer_addr).await?;
    tracing::info!("Registry API listening on {}", bind_addr);
    tracing::info!("Peer API listening on {}", peer_addr);

    let registry_server = tokio::spawn(serve(
        registry_listener,
        lifecycle::control_router(&ctx),
        stop_rx.clone(),
    ));
    let peer_server = tokio::spawn(serve(
        peer_listener,
        lifecycle::internal_router(&ctx),
        stop_rx,
    ));

    // 3. Membership:
    ctx.join().await?;
    let tasks = BackgroundTasks::spawn(&ctx);

    tracing::info!("Press Ctrl+C to shutdown");
    tokio::signal::ctrl_c().await?;

    // 4. Leave the cluster, then stop accepting connections:
    lifecycle::shutdown(&ctx, tasks).await;
    let _ = stop_tx.send(true);

    for server in [registry_server, peer_server] {
        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Server error: {}", e),
            Err(e) => tracing::error!("Server task failed: {}", e),
        }
    }

    Ok(())
}

async fn serve(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    mut stop: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop.changed().await;
        })
        .await
}
