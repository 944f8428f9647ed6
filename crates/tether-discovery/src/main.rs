//! Tether Agent - register an instance or watch a service from the shell

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tether_discovery::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use tether_discovery::{
    version, DialOptions, Discovery, DiscoveryConfig, EtcdCoordinationClient,
    MembershipWatcherBuilder, Registry,
};
use tether_core::{CoordinationClient, ResolverRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

#[derive(Parser)]
#[command(name = "tether-agent", version = version::VERSION, about = "Lease-backed service discovery over etcd")]
struct Cli {
    /// Serve Prometheus metrics on this address
    #[arg(long, env = "TETHER_METRICS_ADDR", global = true)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Register an address and hold its lease until interrupted
    Register {
        address: String,
        #[arg(long, default_value = "")]
        metadata: String,
    },
    /// Print every address list published for a target as a JSON line
    Watch {
        /// Defaults to `{scheme}://{base_path}` from the environment
        #[arg(long)]
        target: Option<String>,
    },
    /// Print build information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::Version = cli.command {
        println!("{}", version::build_info());
        return Ok(());
    }

    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!(e))?;
    if let Some(listen) = cli.metrics_addr {
        init_metrics(listen).map_err(|e| anyhow!(e))?;
        info!(listen = %listen, "Metrics endpoint started");
    }

    let config = DiscoveryConfig::from_env();
    info!(
        version = %version::full_version(),
        endpoints = ?config.etcd_endpoints,
        base_path = %config.base_path,
        "Starting tether agent"
    );

    let client: Arc<dyn CoordinationClient> = Arc::new(
        EtcdCoordinationClient::connect(&config.etcd_endpoints, config.keepalive_interval)
            .await
            .context("connecting to etcd")?,
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            shutdown.cancel();
        }
    });

    let result = match cli.command {
        Command::Register { address, metadata } => {
            register(client, &config, &address, &metadata, &shutdown).await
        }
        Command::Watch { target } => watch(client, &config, target, &shutdown).await,
        Command::Version => Ok(()),
    };

    shutdown_tracing();
    result
}

async fn register(
    client: Arc<dyn CoordinationClient>,
    config: &DiscoveryConfig,
    address: &str,
    metadata: &str,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let span = info_span!("registry", base_path = %config.base_path);
    let registry = Registry::new(client, config, span);

    // Own token so Ctrl-C revokes instead of just abandoning the lease
    let ctx = CancellationToken::new();
    let registration = registry
        .register(&ctx, address, metadata)
        .await
        .with_context(|| format!("registering {address}"))?;
    info!(
        key = %registration.key(),
        metadata = %registration.instance().metadata,
        lease_id = %registration.lease().id,
        ttl_secs = registration.lease().ttl.as_secs(),
        "Holding lease, Ctrl-C to revoke"
    );

    shutdown.cancelled().await;
    if !registration.is_alive() {
        warn!(key = %registration.key(), "Keep-alive had already stopped");
    }
    // Ctrl-C already fired; the revoke is bounded by its own deadline
    registration.revoke(&CancellationToken::new()).await;
    Ok(())
}

async fn watch(
    client: Arc<dyn CoordinationClient>,
    config: &DiscoveryConfig,
    target: Option<String>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    let span = info_span!("resolver", scheme = %config.scheme);
    let registry = Arc::new(ResolverRegistry::new());
    registry.register(Arc::new(MembershipWatcherBuilder::new(client, config, span)));

    let target = target.unwrap_or_else(|| config.target().to_string());
    let options = DialOptions {
        block: false,
        ..DialOptions::from_config(config)
    };
    let connection = Discovery::new(registry, target.clone(), options)
        .dial(shutdown)
        .await
        .with_context(|| format!("dialing {target}"))?;

    let mut updates = connection.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!(resolver_target = %target, "Resolver stopped, no further updates");
                    break;
                }
                let published = updates.borrow_and_update().clone();
                if let Some(addresses) = published {
                    println!("{}", serde_json::to_string(&addresses)?);
                }
            }
        }
    }

    connection.close().await;
    Ok(())
}
