//! Beacon CLI
//!
//! Registers a node with the service registry and holds its lease until
//! interrupted, or lists the live nodes of a service.

use anyhow::Context;
use beacon_registry::config::parse_endpoints;
use beacon_registry::observability::{init_tracing, metrics::serve_metrics, TracingConfig};
use beacon_registry::{Node, RegistrationState, RegistryConfig, ServiceRegistry};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Register and discover service nodes in etcd", version)]
struct Cli {
    /// etcd endpoints (comma-separated)
    #[arg(long, env = "ETCD_ENDPOINTS", global = true)]
    etcd_endpoints: Option<String>,

    /// Namespace prefix for registry keys
    #[arg(long, env = "REGISTRY_SCHEME", global = true)]
    scheme: Option<String>,

    /// Log format: text or json
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a node and keep it registered until Ctrl-C
    Register {
        /// Service name
        #[arg(long)]
        service: String,

        /// Node name (default: node-<uuid>)
        #[arg(long)]
        node: Option<String>,

        /// Metadata attribute as key=value, repeatable
        #[arg(long = "meta", value_parser = parse_key_val)]
        meta: Vec<(String, String)>,

        /// Serve Prometheus metrics on this address
        #[arg(long, env = "METRICS_ADDR")]
        metrics_addr: Option<SocketAddr>,
    },
    /// List the live nodes of a service as JSON lines
    List {
        /// Service name
        #[arg(long)]
        service: String,

        /// Print bare node names instead of full keys
        #[arg(long)]
        bare: bool,
    },
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {:?}", raw))?;
    if key.is_empty() {
        return Err(format!("empty key in {:?}", raw));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig::new(cli.log_format.clone()))
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    let mut config = RegistryConfig::from_env().context("invalid registry configuration")?;
    if let Some(endpoints) = &cli.etcd_endpoints {
        config.etcd_endpoints = parse_endpoints(endpoints);
    }
    if let Some(scheme) = &cli.scheme {
        config.scheme = scheme.clone();
    }

    match cli.command {
        Commands::Register {
            service,
            node,
            meta,
            metrics_addr,
        } => run_register(config, service, node, meta, metrics_addr).await,
        Commands::List { service, bare } => {
            config.bare_node_names |= bare;
            run_list(config, &service).await
        }
    }
}

async fn run_register(
    config: RegistryConfig,
    service: String,
    node_name: Option<String>,
    meta: Vec<(String, String)>,
    metrics_addr: Option<SocketAddr>,
) -> anyhow::Result<()> {
    if let Some(addr) = metrics_addr {
        serve_metrics(addr).map_err(|e| anyhow::anyhow!("failed to serve metrics: {}", e))?;
        info!(addr = %addr, "Serving Prometheus metrics");
    }

    info!(endpoints = ?config.etcd_endpoints, scheme = %config.scheme, "Connecting to etcd");
    let registry = ServiceRegistry::connect(&config)
        .await
        .context("failed to connect to etcd")?;

    let node_name = node_name.unwrap_or_else(|| format!("node-{}", uuid::Uuid::new_v4()));
    let node = meta
        .into_iter()
        .fold(Node::new(node_name.clone()), |node, (k, v)| node.with_attr(k, v));

    registry
        .register_service_node(&service, node)
        .context("registration rejected")?;
    let handle = registry
        .registration(&service, &node_name)
        .context("registration handle missing")?;
    info!(service = %service, key = %handle.key(), "Registration started");

    tokio::select! {
        state = handle.wait() => {
            if state == RegistrationState::Done {
                info!(key = %handle.key(), attempts = handle.attempts(), "Registered, holding lease until Ctrl-C");
            }
            tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            if handle.cancel() {
                warn!(key = %handle.key(), attempts = handle.attempts(), "Interrupted before registration succeeded");
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

async fn run_list(config: RegistryConfig, service: &str) -> anyhow::Result<()> {
    let registry = ServiceRegistry::connect(&config)
        .await
        .context("failed to connect to etcd")?;

    let nodes = registry
        .get_service_nodes(service)
        .await
        .with_context(|| format!("failed to list nodes of {}", service))?;

    for node in &nodes {
        println!("{}", serde_json::to_string(node)?);
    }
    info!(service = %service, node_count = nodes.len(), "Listed service nodes");
    Ok(())
}
