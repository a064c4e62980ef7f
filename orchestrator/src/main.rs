//! Entry point for the DAEMON orchestrator: connects to every declared
//! node, builds the command catalog, then either serves the HTTP bridge
//! or runs a single instruction and exits. Grounded on `main`/`parse_args`/
//! `repl` in `orchestrator.py`, translated from a blocking REPL loop to a
//! `clap` CLI plus an optional `axum` server.

use clap::Parser;
use daemon_protocol::correlation::new_correlation_id;
use orchestrator::catalog::{Catalog, CatalogEntry};
use orchestrator::executor::Executor;
use orchestrator::http_bridge::{self, AppState};
use orchestrator::planner::PlannerAdapter;
use orchestrator::session::NodeSession;
use orchestrator::validator::validate_plan;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "daemon-orchestrator", about = "DAEMON central orchestrator")]
struct Cli {
    /// Node endpoint as `alias=host:port`, repeatable, at least one required.
    #[arg(long = "node", required = true)]
    nodes: Vec<String>,

    /// Remote planner URL (e.g. https://.../plan).
    #[arg(long)]
    planner_url: Option<String>,

    /// Pi vision brain URL for `/pi_vision_step` pass-through.
    #[arg(long)]
    vision_brain_url: Option<String>,

    /// Subscribe to node telemetry.
    #[arg(long)]
    telemetry: bool,

    /// One-shot instruction; mutually exclusive with `--http-port`.
    #[arg(long)]
    instruction: Option<String>,

    /// Per-step (RUN/STOP) timeout in seconds.
    #[arg(long, default_value_t = 4.0)]
    step_timeout: f64,

    /// Connect/HELLO timeout in seconds.
    #[arg(long, default_value_t = 7.0)]
    timeout: f64,

    /// HTTP bridge bind host.
    #[arg(long, default_value = "127.0.0.1")]
    http_host: String,

    /// HTTP bridge bind port; when set, the bridge is served.
    #[arg(long)]
    http_port: Option<u16>,
}

struct NodeArg {
    alias: String,
    host: String,
    port: u16,
}

fn parse_node_arg(raw: &str) -> anyhow::Result<NodeArg> {
    let (alias, endpoint) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("--node must be in format alias=host:port, got '{raw}'"))?;
    let (host, port_raw) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("--node must be in format alias=host:port, got '{raw}'"))?;
    if alias.is_empty() || host.is_empty() {
        anyhow::bail!("invalid --node value '{raw}'");
    }
    let port: u16 = port_raw
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid port in --node: '{port_raw}'"))?;
    Ok(NodeArg {
        alias: alias.to_string(),
        host: host.to_string(),
        port,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if cli.instruction.is_some() && cli.http_port.is_some() {
        anyhow::bail!("--instruction and --http-port are mutually exclusive");
    }

    let node_args: Vec<NodeArg> = cli.nodes.iter().map(|raw| parse_node_arg(raw)).collect::<anyhow::Result<_>>()?;
    let connect_timeout = Duration::from_secs_f64(cli.timeout);
    let step_timeout = Duration::from_secs_f64(cli.step_timeout);

    let sessions: Vec<Arc<NodeSession>> = node_args
        .iter()
        .map(|n| NodeSession::new(n.alias.clone(), n.host.clone(), n.port, connect_timeout))
        .collect();

    let mut entries = Vec::new();
    for session in &sessions {
        match session.connect().await {
            Ok(manifest) => {
                if cli.telemetry {
                    if let Err(err) = session.subscribe_telemetry(connect_timeout).await {
                        warn!(alias = %session.alias, error = %err, "failed to subscribe telemetry");
                    }
                }
                info!(
                    alias = %session.alias,
                    node_name = %manifest.device.name,
                    node_id = %manifest.device.node_id,
                    commands = manifest.commands.len(),
                    "connected"
                );
                entries.push(CatalogEntry {
                    session: session.clone(),
                    alias: session.alias.clone(),
                    node_name: manifest.device.name.clone(),
                    node_id: manifest.device.node_id.clone(),
                    manifest,
                });
            }
            Err(err) => {
                // §7 "degraded mode": connect failures don't abort startup.
                error!(alias = %session.alias, error = %err, "failed to connect, continuing in degraded mode");
            }
        }
    }

    let catalog = Catalog::build(entries);
    let executor = Executor::new(sessions.clone(), step_timeout);
    let planner = PlannerAdapter::new(cli.planner_url.clone());

    if let Some(instruction) = &cli.instruction {
        let correlation_id = new_correlation_id("cli");
        run_one_shot(instruction, &catalog, &executor, &planner, &correlation_id).await;
    } else if let Some(port) = cli.http_port {
        serve_http(sessions, catalog, executor, planner, cli.vision_brain_url, &cli.http_host, port).await?;
    } else {
        info!("no --instruction and no --http-port given; connected and idle");
    }

    let cid = new_correlation_id("shutdown");
    let errors = executor.emergency_stop(&cid).await;
    if !errors.is_empty() {
        warn!(errors = ?errors, "emergency stop at shutdown reported failures");
    }
    for session in &sessions {
        session.unsubscribe_telemetry(Duration::from_millis(500)).await;
        session.shutdown().await;
    }

    Ok(())
}

async fn run_one_shot(
    instruction: &str,
    catalog: &Catalog,
    executor: &Executor,
    planner: &PlannerAdapter,
    correlation_id: &str,
) {
    let system_manifest = json!({
        "daemon_version": "0.1",
        "nodes": catalog.entries().iter().map(|e| json!({
            "name": e.alias,
            "node_id": e.node_id,
            "display_name": e.node_name,
            "commands": e.manifest.commands,
        })).collect::<Vec<_>>(),
    });
    let telemetry_snapshot = json!({});

    let planned = planner.make_plan(instruction, &system_manifest, &telemetry_snapshot, correlation_id).await;
    let raw = serde_json::to_value(&planned).unwrap_or_else(|_| json!({"plan": []}));

    match validate_plan(&raw, catalog) {
        Ok(plan) => match executor.execute_plan(&plan, catalog, correlation_id).await {
            Ok(()) => info!(correlation_id = %correlation_id, "plan executed"),
            Err(err) => error!(correlation_id = %correlation_id, error = %err, "plan execution failed"),
        },
        Err(err) => error!(correlation_id = %correlation_id, error = %err, "fallback/planner plan rejected by validator"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_http(
    sessions: Vec<Arc<NodeSession>>,
    catalog: Catalog,
    executor: Executor,
    planner: PlannerAdapter,
    vision_brain_url: Option<String>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        sessions,
        catalog: RwLock::new(catalog),
        executor,
        planner,
        vision_brain_url,
        http: reqwest::Client::new(),
    });

    let addr = SocketAddr::new(IpAddr::from_str(host)?, port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP bridge listening");

    let app = http_bridge::router(state.clone());

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Ctrl+C received, issuing emergency stop before exit");
            let cid = new_correlation_id("sigint");
            let errors = state.executor.emergency_stop(&cid).await;
            if !errors.is_empty() {
                warn!(errors = ?errors, "emergency stop on shutdown reported failures");
            }
        }
    }

    Ok(())
}
