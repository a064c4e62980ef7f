//! Entry point for a single DAEMON node process: parses its hardware
//! profile and listen address off the CLI, builds that profile's manifest,
//! and serves `serial-line-v1` until killed.

use clap::{Parser, ValueEnum};
use daemon_protocol::manifest::{Device as DeviceInfo, Manifest, TelemetryKey, TelemetrySchema, Transport};
use node::device::{Device, GripperArm, MecanumBase};
use node::server::{bind_dual_stack, serve, NodeState};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Profile {
    /// RC-car-style mecanum base: FWD/BWD/STRAFE/TURN/MECANUM.
    Mecanum,
    /// Two-state gripper arm: GRIP/HOME.
    Arm,
}

#[derive(Debug, Parser)]
#[command(name = "daemon-node", about = "Serves serial-line-v1 for one hardware profile")]
struct Cli {
    /// Which hardware profile this process drives.
    #[arg(long, value_enum)]
    profile: Profile,

    /// Stable node_id reported in this node's manifest (e.g. "base", "arm").
    #[arg(long)]
    node_id: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 9000)]
    port: u16,
}

fn build_device_and_manifest(profile: Profile, node_id: &str) -> (Box<dyn Device>, Manifest) {
    let (device, device_name): (Box<dyn Device>, &str) = match profile {
        Profile::Mecanum => (Box::new(MecanumBase::new()), "rc-car-mecanum"),
        Profile::Arm => (Box::new(GripperArm::new()), "gripper-arm"),
    };
    let commands = device.commands();
    let manifest = Manifest {
        daemon_version: "0.1".to_string(),
        device: DeviceInfo {
            name: device_name.to_string(),
            node_id: node_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        commands,
        services: None,
        telemetry: TelemetrySchema {
            keys: vec![
                TelemetryKey { name: "uptime_ms".to_string(), key_type: "int".to_string(), unit: Some("ms".to_string()) },
                TelemetryKey { name: "last_token".to_string(), key_type: "string".to_string(), unit: None },
                TelemetryKey { name: "serial_ok".to_string(), key_type: "bool".to_string(), unit: None },
            ],
        },
        transport: Transport::serial_line_v1(),
    };
    (device, manifest)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (device, manifest) = build_device_and_manifest(cli.profile, &cli.node_id);

    tracing::info!(node_id = %cli.node_id, port = cli.port, device = %manifest.device.name, "starting node");

    let state = NodeState::new(cli.node_id.clone(), device, manifest)?;
    let listener = bind_dual_stack(cli.port).await?;
    serve(listener, state).await
}
