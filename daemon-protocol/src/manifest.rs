//! The node manifest: a node's self-description, returned on `HELLO` /
//! `READ_MANIFEST` as `MANIFEST <compact-json>`.
//!
//! See spec.md §3 ("Node manifest", "Command spec").

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A node's full self-description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default = "default_daemon_version")]
    pub daemon_version: String,
    pub device: Device,
    #[serde(default)]
    pub commands: Vec<CommandSpec>,
    /// Optional service endpoints the node also exposes (e.g. a camera's
    /// HTTP snapshot URL). Opaque to the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<Value>,
    #[serde(default)]
    pub telemetry: TelemetrySchema,
    pub transport: Transport,
}

fn default_daemon_version() -> String {
    "0.1".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub node_id: String,
    pub version: String,
}

/// One entry in `commands`: a unique uppercase token, a description, its
/// argument schema, and the safety envelope the node enforces locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandSpec {
    pub token: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    pub safety: Safety,
    /// Synonyms/examples consumed only by the (out-of-scope) NLP planner.
    /// Carried through so a real node's manifest JSON round-trips losslessly;
    /// the orchestrator never reads it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nlp: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArgSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    Int,
    Float,
    Bool,
    String,
}

/// Safety envelope a node declares and enforces locally (§3, §4.I).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Safety {
    pub rate_limit_hz: f64,
    pub watchdog_ms: u64,
    #[serde(default)]
    pub clamp: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySchema {
    #[serde(default)]
    pub keys: Vec<TelemetryKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryKey {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transport {
    #[serde(rename = "type")]
    pub transport_type: String,
}

impl Transport {
    pub fn serial_line_v1() -> Self {
        Self {
            transport_type: "serial-line-v1".to_string(),
        }
    }
}

/// Snapshot of a node's latest telemetry key/value pairs, as maintained by
/// the orchestrator's `NodeSession` and published by the node on `TELEMETRY`
/// lines (§4.A).
pub type TelemetrySnapshot = HashMap<String, String>;

/// Render a manifest as the single-line compact JSON required on the wire:
/// no extra whitespace, separators `,` and `:` (§6).
pub fn manifest_line(manifest: &Manifest) -> Result<String, serde_json::Error> {
    Ok(format!("MANIFEST {}", serde_json::to_string(manifest)?))
}
