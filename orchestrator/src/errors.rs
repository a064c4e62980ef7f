//! Error taxonomy for the orchestrator (§7): connect, protocol, validation,
//! transport, node-reported, planner, and internal failures. Every variant
//! carries enough context to produce the precise messages the error-handling
//! design and its worked scenarios call for (e.g. "step[0] token 'SET' is
//! ambiguous across nodes; explicit target is required").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("connect to {alias} ({host}:{port}) failed: {source}")]
    Connect {
        alias: String,
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol error from {alias}: {detail}")]
    Protocol { alias: String, detail: String },

    #[error("transport error talking to {alias}: {source}")]
    Transport {
        alias: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{alias}: {verb} timed out after {timeout_s}s")]
    Timeout {
        alias: String,
        verb: String,
        timeout_s: f64,
    },

    #[error("node {alias} reported ERR {code} {detail}")]
    NodeReported {
        alias: String,
        code: String,
        detail: String,
    },

    #[error("planner adapter failed: {0}")]
    Planner(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
