//! §4.C Protocol Client: the serial-line-v1 request vocabulary layered on
//! top of [`crate::session::NodeSession`] — `RUN`/`STOP`/`READ_MANIFEST`,
//! each translating a raw response line into a typed result or an
//! [`OrchestratorError`].

use crate::errors::{OrchestratorError, Result};
use crate::session::NodeSession;
use daemon_protocol::manifest::Manifest;
use daemon_protocol::wire::{run_line, ResponseLine};
use serde_json::Value;
use std::time::Duration;

/// Re-fetch a node's manifest via `READ_MANIFEST` (distinct from the
/// `HELLO` issued once at connect time).
pub async fn read_manifest(session: &NodeSession, timeout: Duration) -> Result<Manifest> {
    let line = session.request("READ_MANIFEST", timeout).await?;
    match daemon_protocol::wire::parse_response(&line) {
        ResponseLine::Manifest(json) => serde_json::from_str(&json).map_err(|err| OrchestratorError::Protocol {
            alias: session.alias.clone(),
            detail: format!("malformed MANIFEST json: {err}"),
        }),
        other => Err(OrchestratorError::Protocol {
            alias: session.alias.clone(),
            detail: format!("expected MANIFEST from READ_MANIFEST, got: {other:?}"),
        }),
    }
}

/// Send `RUN <TOKEN> <args...>` and require `OK`. A node-reported `ERR` is
/// surfaced as [`OrchestratorError::NodeReported`] (§7), never masked.
pub async fn run(session: &NodeSession, token: &str, args: &[Value], timeout: Duration) -> Result<()> {
    let line = run_line(token, args);
    expect_ok(session, &line, timeout).await
}

/// Send `STOP` and require `OK`.
pub async fn stop(session: &NodeSession, timeout: Duration) -> Result<()> {
    expect_ok(session, "STOP", timeout).await
}

async fn expect_ok(session: &NodeSession, line: &str, timeout: Duration) -> Result<()> {
    let reply = session.request(line, timeout).await?;
    match daemon_protocol::wire::parse_response(&reply) {
        ResponseLine::Ok => Ok(()),
        ResponseLine::Err(code, detail) => Err(OrchestratorError::NodeReported {
            alias: session.alias.clone(),
            code: code.as_str().to_string(),
            detail,
        }),
        ResponseLine::Manifest(_) => Err(OrchestratorError::Protocol {
            alias: session.alias.clone(),
            detail: format!("unexpected MANIFEST in response to '{line}'"),
        }),
    }
}

/// Best-effort `STOP` used by emergency stop (§4.F): never raises, returns
/// the failure as a string for the caller to log and keep going.
pub async fn stop_best_effort(session: &NodeSession, timeout: Duration) -> std::result::Result<(), String> {
    match stop(session, timeout).await {
        Ok(()) => Ok(()),
        Err(err) => Err(format!("{}:{err}", session.alias)),
    }
}

