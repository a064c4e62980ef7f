//! §4.B Node Session: per-node connected state — socket, a request
//! serialization lock, the cached manifest, the latest telemetry snapshot,
//! and best-effort reconnect.
//!
//! Concurrency model (§4.B, §9): exactly one logical request in flight per
//! session at a time. This implementation takes the unification the design
//! notes explicitly allow — one background reader task for the lifetime of
//! the connection, multiplexing `TELEMETRY` lines into the snapshot and
//! response lines into a channel the request path awaits on — rather than
//! switching between a direct-read path and a reader task depending on
//! subscription state. The two are observably identical as long as
//! `TELEMETRY ` lines never reach the response channel, which is the
//! invariant §4.A's `LineCodec::classify` gives us for free.

use crate::errors::{OrchestratorError, Result};
use daemon_protocol::codec::{frame, Line, LineCodec};
use daemon_protocol::manifest::{Manifest, TelemetrySnapshot};
use daemon_protocol::wire::{parse_response, ResponseLine};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A connected node: operator-chosen alias plus the `host:port` endpoint it
/// was declared with (§3 "Node session").
pub struct NodeSession {
    pub alias: String,
    pub host: String,
    pub port: u16,
    connect_timeout: Duration,
    state: Mutex<SessionState>,
    telemetry: Arc<Mutex<TelemetrySnapshot>>,
}

#[derive(Default)]
struct SessionState {
    write_half: Option<OwnedWriteHalf>,
    responses: Option<mpsc::UnboundedReceiver<String>>,
    reader: Option<JoinHandle<()>>,
    manifest: Option<Manifest>,
    subscribed: bool,
}

impl SessionState {
    fn connected(&self) -> bool {
        self.write_half.is_some()
    }
}

impl NodeSession {
    pub fn new(alias: impl Into<String>, host: impl Into<String>, port: u16, connect_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            alias: alias.into(),
            host: host.into(),
            port,
            connect_timeout,
            state: Mutex::new(SessionState::default()),
            telemetry: Arc::new(Mutex::new(TelemetrySnapshot::new())),
        })
    }

    /// Dial the node, perform `HELLO`, cache the manifest, and start the
    /// background reader. Returns the manifest so `connect_all` can feed it
    /// straight into the catalog builder (§4.D).
    pub async fn connect(&self) -> Result<Manifest> {
        let mut state = self.state.lock().await;
        self.dial_locked(&mut state).await?;
        let manifest = self.hello_locked(&mut state).await?;
        state.manifest = Some(manifest.clone());
        Ok(manifest)
    }

    async fn dial_locked(&self, state: &mut SessionState) -> Result<()> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| OrchestratorError::Connect {
            alias: self.alias.clone(),
            host: self.host.clone(),
            port: self.port,
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        })?
        .map_err(|source| OrchestratorError::Connect {
            alias: self.alias.clone(),
            host: self.host.clone(),
            port: self.port,
            source,
        })?;

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let telemetry = self.telemetry.clone();
        let alias = self.alias.clone();
        let reader = tokio::spawn(reader_loop(read_half, tx, telemetry, alias));

        if let Some(old) = state.reader.take() {
            old.abort();
        }
        state.write_half = Some(write_half);
        state.responses = Some(rx);
        state.reader = Some(reader);
        state.subscribed = false;
        Ok(())
    }

    async fn hello_locked(&self, state: &mut SessionState) -> Result<Manifest> {
        let line = self.send_and_wait_locked(state, "HELLO", self.connect_timeout).await?;
        match parse_response(&line) {
            ResponseLine::Manifest(json) => serde_json::from_str(&json).map_err(|err| OrchestratorError::Protocol {
                alias: self.alias.clone(),
                detail: format!("malformed MANIFEST json: {err}"),
            }),
            other => Err(OrchestratorError::Protocol {
                alias: self.alias.clone(),
                detail: format!("expected MANIFEST from HELLO, got: {other:?}"),
            }),
        }
    }

    /// Send one request line and wait for its response, within `timeout`.
    /// On a broken connection this performs at most one reconnect-and-resend
    /// (§4.C); if that also fails the error surfaces to the caller.
    pub async fn request(&self, line: &str, timeout: Duration) -> Result<String> {
        let mut state = self.state.lock().await;
        match self.send_and_wait_locked(&mut state, line, timeout).await {
            Ok(reply) => Ok(reply),
            Err(first_err) => {
                warn!(alias = %self.alias, error = %first_err, "request failed, attempting one reconnect-and-resend");
                self.dial_locked(&mut state).await.map_err(|_| first_err)?;
                // Reconnecting loses subscription state; the caller (session
                // manager) is responsible for re-subscribing if it cares.
                self.send_and_wait_locked(&mut state, line, timeout).await
            }
        }
    }

    async fn send_and_wait_locked(&self, state: &mut SessionState, line: &str, timeout: Duration) -> Result<String> {
        if !state.connected() {
            return Err(OrchestratorError::Transport {
                alias: self.alias.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotConnected, "not connected"),
            });
        }
        let write_half = state.write_half.as_mut().expect("checked connected above");
        write_half
            .write_all(&frame(line))
            .await
            .map_err(|source| OrchestratorError::Transport {
                alias: self.alias.clone(),
                source,
            })?;

        let rx = state.responses.as_mut().expect("checked connected above");
        let verb = line.split_whitespace().next().unwrap_or(line).to_string();
        let reply = tokio::time::timeout(timeout, rx.recv())
            .await
            .map_err(|_| OrchestratorError::Timeout {
                alias: self.alias.clone(),
                verb,
                timeout_s: timeout.as_secs_f64(),
            })?
            .ok_or_else(|| OrchestratorError::Transport {
                alias: self.alias.clone(),
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reader task ended"),
            })?;
        Ok(reply)
    }

    pub async fn subscribe_telemetry(&self, timeout: Duration) -> Result<()> {
        let reply = self.request("SUB TELEMETRY", timeout).await?;
        if reply != "OK" {
            return Err(OrchestratorError::Protocol {
                alias: self.alias.clone(),
                detail: format!("SUB TELEMETRY failed: {reply}"),
            });
        }
        self.state.lock().await.subscribed = true;
        Ok(())
    }

    /// Best-effort teardown used by `close_all` (§3 lifecycles, §5 resource
    /// discipline): never blocks shutdown for more than `timeout`.
    pub async fn unsubscribe_telemetry(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.request("UNSUB TELEMETRY", timeout)).await;
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(reader) = state.reader.take() {
            reader.abort();
        }
        if let Some(mut write_half) = state.write_half.take() {
            let _ = write_half.shutdown().await;
        }
        state.responses = None;
    }

    pub async fn manifest(&self) -> Option<Manifest> {
        self.state.lock().await.manifest.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected()
    }

    pub async fn is_subscribed(&self) -> bool {
        self.state.lock().await.subscribed
    }

    pub async fn telemetry_snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.lock().await.clone()
    }

    pub async fn node_id(&self) -> String {
        self.manifest()
            .await
            .map(|m| m.device.node_id)
            .unwrap_or_else(|| self.alias.clone())
    }
}

async fn reader_loop(
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    responses: mpsc::UnboundedSender<String>,
    telemetry: Arc<Mutex<TelemetrySnapshot>>,
    alias: String,
) {
    let mut codec = LineCodec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!(alias = %alias, "node connection closed by peer");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                debug!(alias = %alias, error = %err, "node reader loop ending");
                return;
            }
        };
        codec.push(&buf[..n]);
        for line in codec.drain_lines() {
            match line {
                Line::Telemetry(payload) => {
                    let pairs = daemon_protocol::codec::parse_telemetry_pairs(&payload);
                    let mut snap = telemetry.lock().await;
                    for (k, v) in pairs {
                        snap.insert(k, v);
                    }
                }
                Line::Response(text) => {
                    if responses.send(text).is_err() {
                        // Nobody is listening anymore (session shut down); drop.
                        return;
                    }
                }
            }
        }
    }
}
