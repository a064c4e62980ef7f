//! §4.I Node Server Runtime: the line-protocol server every node runs.
//! Accepts any number of concurrent client connections (the orchestrator is
//! expected to hold exactly one at a time, but the server itself imposes no
//! such limit — mirrors `mecanum_daemon_node.py`'s unrestricted `accept()` loop),
//! publishes its manifest, relays telemetry to subscribers, enforces the
//! node-wide rate limit and watchdog, and dispatches `RUN`/`STOP` to the
//! device.

use crate::device::Device;
use crate::watchdog::{RateLimiter, Watchdog};
use daemon_protocol::codec::{frame, Line, LineCodec};
use daemon_protocol::manifest::{manifest_line, Manifest, TelemetrySnapshot};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Shared state for one node process: exactly the quantities §4.I says live
/// node-wide rather than per-connection (`last_cmd_ms`, the node's single
/// `watchdog_ms`, and its `min_cmd_interval_ms`).
pub struct NodeState {
    pub node_id: String,
    manifest: Manifest,
    manifest_line: String,
    device: Mutex<Box<dyn Device>>,
    telemetry: Mutex<TelemetrySnapshot>,
    rate_limiter: RateLimiter,
    watchdog: Arc<Watchdog>,
    last_cmd_ms: AtomicU64,
    started_at: SystemTime,
    telemetry_tx: broadcast::Sender<String>,
}

fn now_ms(epoch: SystemTime) -> u64 {
    SystemTime::now()
        .duration_since(epoch)
        .unwrap_or_default()
        .as_millis() as u64
}

impl NodeState {
    pub fn new(node_id: String, device: Box<dyn Device>, manifest: Manifest) -> anyhow::Result<Arc<Self>> {
        let commands = manifest.commands.clone();
        let watchdog_ms = commands.iter().map(|c| c.safety.watchdog_ms).min().unwrap_or(1200);
        let min_rate_hz = commands
            .iter()
            .map(|c| c.safety.rate_limit_hz)
            .filter(|hz| *hz > 0.0)
            .fold(f64::INFINITY, f64::min);
        let rate_limit_hz = if min_rate_hz.is_finite() { min_rate_hz } else { 0.0 };
        let line = manifest_line(&manifest)?;
        let (telemetry_tx, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            node_id,
            manifest,
            manifest_line: line,
            device: Mutex::new(device),
            telemetry: Mutex::new(TelemetrySnapshot::new()),
            rate_limiter: RateLimiter::new(rate_limit_hz),
            watchdog: Watchdog::new(watchdog_ms),
            last_cmd_ms: AtomicU64::new(0),
            started_at: SystemTime::now(),
            telemetry_tx,
        }))
    }

    async fn publish_telemetry(&self) {
        let uptime = self
            .started_at
            .elapsed()
            .unwrap_or_default()
            .as_millis();
        let last_token = {
            let snap = self.telemetry.lock().await;
            snap.get("last_token").cloned().unwrap_or_else(|| "NONE".to_string())
        };
        let line = format!("TELEMETRY uptime_ms={uptime} last_token={last_token} serial_ok=true");
        {
            let mut snap = self.telemetry.lock().await;
            snap.insert("uptime_ms".to_string(), uptime.to_string());
            snap.insert("last_token".to_string(), last_token);
            snap.insert("serial_ok".to_string(), "true".to_string());
        }
        // No subscribers is not an error; broadcast::Sender::send only fails
        // when there are zero receivers.
        let _ = self.telemetry_tx.send(line);
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn record_last_token(&self, token: &str) {
        let mut snap = self.telemetry.lock().await;
        snap.insert("last_token".to_string(), token.to_string());
    }

    async fn safe_stop(&self) {
        let mut device = self.device.lock().await;
        if let Err(err) = device.stop() {
            warn!(node = %self.node_id, error = %err, "safety stop reported an error; treated as best-effort");
        }
    }
}

/// Periodic telemetry publisher; runs for the lifetime of the node.
async fn telemetry_task(state: Arc<NodeState>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        state.publish_telemetry().await;
    }
}

/// Background watchdog: fires a safe stop whenever an armed node goes
/// `watchdog_ms` without a `RUN`, then re-arms on the next `RUN` (§4.I tick
/// handler — expressed here as an event-driven wait rather than a fixed-rate
/// poll, an equivalent implementation per the node's own design notes).
async fn watchdog_task(state: Arc<NodeState>) {
    loop {
        let fired = state.watchdog.clone().run().await;
        if !fired {
            // Disarmed externally (e.g. shutdown); nothing left to watch.
            return;
        }
        info!(node = %state.node_id, "watchdog expired with no RUN; issuing safety stop");
        state.safe_stop().await;
        state.watchdog.disarm();
    }
}

/// Bind a dual-stack listener: try `[::]:port` first so IPv4 and IPv6
/// clients are both served off one socket, falling back to `0.0.0.0:port`
/// on platforms/binds where IPv6 is unavailable. Grounded on `bind_server()`
/// in `mecanum_daemon_node.py`.
pub async fn bind_dual_stack(port: u16) -> std::io::Result<TcpListener> {
    match TcpListener::bind(("::", port)).await {
        Ok(listener) => {
            info!(port, "bound dual-stack IPv6 listener");
            Ok(listener)
        }
        Err(err) => {
            warn!(port, error = %err, "IPv6 bind failed, falling back to IPv4");
            let listener = TcpListener::bind(("0.0.0.0", port)).await?;
            info!(port, "bound IPv4 listener");
            Ok(listener)
        }
    }
}

/// Run the accept loop until the listener is dropped or an unrecoverable
/// accept error occurs. Spawns the telemetry and watchdog background tasks
/// alongside it.
pub async fn serve(listener: TcpListener, state: Arc<NodeState>) -> anyhow::Result<()> {
    tokio::spawn(telemetry_task(state.clone(), std::time::Duration::from_millis(250)));
    tokio::spawn(watchdog_task(state.clone()));

    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            debug!(node = %state.node_id, %peer, "client connected");
            if let Err(err) = handle_connection(socket, state.clone()).await {
                debug!(node = %state.node_id, %peer, error = %err, "connection closed with error");
            }
            // Deadman: whatever state the line protocol leaves the node in,
            // a dropped connection always stops the hardware (grounded on
            // the `finally: stop()` in `mecanum_daemon_node.py`'s client_loop,
            // independent of and in addition to the watchdog).
            state.safe_stop().await;
            debug!(node = %state.node_id, %peer, "client disconnected; safety stop issued");
        });
    }
}

async fn handle_connection(mut socket: TcpStream, state: Arc<NodeState>) -> anyhow::Result<()> {
    let mut codec = LineCodec::new();
    let mut read_buf = [0u8; 4096];
    let mut subscribed = false;
    let mut telemetry_rx = state.telemetry_tx.subscribe();

    loop {
        tokio::select! {
            biased;
            n = socket.read(&mut read_buf) => {
                let n = n?;
                if n == 0 {
                    return Ok(());
                }
                codec.push(&read_buf[..n]);
                for line in codec.drain_lines() {
                    match line {
                        Line::Telemetry(_) => {
                            // A client never legitimately sends TELEMETRY; ignore.
                        }
                        Line::Response(text) => {
                            if let Some(reply) = dispatch(&text, &state, &mut subscribed).await {
                                socket.write_all(&frame(&reply)).await?;
                            }
                        }
                    }
                }
            }
            telemetry = telemetry_rx.recv(), if subscribed => {
                match telemetry {
                    Ok(line) => {
                        socket.write_all(&frame(&line)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                }
            }
        }
    }
}

/// Handle one already-framed request line, per §4.I items 1-4. Returns the
/// reply line to write back, or `None` for a line that requires no
/// immediate reply (there are none today, but kept `Option` for symmetry
/// with the async telemetry path).
async fn dispatch(line: &str, state: &Arc<NodeState>, subscribed: &mut bool) -> Option<String> {
    let line = line.trim();
    if line == "HELLO" || line == "READ_MANIFEST" {
        return Some(state.manifest_line.clone());
    }
    if line == "SUB TELEMETRY" {
        *subscribed = true;
        return Some("OK".to_string());
    }
    if line == "UNSUB TELEMETRY" {
        *subscribed = false;
        return Some("OK".to_string());
    }
    if line == "STOP" {
        state.safe_stop().await;
        state.watchdog.disarm();
        return Some("OK".to_string());
    }
    if let Some(rest) = line.strip_prefix("RUN ") {
        return Some(handle_run(rest.trim(), state).await);
    }
    if line == "RUN" {
        return Some("ERR BAD_ARGS missing_token".to_string());
    }
    Some("ERR BAD_REQUEST unsupported".to_string())
}

async fn handle_run(rest: &str, state: &Arc<NodeState>) -> String {
    if !state.rate_limiter.allow() {
        return "ERR RATE_LIMIT too_fast".to_string();
    }
    let mut parts = rest.split_whitespace();
    let Some(token) = parts.next() else {
        return "ERR BAD_ARGS missing_token".to_string();
    };
    let token = token.to_uppercase();
    let args: Vec<String> = parts.map(|s| s.to_string()).collect();

    let result = {
        let mut device = state.device.lock().await;
        device.run(&token, &args)
    };

    match result {
        Ok(()) => {
            state.last_cmd_ms.store(now_ms(UNIX_EPOCH), Ordering::SeqCst);
            state.watchdog.bump();
            state.record_last_token(&token).await;
            "OK".to_string()
        }
        Err(err) => format!("ERR {} {}", err.code(), err.detail()),
    }
}
