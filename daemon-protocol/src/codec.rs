//! §4.A Line Codec: frames newline-delimited UTF-8 lines out of a growing
//! byte buffer fed by repeated socket reads, and classifies each complete
//! line as a response line or an asynchronous `TELEMETRY` line.
//!
//! This is pure and I/O-free by design (§4.A, §9 design notes) so both the
//! orchestrator's direct-read path and its background telemetry reader, and
//! the node server's per-connection reader, can share one framing
//! implementation and never disagree about what counts as "a line".

/// The sole discriminator between a response line and an asynchronous
/// telemetry line (§4.A, §5).
pub const TELEMETRY_PREFIX: &str = "TELEMETRY ";

/// A line classified by [`LineCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    /// A `TELEMETRY k1=v1 k2=v2 ...` line, payload already stripped of the prefix.
    Telemetry(String),
    /// Anything else: a `MANIFEST ...`, `OK`, `ERR ...` response line.
    Response(String),
}

/// Owns a per-session growing byte buffer and extracts complete lines from
/// it. Partial reads accumulate until a `\n` is seen; decode errors use
/// replacement rather than raising, per §4.A.
#[derive(Debug, Default)]
pub struct LineCodec {
    buf: Vec<u8>,
}

impl LineCodec {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Feed freshly-read bytes into the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull out every complete line currently buffered, in order. Empty
    /// lines are ignored (§4.A). Remaining partial bytes (no trailing `\n`
    /// yet) stay buffered for the next `push`.
    pub fn drain_lines(&mut self) -> Vec<Line> {
        let mut lines = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            // Strip the trailing newline (and a possible preceding \r).
            let mut end = raw.len() - 1;
            if end > 0 && raw[end - 1] == b'\r' {
                end -= 1;
            }
            let text = String::from_utf8_lossy(&raw[..end]).into_owned();
            if text.is_empty() {
                continue;
            }
            lines.push(classify(text));
        }
        lines
    }
}

fn classify(line: String) -> Line {
    match line.strip_prefix(TELEMETRY_PREFIX) {
        Some(payload) => Line::Telemetry(payload.trim().to_string()),
        None => Line::Response(line),
    }
}

/// Parse a `TELEMETRY k1=v1 k2=v2 ...` payload into key/value pairs.
/// Malformed pairs (no `=`) are skipped, matching the original node/orchestrator
/// behavior of only indexing on well-formed `key=value` tokens.
pub fn parse_telemetry_pairs(payload: &str) -> Vec<(String, String)> {
    payload
        .split_whitespace()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Frame a line for the wire: append the `\n` terminator.
pub fn frame(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 1);
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    out
}
