//! Wire types for `serial-line-v1`, the line-oriented protocol every DAEMON
//! node speaks to the orchestrator.
//!
//! This crate is deliberately free of any I/O: it owns the data model
//! (manifests, command specs, plans) and the pure framing logic (the line
//! codec), so `orchestrator` and `node` can never disagree about what a
//! `MANIFEST` line or a `RUN` line means. Everything that actually opens a
//! socket lives in the two binary crates.

pub mod codec;
pub mod correlation;
pub mod manifest;
pub mod plan;
pub mod wire;

pub use codec::LineCodec;
pub use correlation::new_correlation_id;
pub use manifest::{ArgSpec, ArgType, CommandSpec, Device, Manifest, Safety, TelemetryKey, Transport};
pub use plan::{Plan, Step};
pub use wire::ErrorCode;
