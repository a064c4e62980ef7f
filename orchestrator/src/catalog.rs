//! §4.D Command Catalog: the qualified (`alias.TOKEN`) and unqualified
//! (`TOKEN`) maps built once all sessions have reported a manifest, plus
//! `(target, token)` resolution for the validator and executor.
//!
//! Pure and I/O-free: it operates on manifests already fetched by
//! `connect_all`/reconnect, grounded on `Orchestrator._build_catalogs` and
//! `Orchestrator.resolve_node` in `orchestrator.py`.

use crate::session::NodeSession;
use daemon_protocol::manifest::{CommandSpec, Manifest};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One connected node as seen by the catalog: its session handle plus the
/// identifying fields pulled out of its manifest (§3 "Node session").
pub struct CatalogEntry {
    pub session: Arc<NodeSession>,
    pub alias: String,
    pub node_name: String,
    pub node_id: String,
    pub manifest: Manifest,
}

impl CatalogEntry {
    /// A step's `target` may address a node by alias, device name, or node_id (§3).
    fn matches_target(&self, target: &str) -> bool {
        target == self.alias || target == self.node_name || target == self.node_id
    }

    pub fn command(&self, token: &str) -> Option<&CommandSpec> {
        self.manifest.commands.iter().find(|c| c.token == token)
    }
}

#[derive(Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    /// `"<alias>.<TOKEN>"` → index into `entries` (§4.D).
    qualified: HashMap<String, usize>,
    /// `"<TOKEN>"` → index into `entries`, present only for tokens owned by
    /// exactly one node (§4.D).
    unqualified: HashMap<String, usize>,
    ambiguous: HashSet<String>,
}

impl Catalog {
    /// Build a catalog from every currently-known `(session, manifest)`
    /// pair, in declaration order. Disconnected sessions are simply omitted
    /// by the caller (§7 "degraded mode") — the catalog never represents
    /// "connected but manifest-less" state.
    pub fn build(entries: Vec<CatalogEntry>) -> Self {
        let mut qualified = HashMap::new();
        let mut first_owner: HashMap<String, usize> = HashMap::new();
        let mut ambiguous = HashSet::new();

        for (idx, entry) in entries.iter().enumerate() {
            for command in &entry.manifest.commands {
                let token = command.token.to_uppercase();
                if token.is_empty() {
                    continue;
                }
                qualified.insert(format!("{}.{}", entry.alias, token), idx);
                match first_owner.get(&token) {
                    Some(_) => {
                        ambiguous.insert(token);
                    }
                    None => {
                        first_owner.insert(token, idx);
                    }
                }
            }
        }

        let unqualified = first_owner
            .into_iter()
            .filter(|(token, _)| !ambiguous.contains(token))
            .collect();

        Self {
            entries,
            qualified,
            unqualified,
            ambiguous,
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn is_ambiguous(&self, token: &str) -> bool {
        self.ambiguous.contains(&token.to_uppercase())
    }

    pub fn unqualified_owner(&self, token: &str) -> Option<&CatalogEntry> {
        self.unqualified.get(&token.to_uppercase()).map(|&idx| &self.entries[idx])
    }

    pub fn find_by_target(&self, target: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.matches_target(target))
    }

    pub fn qualified_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.qualified.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn unqualified_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.unqualified.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Resolve a step's `(target, token)` to the owning catalog entry and
    /// its command spec, per validator rule 4/5 (§4.E). Returns a
    /// human-readable reason on failure rather than an `OrchestratorError`,
    /// since the caller (the validator) prefixes it with the step index.
    pub fn resolve(&self, target: Option<&str>, token: &str) -> Result<(&CatalogEntry, &CommandSpec), String> {
        let token_u = token.to_uppercase();

        let entry = if let Some(target) = target {
            self.find_by_target(target)
                .ok_or_else(|| format!("target '{target}' does not match any connected node"))?
        } else if let Some(entry) = self.unqualified_owner(&token_u) {
            entry
        } else if self.is_ambiguous(&token_u) {
            return Err(format!("token '{token_u}' is ambiguous across nodes; explicit target is required"));
        } else {
            return Err(format!("token '{token_u}' not found"));
        };

        let command = entry
            .command(&token_u)
            .ok_or_else(|| format!("token '{token_u}' not found on node '{}'", entry.alias))?;
        Ok((entry, command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daemon_protocol::manifest::{Device, Safety, TelemetrySchema, Transport};
    use std::time::Duration;

    fn manifest(node_id: &str, name: &str, tokens: &[&str]) -> Manifest {
        Manifest {
            daemon_version: "0.1".to_string(),
            device: Device {
                name: name.to_string(),
                node_id: node_id.to_string(),
                version: "0.1.0".to_string(),
            },
            commands: tokens
                .iter()
                .map(|t| CommandSpec {
                    token: t.to_string(),
                    description: String::new(),
                    args: vec![],
                    safety: Safety {
                        rate_limit_hz: 10.0,
                        watchdog_ms: 1000,
                        clamp: false,
                    },
                    nlp: None,
                })
                .collect(),
            services: None,
            telemetry: TelemetrySchema { keys: vec![] },
            transport: Transport::serial_line_v1(),
        }
    }

    fn entry(alias: &str, node_id: &str, name: &str, tokens: &[&str]) -> CatalogEntry {
        CatalogEntry {
            session: NodeSession::new(alias, "127.0.0.1", 9000, Duration::from_secs(1)),
            alias: alias.to_string(),
            node_name: name.to_string(),
            node_id: node_id.to_string(),
            manifest: manifest(node_id, name, tokens),
        }
    }

    #[test]
    fn unqualified_map_excludes_duplicate_tokens() {
        let catalog = Catalog::build(vec![
            entry("base", "base-1", "base", &["FWD", "SET"]),
            entry("arm", "arm-1", "arm", &["GRIP", "SET"]),
        ]);
        assert!(catalog.unqualified_owner("FWD").is_some());
        assert!(catalog.unqualified_owner("SET").is_none());
        assert!(catalog.is_ambiguous("SET"));
        assert_eq!(catalog.qualified_keys(), vec!["arm.GRIP", "arm.SET", "base.FWD", "base.SET"]);
    }

    #[test]
    fn resolve_requires_explicit_target_for_ambiguous_token() {
        let catalog = Catalog::build(vec![entry("base", "base-1", "base", &["SET"]), entry("arm", "arm-1", "arm", &["SET"])]);
        let err = catalog.resolve(None, "SET").unwrap_err();
        assert!(err.contains("ambiguous"), "{err}");
        assert!(catalog.resolve(Some("base"), "SET").is_ok());
        assert!(catalog.resolve(Some("arm"), "SET").is_ok());
    }

    #[test]
    fn resolve_by_unambiguous_token_without_target() {
        let catalog = Catalog::build(vec![entry("base", "base-1", "base", &["FWD"])]);
        let (e, cmd) = catalog.resolve(None, "fwd").unwrap();
        assert_eq!(e.alias, "base");
        assert_eq!(cmd.token, "FWD");
    }

    #[test]
    fn resolve_unknown_target_fails() {
        let catalog = Catalog::build(vec![entry("base", "base-1", "base", &["FWD"])]);
        let err = catalog.resolve(Some("drone"), "FWD").unwrap_err();
        assert!(err.contains("does not match any connected node"), "{err}");
    }
}
