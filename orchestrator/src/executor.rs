//! §4.F Plan Executor: sequential step execution under a process-wide
//! execution mutex, RUN→sleep→STOP timing, panic-stop on any failure, and
//! global emergency stop. Grounded on `Orchestrator.run_step` /
//! `execute_plan` / `emergency_stop` in `orchestrator.py`, translated from
//! blocking sockets + a `threading.Lock` to `tokio::sync::Mutex` and
//! `tokio::time::sleep`.

use crate::catalog::Catalog;
use crate::client;
use crate::errors::{OrchestratorError, Result};
use crate::session::NodeSession;
use daemon_protocol::plan::{Plan, Step};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub struct Executor {
    sessions: Vec<Arc<NodeSession>>,
    step_timeout: Duration,
    /// Fixed short timeout for emergency-stop `STOP`s (§4.F, "≈2.5 s").
    stop_timeout: Duration,
    /// Serializes `execute_plan`/`emergency_stop` so only one plan runs at
    /// a time per orchestrator instance (§4.F, §5).
    lock: Mutex<()>,
}

impl Executor {
    pub fn new(sessions: Vec<Arc<NodeSession>>, step_timeout: Duration) -> Self {
        Self {
            sessions,
            step_timeout,
            stop_timeout: Duration::from_millis(2500),
            lock: Mutex::new(()),
        }
    }

    fn session_by_alias(&self, alias: &str) -> Option<&Arc<NodeSession>> {
        self.sessions.iter().find(|s| s.alias == alias)
    }

    /// Run every step of `plan` in order. On the first failure, issue a
    /// best-effort panic stop across all sessions and surface the original
    /// cause alongside it (§4.F, §7).
    pub async fn execute_plan(&self, plan: &Plan, catalog: &Catalog, correlation_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        for (idx, step) in plan.plan.iter().enumerate() {
            if let Err(err) = self.run_step(step, catalog, correlation_id).await {
                error!(correlation_id = %correlation_id, step = idx, error = %err, "step failed, issuing panic stop");
                let stop_errors = self.emergency_stop_inner(correlation_id).await;
                let mut message = format!("step[{idx}] failed: {err}; panic STOP sent");
                if !stop_errors.is_empty() {
                    message.push_str(&format!(" (stop errors: {})", stop_errors.join(", ")));
                }
                return Err(OrchestratorError::Internal(message));
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &Step, catalog: &Catalog, correlation_id: &str) -> Result<()> {
        match step {
            Step::Stop => {
                let errors = self.emergency_stop_inner(correlation_id).await;
                if errors.is_empty() {
                    Ok(())
                } else {
                    Err(OrchestratorError::Internal(format!(
                        "emergency stop failures: {}",
                        errors.join(", ")
                    )))
                }
            }
            Step::Run { target, token, args, duration_ms } => {
                let alias = target.as_deref().ok_or_else(|| {
                    OrchestratorError::Internal("validated RUN step is missing a resolved target".to_string())
                })?;
                let entry = catalog
                    .find_by_target(alias)
                    .ok_or_else(|| OrchestratorError::Internal(format!("target '{alias}' vanished since validation")))?;
                let session = self
                    .session_by_alias(&entry.alias)
                    .ok_or_else(|| OrchestratorError::Internal(format!("no session object for alias '{alias}'")))?;

                info!(correlation_id = %correlation_id, alias = %session.alias, token = %token, "RUN");
                client::run(session, token, args, self.step_timeout).await?;

                if let Some(ms) = duration_ms {
                    tokio::time::sleep(Duration::from_secs_f64((*ms / 1000.0).max(0.0))).await;
                    info!(correlation_id = %correlation_id, alias = %session.alias, "STOP after duration");
                    client::stop(session, self.step_timeout).await?;
                }
                Ok(())
            }
        }
    }

    /// Global emergency stop (§4.F): iterate every session in declaration
    /// order, send `STOP` with a short fixed timeout, log and continue on
    /// failure. Never raises — callers get the list of swallowed failures.
    pub async fn emergency_stop(&self, correlation_id: &str) -> Vec<String> {
        let _guard = self.lock.lock().await;
        self.emergency_stop_inner(correlation_id).await
    }

    async fn emergency_stop_inner(&self, correlation_id: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for session in &self.sessions {
            if let Err(err) = client::stop_best_effort(session, self.stop_timeout).await {
                warn!(correlation_id = %correlation_id, alias = %session.alias, error = %err, "stop failed during emergency stop");
                errors.push(err);
            }
        }
        errors
    }
}
