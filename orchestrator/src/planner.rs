//! §4.G Planner Adapter: POST an instruction to an external planner URL
//! and fall back to a small deterministic keyword planner on any failure.
//! Grounded on `call_remote_planner`/`fallback_plan`/`make_plan` in
//! `orchestrator.py`, with the macro set supplemented per
//! `orchestrator/tests/test_fallback_plan.py` (square/left-square/
//! straight-line/triangle), translated from `urllib.request` to `reqwest`.

use crate::errors::OrchestratorError;
use daemon_protocol::plan::{Plan, Step};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

const REMOTE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PlannerAdapter {
    http: reqwest::Client,
    planner_url: Option<String>,
}

impl PlannerAdapter {
    pub fn new(planner_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .expect("reqwest client with only timeout/tls defaults never fails to build");
        Self { http, planner_url }
    }

    /// Produce a plan for `instruction`. Any failure reaching or parsing
    /// the remote planner silently degrades to [`fallback_plan`] — the
    /// caller only ever sees a successful plan (§4.G, §7).
    pub async fn make_plan(
        &self,
        instruction: &str,
        system_manifest: &Value,
        telemetry_snapshot: &Value,
        correlation_id: &str,
    ) -> Plan {
        if let Some(url) = &self.planner_url {
            match self
                .call_remote(url, instruction, system_manifest, telemetry_snapshot, correlation_id)
                .await
            {
                Ok(plan) => return plan,
                Err(err) => {
                    warn!(correlation_id = %correlation_id, error = %err, "planner fallback");
                }
            }
        }
        fallback_plan(instruction)
    }

    async fn call_remote(
        &self,
        url: &str,
        instruction: &str,
        system_manifest: &Value,
        telemetry_snapshot: &Value,
        correlation_id: &str,
    ) -> Result<Plan, OrchestratorError> {
        let body = json!({
            "instruction": instruction,
            "system_manifest": system_manifest,
            "telemetry_snapshot": telemetry_snapshot,
            "correlation_id": correlation_id,
        });

        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-Correlation-Id", correlation_id)
            .json(&body)
            .send()
            .await
            .map_err(|err| OrchestratorError::Planner(err.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(OrchestratorError::Planner(format!(
                "planner returned status {}",
                response.status()
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|err| OrchestratorError::Planner(format!("malformed planner response: {err}")))?;

        let plan_steps = parsed
            .get("plan")
            .and_then(Value::as_array)
            .ok_or_else(|| OrchestratorError::Planner("planner response missing plan[]".to_string()))?;

        serde_json::from_value(json!({ "plan": plan_steps }))
            .map_err(|err| OrchestratorError::Planner(format!("planner response has invalid plan shape: {err}")))
    }
}

/// Deterministic keyword-based fallback planner (§4.G, §9 "deliberately
/// simple; the validator is the safety net"). Every non-trivial plan ends
/// with a trailing STOP; an instruction matching nothing produces `[STOP]`.
pub fn fallback_plan(instruction: &str) -> Plan {
    let text = instruction.to_lowercase();
    let trimmed = text.trim();

    if trimmed.contains("square") {
        return square_macro(trimmed.contains("left"));
    }
    if trimmed.contains("triangle") {
        return triangle_macro();
    }
    if trimmed.contains("straight line") {
        return straight_line_macro();
    }

    let mut steps = Vec::new();
    for part in clauses(trimmed) {
        if part.contains("forward") {
            steps.push(Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(1000.0)));
        }
        if part.contains("turn left") || format!(" {part}").contains(" left") {
            steps.push(Step::run(Some("base"), "TURN", vec![json!(-90)], Some(800.0)));
        } else if part.contains("right") {
            steps.push(Step::run(Some("base"), "TURN", vec![json!(90)], Some(800.0)));
        }
        if part.contains("open") {
            steps.push(Step::run(Some("arm"), "GRIP", vec![json!("open")], None));
        }
        if part.contains("close") {
            steps.push(Step::run(Some("arm"), "GRIP", vec![json!("close")], None));
        }
        if part.contains("home") {
            steps.push(Step::run(Some("arm"), "HOME", vec![], None));
        }
    }

    if steps.is_empty() {
        Plan { plan: vec![Step::Stop] }
    } else {
        steps.push(Step::Stop);
        Plan { plan: steps }
    }
}

fn clauses(text: &str) -> Vec<String> {
    let normalized = text.replace(',', " then ");
    let parts: Vec<String> = normalized
        .split("then")
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        vec![text.to_string()]
    } else {
        parts
    }
}

fn square_macro(turn_left: bool) -> Plan {
    let turn_args = if turn_left { json!(-90) } else { json!(90) };
    let mut steps = Vec::with_capacity(9);
    for _ in 0..4 {
        steps.push(Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(1200.0)));
        steps.push(Step::run(Some("base"), "TURN", vec![turn_args.clone()], Some(800.0)));
    }
    steps.push(Step::Stop);
    Plan { plan: steps }
}

fn triangle_macro() -> Plan {
    let mut steps = Vec::with_capacity(7);
    for _ in 0..3 {
        steps.push(Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(1200.0)));
        steps.push(Step::run(Some("base"), "TURN", vec![json!(120)], Some(800.0)));
    }
    steps.push(Step::Stop);
    Plan { plan: steps }
}

fn straight_line_macro() -> Plan {
    Plan {
        plan: vec![
            Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(2000.0)),
            Step::Stop,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_steps(plan: &Plan) -> Vec<&Step> {
        plan.plan.iter().filter(|s| matches!(s, Step::Run { .. })).collect()
    }

    #[test]
    fn square_macro_expands_to_four_segments() {
        let plan = fallback_plan("square");
        let runs = run_steps(&plan);
        assert_eq!(runs.len(), 8);
        match runs[0] {
            Step::Run { token, duration_ms, .. } => {
                assert_eq!(token, "FWD");
                assert_eq!(*duration_ms, Some(1200.0));
            }
            _ => unreachable!(),
        }
        match runs[1] {
            Step::Run { token, args, .. } => {
                assert_eq!(token, "TURN");
                assert_eq!(args, &vec![json!(90)]);
            }
            _ => unreachable!(),
        }
        assert_eq!(plan.plan.last(), Some(&Step::Stop));
    }

    #[test]
    fn left_square_uses_negative_turn() {
        let plan = fallback_plan("left square");
        for step in &plan.plan {
            if let Step::Run { token, args, .. } = step {
                if token == "TURN" {
                    assert_eq!(args, &vec![json!(-90)]);
                }
            }
        }
    }

    #[test]
    fn straight_line_macro_matches_exact_shape() {
        let plan = fallback_plan("straight line");
        assert_eq!(
            plan.plan,
            vec![
                Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(2000.0)),
                Step::Stop,
            ]
        );
    }

    #[test]
    fn triangle_macro_expands_to_three_segments() {
        let plan = fallback_plan("triangle");
        let runs = run_steps(&plan);
        assert_eq!(runs.len(), 6);
        let fwd_count = runs.iter().filter(|s| matches!(s, Step::Run { token, .. } if token == "FWD")).count();
        assert_eq!(fwd_count, 3);
        let turn_count = runs.iter().filter(|s| matches!(s, Step::Run { token, .. } if token == "TURN")).count();
        assert_eq!(turn_count, 3);
        for step in &runs {
            if let Step::Run { token, args, .. } = step {
                if token == "TURN" {
                    assert_eq!(args, &vec![json!(120)]);
                }
            }
        }
        assert_eq!(plan.plan.last(), Some(&Step::Stop));
    }

    #[test]
    fn unknown_instruction_falls_back_to_stop() {
        let plan = fallback_plan("do a backflip");
        assert_eq!(plan.plan, vec![Step::Stop]);
    }

    #[test]
    fn forward_then_open_chains_clauses() {
        let plan = fallback_plan("go forward, then open the gripper");
        let tokens: Vec<&str> = run_steps(&plan)
            .iter()
            .map(|s| match s {
                Step::Run { token, .. } => token.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(tokens, vec!["FWD", "GRIP"]);
    }
}
