//! The `Plan` / `Step` value types passed from planner to validator to
//! executor (§3). These are intentionally permissive on the wire (raw JSON
//! `Value` args, optional fields) — the validator is what turns a `Plan`
//! into something the executor is guaranteed to run safely.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ordered list of steps. Immutable once handed to the executor.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Plan {
    pub plan: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Step {
    #[serde(rename = "STOP")]
    Stop,
    #[serde(rename = "RUN")]
    Run {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        token: String,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<f64>,
    },
}

impl Step {
    pub fn run(target: Option<&str>, token: &str, args: Vec<Value>, duration_ms: Option<f64>) -> Self {
        Step::Run {
            target: target.map(|s| s.to_string()),
            token: token.to_string(),
            args,
            duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stop_step_serializes_with_only_a_type_field() {
        let step = Step::Stop;
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value, json!({"type": "STOP"}));
    }

    #[test]
    fn run_step_round_trips() {
        let step = Step::run(Some("base"), "FWD", vec![json!(0.6)], Some(1200.0));
        let value = serde_json::to_value(&step).unwrap();
        let back: Step = serde_json::from_value(value).unwrap();
        assert_eq!(step, back);
    }

    #[test]
    fn plan_deserializes_from_bare_step_list() {
        let wrapped = json!({
            "plan": [
                {"type": "RUN", "target": "base", "token": "FWD", "args": [0.6], "duration_ms": 1200},
                {"type": "STOP"}
            ]
        });
        let plan: Plan = serde_json::from_value(wrapped).unwrap();
        assert_eq!(plan.plan.len(), 2);
        assert_eq!(plan.plan[1], Step::Stop);
    }
}
