//! §4.E Plan Validator: pure, I/O-free walk of a plan against the merged
//! catalog, rejecting on the first violation with a message that locates
//! the offending step (§7 "Validation errors surface as HTTP 400 with a
//! precise message locating the offending step").
//!
//! Operates on the raw JSON body rather than the already-typed
//! [`daemon_protocol::plan::Plan`] because several rules (STOP admits no
//! other fields; numeric-vs-string-vs-bool discrimination before
//! coercion) need to see what was actually on the wire, not what a
//! permissive `Deserialize` already smoothed over.

use crate::catalog::Catalog;
use daemon_protocol::manifest::{ArgSpec, ArgType};
use daemon_protocol::plan::{Plan, Step};
use daemon_protocol::wire::canonical_arg;
use serde_json::Value;

/// Validate `raw` (expected shape `{"plan": [...]}`) against `catalog`,
/// returning a normalized [`Plan`] ready for the executor, or the message
/// of the first rule violated.
pub fn validate_plan(raw: &Value, catalog: &Catalog) -> Result<Plan, String> {
    let steps = raw
        .get("plan")
        .and_then(Value::as_array)
        .ok_or_else(|| "plan must be a list".to_string())?;

    let mut normalized = Vec::with_capacity(steps.len());
    for (idx, step) in steps.iter().enumerate() {
        normalized.push(validate_step(idx, step, catalog)?);
    }
    Ok(Plan { plan: normalized })
}

fn validate_step(idx: usize, step: &Value, catalog: &Catalog) -> Result<Step, String> {
    let obj = step
        .as_object()
        .ok_or_else(|| format!("step[{idx}] must be an object"))?;

    let step_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("step[{idx}] type must be RUN or STOP"))?
        .to_uppercase();

    match step_type.as_str() {
        "STOP" => {
            if obj.keys().any(|k| k != "type") {
                return Err(format!("step[{idx}] STOP admits no other fields"));
            }
            Ok(Step::Stop)
        }
        "RUN" => validate_run_step(idx, obj, catalog),
        other => Err(format!("step[{idx}] type must be RUN or STOP, got '{other}'")),
    }
}

fn validate_run_step(
    idx: usize,
    obj: &serde_json::Map<String, Value>,
    catalog: &Catalog,
) -> Result<Step, String> {
    let token = obj
        .get("token")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("step[{idx}] token must be a non-empty string"))?;

    let target = match obj.get("target") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
        Some(_) => return Err(format!("step[{idx}] target must be a non-empty string")),
    };

    let (entry, command) = catalog
        .resolve(target, token)
        .map_err(|reason| format!("step[{idx}] {reason}"))?;
    let token_u = command.token.clone();

    let args = match obj.get("args") {
        None => Vec::new(),
        Some(Value::Array(a)) => a.clone(),
        Some(_) => return Err(format!("step[{idx}] args must be a list")),
    };
    if args.len() != command.args.len() {
        return Err(format!(
            "step[{idx}] token '{token_u}' expects {} args, got {}",
            command.args.len(),
            args.len()
        ));
    }

    let mut normalized_args = Vec::with_capacity(args.len());
    for (arg_idx, (value, spec)) in args.iter().zip(&command.args).enumerate() {
        normalized_args.push(validate_arg(idx, arg_idx, value, spec)?);
    }

    let duration_ms = match obj.get("duration_ms") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let n = coerce_float(value)
                .ok_or_else(|| format!("step[{idx}] duration_ms must be a non-negative number"))?;
            if n < 0.0 {
                return Err(format!("step[{idx}] duration_ms must be a non-negative number"));
            }
            Some(n)
        }
    };

    Ok(Step::Run {
        target: Some(entry.alias.clone()),
        token: token_u,
        args: normalized_args,
        duration_ms,
    })
}

fn validate_arg(step_idx: usize, arg_idx: usize, value: &Value, spec: &ArgSpec) -> Result<Value, String> {
    let label = format!("step[{step_idx}] arg {arg_idx} ({})", spec.name);

    let coerced = match spec.arg_type {
        ArgType::Int => {
            let i = coerce_int(value).ok_or_else(|| format!("{label}: expected int"))?;
            Value::from(i)
        }
        ArgType::Float => {
            let f = coerce_float(value).ok_or_else(|| format!("{label}: expected float"))?;
            serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
        }
        ArgType::Bool => {
            let b = coerce_bool(value).ok_or_else(|| format!("{label}: expected bool"))?;
            Value::Bool(b)
        }
        ArgType::String => match value {
            Value::String(s) => Value::String(s.clone()),
            _ => return Err(format!("{label}: expected string")),
        },
    };

    if let Some(enum_values) = &spec.r#enum {
        let coerced_str = canonical_arg(&coerced);
        let allowed = enum_values.iter().any(|v| v == &coerced || canonical_arg(v) == coerced_str);
        if !allowed {
            return Err(format!("{label}: value '{coerced_str}' not in enum"));
        }
    }

    if matches!(spec.arg_type, ArgType::Int | ArgType::Float) {
        let numeric = coerce_float(&coerced).expect("already coerced to numeric above");
        if let Some(min) = spec.min {
            if numeric < min {
                return Err(format!("{label}: value {} < min {}", canonical_arg(&coerced), canonical_arg(&Value::from(min))));
            }
        }
        if let Some(max) = spec.max {
            if numeric > max {
                return Err(format!("{label}: value {} > max {}", canonical_arg(&coerced), canonical_arg(&Value::from(max))));
            }
        }
    }

    Ok(coerced)
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(_) => None,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i)
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 {
                    Some(f as i64)
                } else {
                    None
                }
            } else {
                None
            }
        }
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn coerce_float(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(_) => None,
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::session::NodeSession;
    use daemon_protocol::manifest::{CommandSpec, Device, Manifest, Safety, TelemetrySchema, Transport};
    use serde_json::json;
    use std::time::Duration;

    fn base_catalog() -> Catalog {
        let manifest = Manifest {
            daemon_version: "0.1".to_string(),
            device: Device {
                name: "base".to_string(),
                node_id: "base-1".to_string(),
                version: "0.1.0".to_string(),
            },
            commands: vec![
                CommandSpec {
                    token: "FWD".to_string(),
                    description: String::new(),
                    args: vec![ArgSpec {
                        name: "speed".to_string(),
                        arg_type: ArgType::Float,
                        min: Some(0.0),
                        max: Some(1.0),
                        r#enum: None,
                        required: true,
                    }],
                    safety: Safety { rate_limit_hz: 20.0, watchdog_ms: 1200, clamp: false },
                    nlp: None,
                },
                CommandSpec {
                    token: "GRIP".to_string(),
                    description: String::new(),
                    args: vec![ArgSpec {
                        name: "state".to_string(),
                        arg_type: ArgType::String,
                        min: None,
                        max: None,
                        r#enum: Some(vec![json!("open"), json!("close")]),
                        required: true,
                    }],
                    safety: Safety { rate_limit_hz: 5.0, watchdog_ms: 2000, clamp: false },
                    nlp: None,
                },
            ],
            services: None,
            telemetry: TelemetrySchema { keys: vec![] },
            transport: Transport::serial_line_v1(),
        };
        Catalog::build(vec![CatalogEntry {
            session: NodeSession::new("base", "127.0.0.1", 9000, Duration::from_secs(1)),
            alias: "base".to_string(),
            node_name: "base".to_string(),
            node_id: "base-1".to_string(),
            manifest,
        }])
    }

    #[test]
    fn accepts_a_well_formed_plan() {
        let catalog = base_catalog();
        let raw = json!({"plan": [
            {"type": "RUN", "target": "base", "token": "FWD", "args": [0.6], "duration_ms": 1200},
            {"type": "STOP"},
        ]});
        let plan = validate_plan(&raw, &catalog).unwrap();
        assert_eq!(plan.plan.len(), 2);
    }

    #[test]
    fn rejects_out_of_range_numeric_with_precise_message() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "RUN", "target": "base", "token": "FWD", "args": [1.5]}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("value 1.5 > max 1"), "{err}");
    }

    #[test]
    fn rejects_stop_step_with_extra_fields() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "STOP", "target": "base"}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("STOP admits no other fields"), "{err}");
    }

    #[test]
    fn rejects_enum_violation() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "RUN", "target": "base", "token": "GRIP", "args": ["squeeze"]}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("not in enum"), "{err}");
    }

    #[test]
    fn rejects_wrong_arg_count() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "RUN", "target": "base", "token": "FWD", "args": []}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("expects 1 args, got 0"), "{err}");
    }

    #[test]
    fn rejects_negative_duration_ms() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "RUN", "target": "base", "token": "FWD", "args": [0.5], "duration_ms": -1}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("duration_ms must be a non-negative number"), "{err}");
    }

    #[test]
    fn rejects_unknown_target() {
        let catalog = base_catalog();
        let raw = json!({"plan": [{"type": "RUN", "target": "drone", "token": "FWD", "args": [0.5]}]});
        let err = validate_plan(&raw, &catalog).unwrap_err();
        assert!(err.contains("does not match any connected node"), "{err}");
    }
}
