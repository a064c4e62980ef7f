//! The dispatcher every node binds `RUN <TOKEN> ...` tokens to (§4.I,
//! "dispatcher to hardware"). Actual hardware drivers are out of scope
//! (spec.md §1); the two profiles here (`mecanum`, `arm`) stand in for them
//! the same way `mecanum_daemon_node.py` stands in for real Arduino
//! firmware in `original_source/` — enough behavior to exercise the
//! protocol and safety contracts honestly, nothing claiming to drive real
//! motors.

use daemon_protocol::{ArgSpec, ArgType, CommandSpec, Safety};
use thiserror::Error;

/// Failure kinds a device's `run`/`stop` can report, each mapping to one of
/// the `ERR <CODE>` wire codes in §4.C.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("unknown")]
    BadToken,
    #[error("{0}")]
    BadArgs(String),
    #[error("{0}")]
    Range(String),
    #[error("{0}")]
    Serial(String),
    #[error("{0}")]
    Internal(String),
}

impl NodeError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadToken => "BAD_TOKEN",
            Self::BadArgs(_) => "BAD_ARGS",
            Self::Range(_) => "RANGE",
            Self::Serial(_) => "SERIAL",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::BadToken => "unknown".to_string(),
            Self::BadArgs(d) | Self::Range(d) | Self::Serial(d) | Self::Internal(d) => d.clone(),
        }
    }
}

/// Something that can dispatch `RUN` tokens to hardware and bring itself to
/// a safe stop. Implementations own whatever serial/GPIO handle they need;
/// none of that is part of this spec (§1 Non-goals).
pub trait Device: Send {
    /// The `commands` this device contributes to its node's manifest.
    fn commands(&self) -> Vec<CommandSpec>;

    /// Dispatch one already-tokenized `RUN` (token already upper-cased,
    /// `args` are the raw whitespace-separated wire tokens, not yet parsed).
    fn run(&mut self, token: &str, args: &[String]) -> Result<(), NodeError>;

    /// Bring the device to its safe state. Must never itself require
    /// arguments and should be infallible in practice, but may still report
    /// a transport failure (§4.I item 2, §4.F "emergency stop never raises"
    /// — the *caller* is responsible for treating this as best-effort).
    fn stop(&mut self) -> Result<(), NodeError>;
}

fn parse_f64(raw: &str) -> Result<f64, NodeError> {
    raw.parse::<f64>()
        .map_err(|_| NodeError::BadArgs("parse".to_string()))
}

/// An RC-car-style mecanum base: `FWD`, `BWD`, `STRAFE`, `TURN`, `MECANUM`.
/// Grounded on `mecanum_daemon_node.py` in `original_source/`: speed/degree
/// magnitude is accepted for interface stability but the simulated hardware
/// only tracks direction, exactly as the original firmware does (it maps
/// everything down to single-letter primitives `F/B/L/R/Q/E/S`).
pub struct MecanumBase {
    last_primitive: &'static str,
}

const MECANUM_PRIMITIVES: [&str; 7] = ["F", "B", "L", "R", "Q", "E", "S"];

impl MecanumBase {
    pub fn new() -> Self {
        Self { last_primitive: "S" }
    }

    fn send_primitive(&mut self, cmd: &str) -> Result<(), NodeError> {
        if !MECANUM_PRIMITIVES.contains(&cmd) {
            return Err(NodeError::Internal("unsupported primitive".to_string()));
        }
        self.last_primitive = MECANUM_PRIMITIVES
            .iter()
            .find(|p| **p == cmd)
            .copied()
            .unwrap_or("S");
        Ok(())
    }

    pub fn last_primitive(&self) -> &'static str {
        self.last_primitive
    }
}

impl Default for MecanumBase {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for MecanumBase {
    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec {
                token: "FWD".to_string(),
                description: "Move forward (speed kept for interface stability).".to_string(),
                args: vec![ArgSpec {
                    name: "speed".to_string(),
                    arg_type: ArgType::Float,
                    min: Some(0.0),
                    max: Some(1.0),
                    r#enum: None,
                    required: true,
                }],
                safety: Safety { rate_limit_hz: 20.0, watchdog_ms: 1200, clamp: true },
                nlp: None,
            },
            CommandSpec {
                token: "BWD".to_string(),
                description: "Move backward (speed kept for interface stability).".to_string(),
                args: vec![ArgSpec {
                    name: "speed".to_string(),
                    arg_type: ArgType::Float,
                    min: Some(0.0),
                    max: Some(1.0),
                    r#enum: None,
                    required: true,
                }],
                safety: Safety { rate_limit_hz: 20.0, watchdog_ms: 1200, clamp: true },
                nlp: None,
            },
            CommandSpec {
                token: "STRAFE".to_string(),
                description: "Strafe left/right.".to_string(),
                args: vec![
                    ArgSpec {
                        name: "dir".to_string(),
                        arg_type: ArgType::String,
                        min: None,
                        max: None,
                        r#enum: Some(vec!["L".into(), "R".into()]),
                        required: true,
                    },
                    ArgSpec {
                        name: "speed".to_string(),
                        arg_type: ArgType::Float,
                        min: Some(0.0),
                        max: Some(1.0),
                        r#enum: None,
                        required: true,
                    },
                ],
                safety: Safety { rate_limit_hz: 20.0, watchdog_ms: 1200, clamp: true },
                nlp: None,
            },
            CommandSpec {
                token: "TURN".to_string(),
                description: "Rotate in place. degrees<0 => left, degrees>0 => right.".to_string(),
                args: vec![ArgSpec {
                    name: "degrees".to_string(),
                    arg_type: ArgType::Float,
                    min: Some(-180.0),
                    max: Some(180.0),
                    r#enum: None,
                    required: true,
                }],
                safety: Safety { rate_limit_hz: 20.0, watchdog_ms: 1200, clamp: true },
                nlp: None,
            },
            CommandSpec {
                token: "MECANUM".to_string(),
                description: "Direct primitive command (one of F,B,L,R,Q,E,S).".to_string(),
                args: vec![ArgSpec {
                    name: "cmd".to_string(),
                    arg_type: ArgType::String,
                    min: None,
                    max: None,
                    r#enum: Some(MECANUM_PRIMITIVES.iter().map(|s| (*s).into()).collect()),
                    required: true,
                }],
                safety: Safety { rate_limit_hz: 30.0, watchdog_ms: 1200, clamp: true },
                nlp: None,
            },
        ]
    }

    fn run(&mut self, token: &str, args: &[String]) -> Result<(), NodeError> {
        match token {
            "FWD" => {
                if args.len() != 1 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                parse_f64(&args[0])?;
                self.send_primitive("F")
            }
            "BWD" => {
                if args.len() != 1 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                parse_f64(&args[0])?;
                self.send_primitive("B")
            }
            "STRAFE" => {
                if args.len() != 2 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                parse_f64(&args[1])?;
                match args[0].to_uppercase().as_str() {
                    "L" => self.send_primitive("L"),
                    "R" => self.send_primitive("R"),
                    _ => Err(NodeError::Range("enum".to_string())),
                }
            }
            "TURN" => {
                if args.len() != 1 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                let deg = parse_f64(&args[0])?;
                if deg < 0.0 {
                    self.send_primitive("Q")
                } else if deg > 0.0 {
                    self.send_primitive("E")
                } else {
                    Ok(())
                }
            }
            "MECANUM" => {
                if args.len() != 1 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                let cmd = args[0].to_uppercase();
                if !MECANUM_PRIMITIVES.contains(&cmd.as_str()) {
                    return Err(NodeError::Range("enum".to_string()));
                }
                self.send_primitive(&cmd)
            }
            _ => Err(NodeError::BadToken),
        }
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        self.send_primitive("S")
    }
}

/// A two-state gripper arm: `GRIP` (open/close), `HOME`. Grounded on the
/// `arm`/`gripper` fixtures in `original_source/orchestrator/tests/test_fallback_plan.py`,
/// which exercise exactly this token pair against the fallback planner's
/// `open`/`close`/`home` macros.
pub struct GripperArm {
    open: bool,
}

impl GripperArm {
    pub fn new() -> Self {
        Self { open: false }
    }
}

impl Default for GripperArm {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for GripperArm {
    fn commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec {
                token: "GRIP".to_string(),
                description: "Open or close the gripper.".to_string(),
                args: vec![ArgSpec {
                    name: "state".to_string(),
                    arg_type: ArgType::String,
                    min: None,
                    max: None,
                    r#enum: Some(vec!["open".into(), "close".into()]),
                    required: true,
                }],
                safety: Safety { rate_limit_hz: 5.0, watchdog_ms: 4000, clamp: false },
                nlp: None,
            },
            CommandSpec {
                token: "HOME".to_string(),
                description: "Return the arm to its home position.".to_string(),
                args: vec![],
                safety: Safety { rate_limit_hz: 2.0, watchdog_ms: 4000, clamp: false },
                nlp: None,
            },
        ]
    }

    fn run(&mut self, token: &str, args: &[String]) -> Result<(), NodeError> {
        match token {
            "GRIP" => {
                if args.len() != 1 {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                match args[0].to_lowercase().as_str() {
                    "open" => {
                        self.open = true;
                        Ok(())
                    }
                    "close" => {
                        self.open = false;
                        Ok(())
                    }
                    _ => Err(NodeError::Range("enum".to_string())),
                }
            }
            "HOME" => {
                if !args.is_empty() {
                    return Err(NodeError::BadArgs("wrong_count".to_string()));
                }
                Ok(())
            }
            _ => Err(NodeError::BadToken),
        }
    }

    fn stop(&mut self) -> Result<(), NodeError> {
        // A gripper has no continuous motion to interrupt; holding position is safe.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mecanum_fwd_requires_one_numeric_arg() {
        let mut base = MecanumBase::new();
        assert!(base.run("FWD", &["0.6".to_string()]).is_ok());
        assert_eq!(base.last_primitive(), "F");
        assert_eq!(base.run("FWD", &[]), Err(NodeError::BadArgs("wrong_count".to_string())));
        assert_eq!(
            base.run("FWD", &["not_a_number".to_string()]),
            Err(NodeError::BadArgs("parse".to_string()))
        );
    }

    #[test]
    fn mecanum_turn_sign_selects_direction() {
        let mut base = MecanumBase::new();
        base.run("TURN", &["-90".to_string()]).unwrap();
        assert_eq!(base.last_primitive(), "Q");
        base.run("TURN", &["90".to_string()]).unwrap();
        assert_eq!(base.last_primitive(), "E");
    }

    #[test]
    fn mecanum_unknown_token_is_bad_token() {
        let mut base = MecanumBase::new();
        assert_eq!(base.run("NOPE", &[]), Err(NodeError::BadToken));
    }

    #[test]
    fn mecanum_stop_sends_safe_primitive() {
        let mut base = MecanumBase::new();
        base.run("FWD", &["0.6".to_string()]).unwrap();
        base.stop().unwrap();
        assert_eq!(base.last_primitive(), "S");
    }

    #[test]
    fn gripper_grip_accepts_open_and_close() {
        let mut arm = GripperArm::new();
        assert!(arm.run("GRIP", &["open".to_string()]).is_ok());
        assert!(arm.run("GRIP", &["close".to_string()]).is_ok());
        assert_eq!(arm.run("GRIP", &["sideways".to_string()]), Err(NodeError::Range("enum".to_string())));
    }

    #[test]
    fn gripper_home_takes_no_args() {
        let mut arm = GripperArm::new();
        assert!(arm.run("HOME", &[]).is_ok());
        assert!(arm.run("HOME", &["x".to_string()]).is_err());
    }
}
