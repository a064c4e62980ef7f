//! Request-line formatting and the `ERR <CODE> <detail>` vocabulary (§4.C).

use serde_json::Value;
use std::fmt;

/// The closed set of error codes a node may report after `CODE`. Unknown
/// codes seen on the wire are preserved verbatim via [`ErrorCode::Other`]
/// rather than rejected, since the orchestrator must relay node errors
/// verbatim to callers (§7, "Node-reported errors surface verbatim").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    BadToken,
    BadArgs,
    Range,
    RateLimit,
    Internal,
    Serial,
    BadRequest,
    Other(String),
}

impl ErrorCode {
    pub fn parse(code: &str) -> Self {
        match code {
            "BAD_TOKEN" => Self::BadToken,
            "BAD_ARGS" => Self::BadArgs,
            "RANGE" => Self::Range,
            "RATE_LIMIT" => Self::RateLimit,
            "INTERNAL" => Self::Internal,
            "SERIAL" => Self::Serial,
            "BAD_REQUEST" => Self::BadRequest,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::BadToken => "BAD_TOKEN",
            Self::BadArgs => "BAD_ARGS",
            Self::Range => "RANGE",
            Self::RateLimit => "RATE_LIMIT",
            Self::Internal => "INTERNAL",
            Self::Serial => "SERIAL",
            Self::BadRequest => "BAD_REQUEST",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Render a plan argument in its canonical wire form (§4.F): integers
/// without a decimal point, floats in shortest round-trip form, booleans as
/// `true`/`false`, strings verbatim (never quoted — the wire is
/// whitespace-separated positional tokens, §4.C).
pub fn canonical_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                format_float(f)
            } else {
                n.to_string()
            }
        }
        other => other.to_string(),
    }
}

fn format_float(f: f64) -> String {
    if f == f.trunc() && f.is_finite() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        let mut s = format!("{f}");
        if !s.contains('.') && !s.contains('e') {
            s.push_str(".0");
        }
        s
    }
}

/// Build a `RUN <TOKEN> <arg0> <arg1> ...` request line.
pub fn run_line(token: &str, args: &[Value]) -> String {
    let mut parts = vec!["RUN".to_string(), token.to_string()];
    parts.extend(args.iter().map(canonical_arg));
    parts.join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    Manifest(String),
    Ok,
    Err(ErrorCode, String),
}

/// Parse a response line into its semantic shape. Anything not matching
/// `MANIFEST `/`OK`/`ERR ` is preserved as a bare `Err(Other, raw)` so
/// callers can still report it verbatim rather than panicking.
pub fn parse_response(line: &str) -> ResponseLine {
    if let Some(json) = line.strip_prefix("MANIFEST ") {
        return ResponseLine::Manifest(json.to_string());
    }
    if line == "OK" {
        return ResponseLine::Ok;
    }
    if let Some(rest) = line.strip_prefix("ERR ") {
        let mut parts = rest.splitn(2, ' ');
        let code = parts.next().unwrap_or("");
        let detail = parts.next().unwrap_or("").to_string();
        return ResponseLine::Err(ErrorCode::parse(code), detail);
    }
    ResponseLine::Err(ErrorCode::Other("UNEXPECTED".to_string()), line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_arg_formats_int_without_decimal() {
        assert_eq!(canonical_arg(&json!(90)), "90");
        assert_eq!(canonical_arg(&json!(-90)), "-90");
    }

    #[test]
    fn canonical_arg_formats_whole_float_without_decimal() {
        assert_eq!(canonical_arg(&json!(90.0)), "90");
    }

    #[test]
    fn canonical_arg_keeps_fractional_float() {
        assert_eq!(canonical_arg(&json!(0.6)), "0.6");
    }

    #[test]
    fn canonical_arg_formats_bool_lowercase() {
        assert_eq!(canonical_arg(&json!(true)), "true");
        assert_eq!(canonical_arg(&json!(false)), "false");
    }

    #[test]
    fn canonical_arg_keeps_string_verbatim() {
        assert_eq!(canonical_arg(&json!("L")), "L");
    }

    #[test]
    fn run_line_joins_token_and_args() {
        assert_eq!(run_line("FWD", &[json!(0.6)]), "RUN FWD 0.6");
        assert_eq!(run_line("STRAFE", &[json!("L"), json!(0.5)]), "RUN STRAFE L 0.5");
    }

    #[test]
    fn parses_manifest_ok_and_err_lines() {
        assert_eq!(parse_response("MANIFEST {}"), ResponseLine::Manifest("{}".to_string()));
        assert_eq!(parse_response("OK"), ResponseLine::Ok);
        assert_eq!(
            parse_response("ERR RANGE too_high"),
            ResponseLine::Err(ErrorCode::Range, "too_high".to_string())
        );
    }
}
