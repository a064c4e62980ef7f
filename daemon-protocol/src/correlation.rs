//! Correlation ids: opaque strings threaded through every log event and
//! outbound request so a single instruction can be traced end-to-end
//! across the orchestrator, the planner, and every node it touches (§4.F).

use rand::Rng;

/// Generate a correlation id as `<prefix>-<12 hex>`, per §4.F.
pub fn new_correlation_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect();
    format!("{prefix}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_has_expected_shape() {
        let id = new_correlation_id("http");
        assert!(id.starts_with("http-"));
        let suffix = &id["http-".len()..];
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_are_not_all_identical() {
        let a = new_correlation_id("p");
        let b = new_correlation_id("p");
        assert_ne!(a, b);
    }
}
