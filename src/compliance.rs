//! Compliance filter: rejects samples lacking strict JSON with a
//! numeric `prob_true`, or containing URL/citation markers in any text field.

use crate::types::ComplianceOutcome;

const EPSILON: f64 = 1e-6;
const URL_MARKERS: [&str; 3] = ["http://", "https://", "www."];

/// Evaluates a raw provider payload against the compliance rules. A `None`
/// payload (e.g. the provider's second retry also failed) is non-compliant.
pub fn check(raw_json: Option<&serde_json::Value>) -> ComplianceOutcome {
    let Some(value) = raw_json else {
        return ComplianceOutcome::default();
    };

    if contains_url_marker(value) {
        return ComplianceOutcome::default();
    }

    let Some(prob_true) = value.get("prob_true").and_then(|v| v.as_f64()) else {
        return ComplianceOutcome::default();
    };
    if !(0.0..=1.0).contains(&prob_true) {
        return ComplianceOutcome::default();
    }

    let clamped = prob_true.clamp(EPSILON, 1.0 - EPSILON);
    let logit = (clamped / (1.0 - clamped)).ln();

    ComplianceOutcome {
        prob_true: Some(prob_true),
        logit: Some(logit),
        compliant: true,
    }
}

/// Recursively scans every string leaf of a JSON value for URL/citation
/// markers, case-insensitively.
fn contains_url_marker(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => {
            let lower = s.to_ascii_lowercase();
            URL_MARKERS.iter().any(|m| lower.contains(m))
        }
        serde_json::Value::Array(items) => items.iter().any(contains_url_marker),
        serde_json::Value::Object(map) => map.values().any(contains_url_marker),
        _ => false,
    }
}
