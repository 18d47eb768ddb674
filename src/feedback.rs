// =============================================================================
// Feedback Composer — validation outcome to generator guidance
// =============================================================================
//
// Translates a failed ValidationOutcome into the natural-language hint that
// rides along with the next generation attempt. Pure function, no state.
// =============================================================================

use crate::types::ValidationOutcome;

/// Compose regeneration guidance for a failed outcome. Returns an empty
/// string for `Passed` (callers only attach feedback to failed attempts).
pub fn compose(outcome: &ValidationOutcome) -> String {
    let mut parts: Vec<String> = Vec::new();

    match outcome {
        ValidationOutcome::Passed { .. } => return String::new(),
        ValidationOutcome::SyntaxError { detail } => {
            parts.push(format!("Fix syntax issues: {detail}"));
        }
        ValidationOutcome::RuntimeError { detail } => {
            parts.push(format!("Runtime failure: {detail}"));
        }
        ValidationOutcome::ContractViolation { detail } => {
            parts.push(format!("Logical/test failure: {detail}"));
        }
        ValidationOutcome::SecurityRejected { pattern } => {
            parts.push(format!(
                "Security violation: the code contains the forbidden pattern '{pattern}'. \
                 Use only the standard library features needed for the rule logic."
            ));
        }
        ValidationOutcome::InfrastructureError { detail } => {
            parts.push(format!("General validation error: {detail}"));
        }
    }

    if parts.is_empty() {
        // Nothing matched; nudge a plain retry.
        return "The rule failed validation. Please regenerate it, keeping the same intent."
            .to_string();
    }

    parts.join(" ")
}
