// =============================================================================
// Rule Validator — two-phase sandbox validation of draft rules
// =============================================================================
//
// Phase 1 parses the rule body as source inside an ephemeral sandbox; phase 2
// executes it against the canonical employee/security fixture and checks the
// output contract. The static screener runs first so obviously unsafe drafts
// never pay for sandbox provisioning.
//
// Inputs travel into the sandbox as base64 literals; the functional phase
// delimits the rule's return value between __RULE_OUTPUT__ markers. The
// sandbox is destroyed on every exit path unless the deployment preserves
// sandboxes for debugging. Retries are the refinement loop's job, not ours:
// one call here is exactly one attempt.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use tracing::{debug, warn};

use crate::sandbox::{SandboxHandle, SandboxedExecutor};
use crate::screener;
use crate::types::{DraftRule, ValidationOutcome};

/// Token printed by the syntax phase on a clean parse.
const SYNTAX_OK: &str = "__SYNTAX_OK__";
/// Delimiters around the functional phase's JSON result.
const OUTPUT_START: &str = "__RULE_OUTPUT__";
const OUTPUT_END: &str = "__RULE_OUTPUT_END__";

pub struct RuleValidator {
    executor: Arc<dyn SandboxedExecutor>,
    syntax_timeout: Duration,
    functional_timeout: Duration,
    preserve_sandboxes: bool,
}

impl RuleValidator {
    pub fn new(
        executor: Arc<dyn SandboxedExecutor>,
        syntax_timeout: Duration,
        functional_timeout: Duration,
        preserve_sandboxes: bool,
    ) -> Self {
        Self {
            executor,
            syntax_timeout,
            functional_timeout,
            preserve_sandboxes,
        }
    }

    /// Validate one draft. Infrastructure failures come back as
    /// `InfrastructureError`; everything else maps to the outcome kinds.
    pub async fn validate(&self, rule: &DraftRule) -> ValidationOutcome {
        // Cheap static screen before any sandbox cost.
        if let Some(pattern) = screener::screen(&rule.code) {
            return ValidationOutcome::SecurityRejected {
                pattern: pattern.to_string(),
            };
        }

        let handle = match self.executor.create().await {
            Ok(handle) => handle,
            Err(e) => {
                return ValidationOutcome::InfrastructureError {
                    detail: format!("sandbox create failed: {e:#}"),
                }
            }
        };

        // The guard covers cancellation: if this future is dropped mid-phase,
        // teardown still runs on a spawned task.
        let mut guard = TeardownGuard {
            executor: self.executor.clone(),
            handle: Some(handle.clone()),
            preserve: self.preserve_sandboxes,
        };

        let outcome = self.run_phases(&handle, rule).await;

        guard.disarm();
        self.teardown(handle).await;
        outcome
    }

    async fn run_phases(&self, handle: &SandboxHandle, rule: &DraftRule) -> ValidationOutcome {
        // --- Syntax phase ----------------------------------------------------
        let syntax_program = build_syntax_program(&rule.code);
        let syntax = match self
            .executor
            .run(handle, &syntax_program, None, self.syntax_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return ValidationOutcome::InfrastructureError {
                    detail: format!("syntax phase transport failed: {e:#}"),
                }
            }
        };

        if syntax.exit_code != 0 || !syntax.stdout.contains(SYNTAX_OK) {
            return ValidationOutcome::SyntaxError {
                detail: syntax.combined(),
            };
        }

        // --- Functional phase ------------------------------------------------
        let trade_date = Utc::now().format("%Y-%m-%d").to_string();
        let functional_program = build_functional_program(&rule.code, &trade_date);
        let functional = match self
            .executor
            .run(handle, &functional_program, None, self.functional_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => {
                return ValidationOutcome::InfrastructureError {
                    detail: format!("functional phase transport failed: {e:#}"),
                }
            }
        };

        let outcome = parse_functional_output(functional.exit_code, &functional.combined());
        debug!(rule_id = %rule.rule_id, passed = outcome.passed(), "rule validated");
        outcome
    }

    async fn teardown(&self, handle: SandboxHandle) {
        if self.preserve_sandboxes {
            warn!(sandbox_id = %handle.id, "preserving sandbox (debug flag set)");
            return;
        }
        if let Err(e) = self.executor.destroy(handle).await {
            // The environment auto-terminates on idle; a failed destroy is
            // surfaced in the logs rather than overturning the verdict.
            warn!(error = %e, "sandbox destroy failed");
        }
    }
}

/// Destroys the sandbox if the owning future is dropped before the normal
/// teardown path runs (request cancellation, timeouts above us).
struct TeardownGuard {
    executor: Arc<dyn SandboxedExecutor>,
    handle: Option<SandboxHandle>,
    preserve: bool,
}

impl TeardownGuard {
    fn disarm(&mut self) {
        self.handle.take();
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.preserve {
            return;
        }
        let executor = self.executor.clone();
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                if let Err(e) = executor.destroy(handle).await {
                    warn!(error = %e, "sandbox destroy failed during cancellation cleanup");
                }
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical fixture
// ---------------------------------------------------------------------------

/// The fixed employee persona the functional phase runs every rule against:
/// an analyst with restricted tickers, coverage stocks, and one live deal.
fn fixture_employee() -> serde_json::Value {
    serde_json::json!({
        "id": "EMP_FIXTURE",
        "role": "Analyst",
        "division": "Equity Research",
        "tier": 2,
        "restricted_tickers": ["AAPL", "TSLA", "MSFT", "GOOGL"],
        "can_trade": true,
        "coverage_stocks": ["AAPL", "TSLA", "MSFT", "GOOGL"],
        "active_deals": [
            { "company": "Nimbus Robotics", "type": "IPO", "status": "active" }
        ],
    })
}

fn fixture_security() -> serde_json::Value {
    serde_json::json!({
        "ticker": "TSLA",
        "requested_action": "buy",
        "earnings_date": "2025-11-20",
        "market_cap": 1.0e9,
        "is_covered": true,
    })
}

// ---------------------------------------------------------------------------
// Program builders
// ---------------------------------------------------------------------------

/// Phase 1: parse the rule body as source; print the sentinel on success.
fn build_syntax_program(code: &str) -> String {
    let code_b64 = BASE64.encode(code);
    format!(
        r#"import base64
src = base64.b64decode("{code_b64}").decode()
try:
    compile(src, "<rule>", "exec")
    print("{SYNTAX_OK}")
except SyntaxError as e:
    print(f"SyntaxError: {{e}}")
    raise SystemExit(1)
"#
    )
}

/// Phase 2: execute the rule body in a fresh namespace, invoke the first
/// callable it defines with the canonical fixture, and delimit the JSON
/// result between sentinels. The body is dedented to tolerate indented
/// generator output.
fn build_functional_program(code: &str, trade_date: &str) -> String {
    let code_b64 = BASE64.encode(code);
    let employee_b64 = BASE64.encode(fixture_employee().to_string());
    let security_b64 = BASE64.encode(fixture_security().to_string());
    format!(
        r#"import base64, json, textwrap

src = base64.b64decode("{code_b64}").decode()
employee = json.loads(base64.b64decode("{employee_b64}").decode())
security = json.loads(base64.b64decode("{security_b64}").decode())
trade_date = "{trade_date}"

namespace = {{}}
exec(textwrap.dedent(src), namespace)

fn = None
for name, value in namespace.items():
    if callable(value) and not name.startswith("__"):
        fn = value
        break
if fn is None:
    raise SystemExit("rule code defines no callable")

result = fn(employee, security, trade_date)
print("{OUTPUT_START}")
print(json.dumps(result))
print("{OUTPUT_END}")
"#
    )
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Map the functional run's exit code and combined output onto an outcome.
fn parse_functional_output(exit_code: i64, combined: &str) -> ValidationOutcome {
    if exit_code != 0 {
        return ValidationOutcome::RuntimeError {
            detail: combined.to_string(),
        };
    }

    let start = combined.find(OUTPUT_START);
    let end = combined.find(OUTPUT_END);
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) if e > s => (s + OUTPUT_START.len(), e),
        _ => {
            return ValidationOutcome::ContractViolation {
                detail: "rule produced no delimited output".to_string(),
            }
        }
    };

    let payload = combined[start..end].trim();
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            return ValidationOutcome::ContractViolation {
                detail: format!("rule output is not valid JSON: {e}"),
            }
        }
    };

    match value.get("allowed").and_then(serde_json::Value::as_bool) {
        Some(_) => ValidationOutcome::Passed {
            test_output: Some(payload.to_string()),
        },
        None => ValidationOutcome::ContractViolation {
            detail: "rule output is missing the boolean 'allowed' field".to_string(),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_program_embeds_source_as_base64() {
        let program = build_syntax_program("def rule(e, s, d):\n    return {}");
        assert!(program.contains(SYNTAX_OK));
        assert!(!program.contains("def rule"));
        assert!(program.contains(&BASE64.encode("def rule(e, s, d):\n    return {}")));
    }

    #[test]
    fn functional_program_carries_fixture_and_sentinels() {
        let program = build_functional_program("def rule(e, s, d):\n    return {}", "2026-08-02");
        assert!(program.contains(OUTPUT_START));
        assert!(program.contains(OUTPUT_END));
        assert!(program.contains("textwrap.dedent"));
        assert!(program.contains("2026-08-02"));
        assert!(program.contains(&BASE64.encode(fixture_employee().to_string())));
    }

    #[test]
    fn fixture_matches_canonical_shape() {
        let emp = fixture_employee();
        assert_eq!(emp["role"], "Analyst");
        assert_eq!(emp["tier"], 2);
        assert_eq!(emp["restricted_tickers"][1], "TSLA");
        assert_eq!(emp["active_deals"][0]["type"], "IPO");

        let sec = fixture_security();
        assert_eq!(sec["ticker"], "TSLA");
        assert_eq!(sec["earnings_date"], "2025-11-20");
        assert_eq!(sec["is_covered"], true);
    }

    #[test]
    fn nonzero_exit_is_a_runtime_error() {
        let out = parse_functional_output(1, "KeyError: 'tier'");
        assert!(matches!(out, ValidationOutcome::RuntimeError { detail } if detail.contains("tier")));
    }

    #[test]
    fn missing_sentinels_violate_the_contract() {
        let out = parse_functional_output(0, "hello world");
        assert!(matches!(out, ValidationOutcome::ContractViolation { .. }));
    }

    #[test]
    fn missing_allowed_violates_the_contract() {
        let combined = format!("{OUTPUT_START}\n{{\"reason\": \"no\"}}\n{OUTPUT_END}");
        let out = parse_functional_output(0, &combined);
        assert!(
            matches!(out, ValidationOutcome::ContractViolation { detail } if detail.contains("allowed"))
        );
    }

    #[test]
    fn well_formed_output_passes() {
        let combined = format!(
            "{OUTPUT_START}\n{{\"allowed\": false, \"reason\": \"restricted\"}}\n{OUTPUT_END}"
        );
        let out = parse_functional_output(0, &combined);
        match out {
            ValidationOutcome::Passed { test_output } => {
                let payload = test_output.unwrap();
                assert!(payload.contains("restricted"));
            }
            other => panic!("expected Passed, got {other:?}"),
        }
    }

    #[test]
    fn denied_verdicts_still_pass_validation() {
        // Validation checks the contract, not the decision: a rule that
        // denies the fixture trade is still a valid rule.
        let combined = format!("{OUTPUT_START}\n{{\"allowed\": false}}\n{OUTPUT_END}");
        assert!(parse_functional_output(0, &combined).passed());
    }
}
