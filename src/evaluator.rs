// =============================================================================
// Compliance Evaluator — applies a firm's rules to one trade question
// =============================================================================
//
// Loads the firm's bundle, filters rules by active flag and role, runs every
// applicable rule in stored order, and ANDs the verdicts. There is no
// short-circuit: the caller gets the full reason set even when the first
// rule already denied. A rule that fails to execute denies the trade with a
// synthetic reason rather than being silently skipped.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::runner::RuleRunner;
use crate::store::RulesStore;
use crate::types::{ComplianceVerdict, Employee, Rule, RuleExecutionResult, Security};

pub struct ComplianceEvaluator {
    store: Arc<RulesStore>,
    runner: Arc<dyn RuleRunner>,
}

impl ComplianceEvaluator {
    pub fn new(store: Arc<RulesStore>, runner: Arc<dyn RuleRunner>) -> Self {
        Self { store, runner }
    }

    /// Evaluate one trade question against the firm's stored rules.
    pub async fn evaluate(
        &self,
        firm_name: &str,
        employee: &Employee,
        security: &Security,
        trade_date: &str,
    ) -> Result<ComplianceVerdict> {
        let Some(bundle) = self.store.load(firm_name)? else {
            // Absence of policy is not a denial.
            debug!(firm = %firm_name, "no rules on file; vacuously permitted");
            return Ok(ComplianceVerdict::allow_all());
        };

        let payload = serde_json::json!({
            "employee": employee,
            "security": security,
            "trade_date": trade_date,
        });

        let mut verdict = ComplianceVerdict::allow_all();

        for rule in &bundle.rules {
            if !rule.active {
                continue;
            }
            if !rule.applies_to_roles.is_empty()
                && !rule.applies_to_roles.iter().any(|r| r == &employee.role)
            {
                continue;
            }

            verdict.rules_checked.push(rule.rule_name.clone());

            match self.runner.run(&rule.code, &payload).await {
                Ok(stdout) => match parse_rule_output(&stdout) {
                    Some(result) => {
                        if !result.allowed {
                            verdict.allowed = false;
                            verdict.reasons.push(result.reason.unwrap_or_else(|| {
                                format!("Denied by rule {}", rule.rule_name)
                            }));
                            verdict.policy_refs.push(
                                result
                                    .policy_ref
                                    .unwrap_or_else(|| rule.policy_reference.clone()),
                            );
                        }
                    }
                    None => self.record_failure(&mut verdict, rule, "malformed rule output"),
                },
                Err(e) => self.record_failure(&mut verdict, rule, &format!("{e:#}")),
            }
        }

        info!(
            firm = %firm_name,
            employee = %employee.id,
            ticker = %security.ticker,
            allowed = verdict.allowed,
            rules_checked = verdict.rules_checked.len(),
            "compliance verdict"
        );
        Ok(verdict)
    }

    /// An execution failure converts to a deny for that rule; it is surfaced
    /// in the verdict, never hidden.
    fn record_failure(&self, verdict: &mut ComplianceVerdict, rule: &Rule, detail: &str) {
        warn!(rule = %rule.rule_name, detail, "rule execution failed; denying");
        verdict.allowed = false;
        verdict.reasons.push(format!(
            "Rule {} execution failed: {detail}",
            rule.rule_name
        ));
        verdict.policy_refs.push(rule.policy_reference.clone());
    }
}

/// Parse the runner's stdout: the last non-empty line must be a JSON object
/// honouring the rule output contract.
fn parse_rule_output(stdout: &str) -> Option<RuleExecutionResult> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}
