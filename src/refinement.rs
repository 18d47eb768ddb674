// =============================================================================
// Refinement Loop — bounded generate / validate / regenerate per draft rule
// =============================================================================
//
// One draft enters; at most `max_attempts` validator calls later, a rule
// comes out, validated or not. The original rule_id and the accumulated
// validation history are carried across regenerations so a rule keeps a
// stable identity no matter how many times the generator rewrites its body.
// The first regenerated draft is always taken: one failing rule maps to one
// revision.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::feedback;
use crate::generator::{GenerationRequest, PriorFailure, RuleGenerator};
use crate::types::{DraftRule, Rule, ValidationAttempt};
use crate::validator::RuleValidator;

/// Outcome of refining one draft.
#[derive(Debug)]
pub struct RefinementResult {
    pub validated: bool,
    pub rule: Rule,
    /// Validator calls consumed (== the rule's validation_history length).
    pub iterations: u32,
}

pub struct RefinementLoop {
    validator: Arc<RuleValidator>,
    generator: Arc<dyn RuleGenerator>,
    max_attempts: u32,
}

impl RefinementLoop {
    pub fn new(
        validator: Arc<RuleValidator>,
        generator: Arc<dyn RuleGenerator>,
        max_attempts: u32,
    ) -> Self {
        Self {
            validator,
            generator,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Drive one draft to a validated rule, or exhaust the attempt budget.
    pub async fn refine(
        &self,
        draft: DraftRule,
        policy_text: &str,
        firm_name: &str,
    ) -> RefinementResult {
        let rule_id = draft.rule_id.clone();
        let mut current = draft;
        let mut history: Vec<ValidationAttempt> = Vec::new();

        for attempt in 1..=self.max_attempts {
            let outcome = self.validator.validate(&current).await;
            let passed = outcome.passed();

            let feedback_to_generator = if passed {
                None
            } else {
                Some(feedback::compose(&outcome))
            };

            history.push(ValidationAttempt {
                attempt_number: attempt,
                passed,
                error: outcome.error_detail(),
                test_output: outcome.test_output(),
                feedback_to_generator,
                timestamp: Utc::now().to_rfc3339(),
            });

            if passed {
                info!(rule_id = %rule_id, attempt, "rule validated");
                return RefinementResult {
                    validated: true,
                    rule: Rule::from_draft(current, attempt, history),
                    iterations: attempt,
                };
            }

            debug!(
                rule_id = %rule_id,
                attempt,
                error = ?outcome.error_detail(),
                "validation attempt failed"
            );

            if attempt == self.max_attempts {
                break;
            }

            // Ask the generator to revise the failing rule, preserving intent.
            let request = GenerationRequest {
                policy_text: policy_text.to_string(),
                firm_name: firm_name.to_string(),
                prior_failure: Some(PriorFailure {
                    code: current.code.clone(),
                    error: outcome.error_detail().unwrap_or_default(),
                    test_output: outcome.test_output(),
                }),
            };

            let revised = match self.generator.generate(&request).await {
                Ok(rules) => rules,
                Err(e) => {
                    warn!(rule_id = %rule_id, error = %e, "regeneration failed");
                    break;
                }
            };

            let Some(mut next) = revised.into_iter().next() else {
                warn!(rule_id = %rule_id, "generator returned no revision; giving up");
                break;
            };

            // Stable identity across regenerations.
            next.rule_id = rule_id.clone();
            current = next;
        }

        let iterations = history.len() as u32;
        RefinementResult {
            validated: false,
            rule: Rule::from_draft(current, iterations, history),
            iterations,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::generator::fakes::ScriptedGenerator;
    use crate::sandbox::fakes::ScriptedSandbox;

    const SYNTAX_OK: &str = "__SYNTAX_OK__\n";
    const FUNCTIONAL_OK: &str = "__RULE_OUTPUT__\n{\"allowed\": true}\n__RULE_OUTPUT_END__\n";

    fn draft(code: &str) -> DraftRule {
        DraftRule {
            rule_id: "restricted_list".into(),
            rule_name: "Restricted List".into(),
            description: "Denies restricted tickers".into(),
            policy_reference: "Section 1".into(),
            applies_to_roles: vec![],
            code: code.into(),
        }
    }

    fn validator(sandbox: Arc<ScriptedSandbox>) -> Arc<RuleValidator> {
        Arc::new(RuleValidator::new(
            sandbox,
            Duration::from_secs(60),
            Duration::from_secs(120),
            false,
        ))
    }

    #[tokio::test]
    async fn passes_first_try_without_regeneration() {
        let sandbox = Arc::new(ScriptedSandbox::with_outputs(vec![
            ScriptedSandbox::ok(SYNTAX_OK),
            ScriptedSandbox::ok(FUNCTIONAL_OK),
        ]));
        let generator = Arc::new(ScriptedGenerator::default());
        let refinement = RefinementLoop::new(validator(sandbox.clone()), generator.clone(), 5);

        let result = refinement
            .refine(draft("def rule(e, s, d):\n    return {\"allowed\": True}"), "policy", "Meridian")
            .await;

        assert!(result.validated);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.rule.validation_history.len(), 1);
        assert!(result.rule.validation_history[0].passed);
        assert!(result.rule.validation_history[0].feedback_to_generator.is_none());
        assert!(generator.requests.lock().is_empty());
        // One sandbox per attempt, destroyed before the loop moves on.
        assert_eq!(sandbox.created.load(Ordering::SeqCst), 1);
        assert_eq!(sandbox.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn converges_on_second_attempt() {
        // Attempt 1: syntax phase fails. Attempt 2: both phases pass.
        let sandbox = Arc::new(ScriptedSandbox::with_outputs(vec![
            ScriptedSandbox::failed("SyntaxError: invalid syntax"),
            ScriptedSandbox::ok(SYNTAX_OK),
            ScriptedSandbox::ok(FUNCTIONAL_OK),
        ]));
        let generator = Arc::new(ScriptedGenerator::with_batches(vec![vec![DraftRule {
            rule_id: "generator_renamed_this".into(),
            ..draft("def rule(e, s, d):\n    return {\"allowed\": True}")
        }]]));
        let refinement = RefinementLoop::new(validator(sandbox.clone()), generator.clone(), 5);

        let result = refinement
            .refine(draft("def rule(e, s, d)\n    return"), "policy", "Meridian")
            .await;

        assert!(result.validated);
        assert_eq!(result.iterations, 2);

        let history = &result.rule.validation_history;
        assert_eq!(history.len(), 2);
        assert!(!history[0].passed);
        assert!(history[0]
            .feedback_to_generator
            .as_deref()
            .unwrap()
            .starts_with("Fix syntax issues:"));
        assert!(history[1].passed);
        assert_eq!(history[0].attempt_number, 1);
        assert_eq!(history[1].attempt_number, 2);

        // Identity survives the regeneration.
        assert_eq!(result.rule.rule_id, "restricted_list");

        // The revision request carried the failing code and error.
        let requests = generator.requests.lock();
        assert_eq!(requests.len(), 1);
        let failure = requests[0].prior_failure.as_ref().unwrap();
        assert!(failure.code.contains("def rule(e, s, d)"));
        assert!(failure.error.contains("SyntaxError"));
    }

    #[tokio::test]
    async fn static_rejection_short_circuits_the_sandbox() {
        let sandbox = Arc::new(ScriptedSandbox::default());
        // No revision available: the loop gives up after the first attempt.
        let generator = Arc::new(ScriptedGenerator::default());
        let refinement = RefinementLoop::new(validator(sandbox.clone()), generator, 5);

        let result = refinement
            .refine(
                draft("import os\ndef rule(e, s, d):\n    return {\"allowed\": True}"),
                "policy",
                "Meridian",
            )
            .await;

        assert!(!result.validated);
        assert_eq!(result.rule.validation_history.len(), 1);
        assert!(result.rule.validation_history[0]
            .error
            .as_deref()
            .unwrap()
            .contains("import os"));
        // The sandbox capability was never touched in that attempt.
        assert_eq!(sandbox.created.load(Ordering::SeqCst), 0);
        assert_eq!(sandbox.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausts_the_attempt_budget() {
        // Every attempt fails at the syntax phase; the generator keeps
        // producing equally broken revisions.
        let sandbox = Arc::new(ScriptedSandbox::with_outputs(vec![
            ScriptedSandbox::failed("SyntaxError: 1"),
            ScriptedSandbox::failed("SyntaxError: 2"),
            ScriptedSandbox::failed("SyntaxError: 3"),
        ]));
        let bad = draft("def rule(e, s, d)\n    broken");
        let generator = Arc::new(ScriptedGenerator::with_batches(vec![
            vec![bad.clone()],
            vec![bad.clone()],
        ]));
        let refinement = RefinementLoop::new(validator(sandbox.clone()), generator, 3);

        let result = refinement.refine(bad, "policy", "Meridian").await;

        assert!(!result.validated);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.rule.validation_history.len(), 3);
        assert_eq!(result.rule.generation_attempt, 3);
        // Three attempts, three ephemeral sandboxes, all destroyed.
        assert_eq!(sandbox.created.load(Ordering::SeqCst), 3);
        assert_eq!(sandbox.destroyed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn empty_regeneration_is_unrecoverable() {
        let sandbox = Arc::new(ScriptedSandbox::with_outputs(vec![
            ScriptedSandbox::failed("SyntaxError: nope"),
        ]));
        let generator = Arc::new(ScriptedGenerator::with_batches(vec![vec![]]));
        let refinement = RefinementLoop::new(validator(sandbox), generator, 5);

        let result = refinement
            .refine(draft("def rule(e, s, d)\n    broken"), "policy", "Meridian")
            .await;

        assert!(!result.validated);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.rule.validation_history.len(), 1);
    }
}
