// =============================================================================
// Ingestion Pipeline — policy text to persisted rules bundle
// =============================================================================
//
// One initial generator call fans a policy out into draft rules; each draft
// then runs the refinement loop sequentially. Sequential refinement is a
// correctness choice: downstream filtering assumes stable rule order, and
// concurrent sandbox provisioning multiplies infrastructure cost with no
// gain at typical policy sizes (tens of rules).
//
// Drafts that never validate are dropped from the bundle (and logged); a
// bundle with zero accepted rules is still persisted and simply means "no
// restrictions".
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::generator::{GenerationRequest, RuleGenerator};
use crate::refinement::RefinementLoop;
use crate::store::RulesStore;
use crate::types::{Rule, RulesBundle};

pub struct IngestionPipeline {
    generator: Arc<dyn RuleGenerator>,
    refinement: Arc<RefinementLoop>,
    store: Arc<RulesStore>,
}

impl IngestionPipeline {
    pub fn new(
        generator: Arc<dyn RuleGenerator>,
        refinement: Arc<RefinementLoop>,
        store: Arc<RulesStore>,
    ) -> Self {
        Self {
            generator,
            refinement,
            store,
        }
    }

    /// Ingest one firm's policy text end to end and return the persisted
    /// bundle.
    pub async fn ingest(&self, policy_text: &str, firm_name: &str) -> Result<RulesBundle> {
        let request = GenerationRequest {
            policy_text: policy_text.to_string(),
            firm_name: firm_name.to_string(),
            prior_failure: None,
        };

        let drafts = self
            .generator
            .generate(&request)
            .await
            .context("initial rule generation failed")?;

        info!(firm = %firm_name, drafts = drafts.len(), "policy ingestion started");

        let mut accepted: Vec<Rule> = Vec::new();
        let mut total_iterations: u32 = 0;

        for draft in drafts {
            let rule_id = draft.rule_id.clone();
            let result = self.refinement.refine(draft, policy_text, firm_name).await;
            total_iterations += result.iterations;

            if result.validated {
                accepted.push(result.rule);
            } else {
                warn!(
                    firm = %firm_name,
                    rule_id = %rule_id,
                    iterations = result.iterations,
                    "draft never validated; dropping from bundle"
                );
            }
        }

        let bundle = self
            .store
            .save(firm_name, accepted, total_iterations)
            .context("failed to persist rules bundle")?;

        info!(
            firm = %firm_name,
            deployed = bundle.rules.len(),
            total_iterations,
            "policy ingestion finished"
        );
        Ok(bundle)
    }
}
