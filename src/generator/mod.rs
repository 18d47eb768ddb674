// =============================================================================
// Rule generation capability
// =============================================================================
//
// Turns policy prose into structured draft rules. The engine only ever talks
// to the trait; the Anthropic adapter is one implementation and tests
// substitute canned fakes.
// =============================================================================

pub mod anthropic;

use anyhow::Result;
use async_trait::async_trait;

pub use anthropic::AnthropicGenerator;

use crate::types::DraftRule;

/// Context carried into a revision attempt after a failed validation.
#[derive(Debug, Clone)]
pub struct PriorFailure {
    /// The failing rule body, verbatim.
    pub code: String,
    /// Consolidated validator error.
    pub error: String,
    /// Functional-phase stdout, when the rule got that far.
    pub test_output: Option<String>,
}

/// One generation request. Without `prior_failure` this asks for the full
/// rule set of a policy; with it, a revision of the single failing rule that
/// preserves intent (the first returned rule is used).
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub policy_text: String,
    pub firm_name: String,
    pub prior_failure: Option<PriorFailure>,
}

/// The language-model capability behind rule synthesis.
#[async_trait]
pub trait RuleGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftRule>>;
}

// =============================================================================
// Test fakes
// =============================================================================
#[cfg(test)]
pub mod fakes {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// A generator that replays scripted rule batches in order and records
    /// every request it saw.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        batches: Mutex<VecDeque<Vec<DraftRule>>>,
        pub requests: Mutex<Vec<GenerationRequest>>,
    }

    impl ScriptedGenerator {
        pub fn with_batches(batches: Vec<Vec<DraftRule>>) -> Self {
            Self {
                batches: Mutex::new(batches.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RuleGenerator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftRule>> {
            self.requests.lock().push(request.clone());
            Ok(self.batches.lock().pop_front().unwrap_or_default())
        }
    }
}
