// =============================================================================
// Anthropic Messages API Client — structured rule generation
// =============================================================================
//
// Calls POST /v1/messages with a single forced tool (`emit_rules`) whose
// input schema is the rule-output contract, so rules come back as validated
// tool input instead of free text that needs scraping. Temperature is pinned
// to 0.0 for reproducibility.
//
// SECURITY: the API key is never logged or serialized.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{GenerationRequest, RuleGenerator};
use crate::types::DraftRule;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// The system prompt communicates the data schema and the firm's enforcement
/// conventions; the structured schema on the tool enforces the output shape.
const SYSTEM_PROMPT: &str = "\
You are a compliance engineer converting written trading policies into \
executable Python rules.

Each rule's `code` must define a function named `rule`, defined before any \
helpers, taking (employee, security, trade_date) and returning a dict with a \
required boolean 'allowed' plus optional string 'reason' and 'policy_ref'. \
Use only the Python standard library.

The employee dict always has 'id' and 'role', and may have 'division', \
'tier' (integer, 1 = most restricted), 'restricted_tickers' (list), \
'can_trade' (bool), 'coverage_stocks' (list), 'active_deals' (list), \
'firm_restrictions', and 'quick_reference'. The security dict has 'ticker' \
and 'requested_action' ('buy', 'sell', or 'trade'), and may have \
'earnings_date', 'next_earnings_date', 'last_earnings_date' (ISO 8601 \
strings), 'market_cap', 'is_covered', and 'requires_preapproval'. \
trade_date is a YYYY-MM-DD string.

Enforcement conventions: a ticker in restricted_tickers is an absolute bar; \
coverage_stocks require pre-approval; lower tier numbers are more \
restricted. Emit one rule per distinct restriction in the policy, with \
snake_case rule_ids unique within the set.";

/// Anthropic Messages API client implementing [`RuleGenerator`].
#[derive(Clone)]
pub struct AnthropicGenerator {
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

// --- Response shapes (only the fields we read) -------------------------------

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse { input: serde_json::Value },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct EmittedRules {
    rules: Vec<DraftRule>,
}

impl AnthropicGenerator {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new generator client.
    ///
    /// # Arguments
    /// * `api_key`    — Anthropic API key (sent as `x-api-key`).
    /// * `model`      — model id, e.g. `claude-sonnet-4-6`.
    /// * `max_tokens` — output ceiling per call.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("x-api-key", val);
        }
        default_headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build reqwest client");

        Self {
            model: model.into(),
            max_tokens,
            client,
        }
    }

    /// JSON schema of the `emit_rules` tool input: the rule-output contract.
    fn rules_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "rules": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "rule_id": {
                                "type": "string",
                                "description": "snake_case identifier, unique within the set"
                            },
                            "rule_name": { "type": "string" },
                            "description": { "type": "string" },
                            "policy_reference": {
                                "type": "string",
                                "description": "citation into the source policy text"
                            },
                            "applies_to_roles": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "empty means the rule applies to every role"
                            },
                            "code": {
                                "type": "string",
                                "description": "Python source defining rule(employee, security, trade_date)"
                            }
                        },
                        "required": ["rule_id", "rule_name", "description", "policy_reference", "code"]
                    }
                }
            },
            "required": ["rules"]
        })
    }

    fn user_prompt(request: &GenerationRequest) -> String {
        match &request.prior_failure {
            None => format!(
                "Firm: {}\n\nPolicy text:\n{}\n\nConvert every restriction in this \
                 policy into an executable rule and emit the full set.",
                request.firm_name, request.policy_text
            ),
            Some(failure) => {
                let mut prompt = format!(
                    "Firm: {}\n\nPolicy text:\n{}\n\nA previously generated rule failed \
                     validation. Revise this single rule, preserving its intent, and emit \
                     exactly one corrected rule.\n\nFailing code:\n```python\n{}\n```\n\n\
                     Validation error: {}",
                    request.firm_name, request.policy_text, failure.code, failure.error
                );
                if let Some(output) = &failure.test_output {
                    prompt.push_str(&format!("\n\nTest output:\n{output}"));
                }
                prompt
            }
        }
    }
}

#[async_trait]
impl RuleGenerator for AnthropicGenerator {
    #[instrument(skip(self, request), name = "anthropic::generate", fields(firm = %request.firm_name))]
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftRule>> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0.0,
            "system": SYSTEM_PROMPT,
            "tools": [{
                "name": "emit_rules",
                "description": "Emit the structured compliance rules derived from the policy text.",
                "input_schema": Self::rules_schema(),
            }],
            "tool_choice": { "type": "tool", "name": "emit_rules" },
            "messages": [{ "role": "user", "content": Self::user_prompt(request) }],
        });

        let resp = self
            .client
            .post(API_URL)
            .json(&body)
            .send()
            .await
            .context("POST /v1/messages request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Anthropic POST /v1/messages returned {status}: {text}");
        }

        let message: MessagesResponse = resp
            .json()
            .await
            .context("failed to parse messages response")?;

        let input = message
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlock::ToolUse { input } => Some(input),
                ContentBlock::Other => None,
            })
            .context("generator response carried no emit_rules tool call")?;

        let emitted: EmittedRules = serde_json::from_value(input)
            .context("generator emitted rules that do not match the schema")?;

        // Guard the DraftRule invariants at the trust boundary: every rule
        // needs a non-empty id and body.
        let rules: Vec<DraftRule> = emitted
            .rules
            .into_iter()
            .filter(|r| !r.rule_id.trim().is_empty() && !r.code.trim().is_empty())
            .collect();

        debug!(count = rules.len(), "draft rules generated");
        Ok(rules)
    }
}

impl std::fmt::Debug for AnthropicGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicGenerator")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::PriorFailure;

    #[test]
    fn initial_prompt_contains_policy_and_firm() {
        let request = GenerationRequest {
            policy_text: "No trading within 5 days of earnings.".into(),
            firm_name: "Meridian".into(),
            prior_failure: None,
        };
        let prompt = AnthropicGenerator::user_prompt(&request);
        assert!(prompt.contains("Meridian"));
        assert!(prompt.contains("5 days of earnings"));
        assert!(!prompt.contains("failed validation"));
    }

    #[test]
    fn revision_prompt_carries_failure_context() {
        let request = GenerationRequest {
            policy_text: "No trading within 5 days of earnings.".into(),
            firm_name: "Meridian".into(),
            prior_failure: Some(PriorFailure {
                code: "def rule(e, s, d)\n    pass".into(),
                error: "Fix syntax issues: invalid syntax".into(),
                test_output: Some("traceback...".into()),
            }),
        };
        let prompt = AnthropicGenerator::user_prompt(&request);
        assert!(prompt.contains("failed validation"));
        assert!(prompt.contains("def rule(e, s, d)"));
        assert!(prompt.contains("Fix syntax issues"));
        assert!(prompt.contains("traceback..."));
    }

    #[test]
    fn schema_requires_core_fields() {
        let schema = AnthropicGenerator::rules_schema();
        let required = schema["properties"]["rules"]["items"]["required"]
            .as_array()
            .unwrap();
        for field in ["rule_id", "rule_name", "description", "policy_reference", "code"] {
            assert!(required.iter().any(|v| v == field), "missing {field}");
        }
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = AnthropicGenerator::new("sk-ant-secret", "claude-sonnet-4-6", 4096);
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("sk-ant-secret"));
        assert!(dbg.contains("<redacted>"));
    }
}
