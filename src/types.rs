// =============================================================================
// Shared types used across the Sentinel compliance engine
// =============================================================================
//
// The rule lifecycle runs DraftRule -> (validation attempts) -> Rule ->
// RulesBundle. Employee and Security are open records: the typed fields are
// what the engine itself inspects, everything else is carried through a
// flattened map so rule code sees every field the caller supplied.
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade actions
// ---------------------------------------------------------------------------

/// The action an employee is asking about. `Trade` covers queries that do not
/// name a direction ("can I trade TSLA?").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Trade,
}

impl Default for TradeAction {
    fn default() -> Self {
        Self::Trade
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Trade => write!(f, "trade"),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// A rule as emitted by the generator, before validation.
///
/// `code` is an executable rule body: it must define a callable taking
/// `(employee, security, trade_date)` and returning a mapping with a boolean
/// `allowed` plus optional `reason` / `policy_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftRule {
    /// Stable snake_case identifier, unique within a bundle.
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    /// Citation back into the source policy text.
    pub policy_reference: String,
    /// Roles the rule applies to. Empty means universal.
    #[serde(default)]
    pub applies_to_roles: Vec<String>,
    /// Executable rule body as source text.
    pub code: String,
}

/// Immutable record of one validation pass over a draft.
///
/// Invariant: `passed` is true iff `feedback_to_generator` is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    /// 1-based, monotonic within a rule.
    pub attempt_number: u32,
    pub passed: bool,
    /// Single consolidated error message when the attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured stdout of the functional run, when one happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,
    /// Guidance handed to the generator for the next attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_to_generator: Option<String>,
    /// ISO 8601 timestamp.
    pub timestamp: String,
}

/// A draft that has completed the refinement loop.
///
/// A `Rule` stored in a bundle always has a final history entry with
/// `passed = true`; unvalidated rules exist only transiently inside the
/// refinement loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub rule_name: String,
    pub description: String,
    pub policy_reference: String,
    #[serde(default)]
    pub applies_to_roles: Vec<String>,
    pub code: String,
    /// Inactive rules are skipped at evaluation time.
    #[serde(default = "default_true")]
    pub active: bool,
    /// How many draft iterations the rule took.
    pub generation_attempt: u32,
    /// Ordered by attempt_number, starting at 1.
    #[serde(default)]
    pub validation_history: Vec<ValidationAttempt>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    /// Promote a draft, attaching the accumulated validation history.
    pub fn from_draft(
        draft: DraftRule,
        generation_attempt: u32,
        validation_history: Vec<ValidationAttempt>,
    ) -> Self {
        Self {
            rule_id: draft.rule_id,
            rule_name: draft.rule_name,
            description: draft.description,
            policy_reference: draft.policy_reference,
            applies_to_roles: draft.applies_to_roles,
            code: draft.code,
            active: true,
            generation_attempt,
            validation_history,
        }
    }
}

/// Per-firm container of validated rules. Re-ingestion replaces the whole
/// bundle; there is no partial update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesBundle {
    pub firm_name: String,
    /// Year-month stamp of the last ingestion, e.g. "2026-08".
    pub policy_version: String,
    /// ISO 8601 timestamp of the last save.
    pub last_updated: String,
    /// Sum of refinement iterations across all rules.
    pub total_iterations: u32,
    /// May be empty: a firm whose drafts all failed has no restrictions.
    #[serde(default)]
    pub rules: Vec<Rule>,
}

// ---------------------------------------------------------------------------
// Validation outcomes
// ---------------------------------------------------------------------------

/// Result of one validator pass. Exactly one kind per outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Rule parsed, ran, and returned a well-formed result.
    Passed {
        #[serde(skip_serializing_if = "Option::is_none")]
        test_output: Option<String>,
    },
    /// Static screener matched a forbidden pattern; sandbox never ran.
    SecurityRejected { pattern: String },
    /// Rule source failed to parse.
    SyntaxError { detail: String },
    /// Rule raised or exited non-zero during the functional run.
    RuntimeError { detail: String },
    /// Rule ran but returned malformed output (missing sentinels, bad JSON,
    /// or no boolean `allowed`).
    ContractViolation { detail: String },
    /// Sandbox creation, transport, or teardown failure.
    InfrastructureError { detail: String },
}

impl ValidationOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// Consolidated error message for the validation history, if any.
    pub fn error_detail(&self) -> Option<String> {
        match self {
            Self::Passed { .. } => None,
            Self::SecurityRejected { pattern } => {
                Some(format!("forbidden pattern: {pattern}"))
            }
            Self::SyntaxError { detail }
            | Self::RuntimeError { detail }
            | Self::ContractViolation { detail }
            | Self::InfrastructureError { detail } => Some(detail.clone()),
        }
    }

    /// Functional-phase stdout, if the rule got far enough to produce one.
    pub fn test_output(&self) -> Option<String> {
        match self {
            Self::Passed { test_output } => test_output.clone(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Employees & securities
// ---------------------------------------------------------------------------

/// An employee record. Only `id` and `role` are required; everything else
/// (division, tier, restricted_tickers, coverage_stocks, active_deals,
/// firm_restrictions, quick_reference, ...) rides in `extra` and is passed
/// to rule code untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub role: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The security a trade question is about. Optional market-data fields
/// (earnings_date, market_cap, is_covered, ...) ride in `extra`; date fields
/// stay ISO 8601 strings at this boundary and are parsed by rule code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub ticker: String,
    pub requested_action: TradeAction,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Security {
    pub fn new(ticker: impl Into<String>, requested_action: TradeAction) -> Self {
        Self {
            ticker: ticker.into(),
            requested_action,
            extra: serde_json::Map::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule execution & verdicts
// ---------------------------------------------------------------------------

/// The output contract every rule must honour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecutionResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_ref: Option<String>,
}

/// Aggregated allow/deny decision for one trade question.
///
/// `allowed` is the AND across all applicable rules. `reasons` and
/// `policy_refs` are parallel lists, one entry per blocking rule.
/// `rules_checked` names every rule that was applicable and invoked,
/// passing or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub policy_refs: Vec<String>,
    pub rules_checked: Vec<String>,
}

impl ComplianceVerdict {
    /// Vacuous permission: no policy on file is not a denial.
    pub fn allow_all() -> Self {
        Self {
            allowed: true,
            reasons: Vec::new(),
            policy_refs: Vec::new(),
            rules_checked: Vec::new(),
        }
    }
}

/// A parsed natural-language trade question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Uppercase ticker symbol.
    pub ticker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<TradeAction>,
    /// YYYY-MM-DD, when the question names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_date: Option<String>,
}
