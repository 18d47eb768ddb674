// =============================================================================
// Central Application State — Sentinel compliance engine
// =============================================================================
//
// The single source of truth wiring the engines together. Everything is
// constructed once at service init and handed to the request handlers via
// Arc<AppState>; the only cross-request mutable state is the store's cache
// and the two audit ring buffers here.
//
// Thread safety:
//   - parking_lot::RwLock for the ring buffers.
//   - Arc wrappers for engines that are immutable after construction.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::employees::EmployeeDirectory;
use crate::evaluator::ComplianceEvaluator;
use crate::pipeline::IngestionPipeline;
use crate::store::RulesStore;
use crate::types::{ComplianceVerdict, ParsedQuery};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

// =============================================================================
// Audit records
// =============================================================================

/// A recorded error event for the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Optional machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Auditable record of one compliance evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,
    pub firm_name: String,
    pub employee_id: String,
    pub ticker: String,
    pub action: String,
    pub allowed: bool,
    pub rules_checked: usize,
    /// ISO 8601 timestamp.
    pub created_at: String,
}

impl DecisionRecord {
    pub fn from_verdict(
        firm_name: &str,
        employee_id: &str,
        query: &ParsedQuery,
        verdict: &ComplianceVerdict,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            firm_name: firm_name.to_string(),
            employee_id: employee_id.to_string(),
            ticker: query.ticker.clone(),
            action: query.action.unwrap_or_default().to_string(),
            allowed: verdict.allowed,
            rules_checked: verdict.rules_checked.len(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across requests via `Arc<AppState>`.
pub struct AppState {
    pub config: EngineConfig,

    // ── Engines ─────────────────────────────────────────────────────────
    pub store: Arc<RulesStore>,
    pub pipeline: Arc<IngestionPipeline>,
    pub evaluator: Arc<ComplianceEvaluator>,
    pub directory: Arc<EmployeeDirectory>,

    // ── Audit Trail ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionRecord>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: EngineConfig,
        store: Arc<RulesStore>,
        pipeline: Arc<IngestionPipeline>,
        evaluator: Arc<ComplianceEvaluator>,
        directory: Arc<EmployeeDirectory>,
    ) -> Self {
        Self {
            config,
            store,
            pipeline,
            evaluator,
            directory,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error with an optional machine-readable code. The ring
    /// buffer is capped at [`MAX_RECENT_ERRORS`]; oldest entries are evicted
    /// when the limit is reached.
    pub fn push_error(&self, message: impl Into<String>, code: Option<String>) {
        let record = ErrorRecord {
            message: message.into(),
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a compliance decision. The ring buffer is capped at
    /// [`MAX_RECENT_DECISIONS`].
    pub fn push_decision(&self, record: DecisionRecord) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(record);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_buffer_is_capped() {
        let state = test_state();
        for i in 0..(MAX_RECENT_ERRORS + 10) {
            state.push_error(format!("error {i}"), None);
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        // Oldest entries were evicted.
        assert_eq!(errors[0].message, "error 10");
    }

    #[test]
    fn decision_record_summarises_the_verdict() {
        let query = ParsedQuery {
            ticker: "AAPL".into(),
            action: Some(crate::types::TradeAction::Buy),
            trade_date: None,
        };
        let verdict = ComplianceVerdict {
            allowed: false,
            reasons: vec!["restricted".into()],
            policy_refs: vec!["Sec 1".into()],
            rules_checked: vec!["Restricted List".into()],
        };
        let record = DecisionRecord::from_verdict("Meridian", "EMP002", &query, &verdict);
        assert_eq!(record.ticker, "AAPL");
        assert_eq!(record.action, "buy");
        assert!(!record.allowed);
        assert_eq!(record.rules_checked, 1);
    }

    fn test_state() -> AppState {
        use crate::generator::fakes::ScriptedGenerator;
        use crate::refinement::RefinementLoop;
        use crate::runner::fakes::ScriptedRunner;
        use crate::sandbox::fakes::ScriptedSandbox;
        use crate::validator::RuleValidator;
        use std::time::Duration;

        let store = Arc::new(RulesStore::new(std::env::temp_dir().join("sentinel-test-rules")));
        let generator = Arc::new(ScriptedGenerator::default());
        let validator = Arc::new(RuleValidator::new(
            Arc::new(ScriptedSandbox::default()),
            Duration::from_secs(60),
            Duration::from_secs(120),
            false,
        ));
        let refinement = Arc::new(RefinementLoop::new(validator, generator.clone(), 5));
        let pipeline = Arc::new(IngestionPipeline::new(
            generator,
            refinement,
            store.clone(),
        ));
        let evaluator = Arc::new(ComplianceEvaluator::new(
            store.clone(),
            Arc::new(ScriptedRunner::default()),
        ));

        AppState::new(
            EngineConfig::default(),
            store,
            pipeline,
            evaluator,
            Arc::new(EmployeeDirectory::new()),
        )
    }
}
