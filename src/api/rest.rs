// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Three core endpoints exercise the engine: policy ingestion, compliance
// checks, and health. Read-only audit endpoints expose the decision and
// error ring buffers. CORS is configured permissively so browser demo
// clients (and preflight requests) work out of the box; tighten
// allowed origins in production.
//
// Error bodies are uniformly {status:"ERROR", code, message}.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app_state::{AppState, DecisionRecord};
use crate::query;
use crate::types::{Security, TradeAction};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Core ────────────────────────────────────────────────────
        .route("/api/policies/ingest", post(ingest_policy))
        .route("/api/compliance/check", post(check_compliance))
        .route("/health", get(health))
        // ── Read-only views ─────────────────────────────────────────
        .route("/api/policies/rules", get(firm_rules))
        .route("/api/audit/decisions", get(audit_decisions))
        .route("/api/audit/errors", get(audit_errors))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Error helper
// ---------------------------------------------------------------------------

fn error_response(
    status: StatusCode,
    code: &str,
    message: impl Into<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({
            "status": "ERROR",
            "code": code,
            "message": message.into(),
        })),
    )
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.uptime_secs(),
    }))
}

// =============================================================================
// Policy ingestion
// =============================================================================

#[derive(Deserialize)]
struct IngestRequest {
    #[serde(default)]
    firm_name: String,
    #[serde(default)]
    policy_text: String,
}

async fn ingest_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<IngestRequest>,
) -> impl IntoResponse {
    let firm_name = req.firm_name.trim();
    let policy_text = req.policy_text.trim();

    if firm_name.is_empty() || policy_text.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "firm_name and policy_text are required",
        )
        .into_response();
    }

    info!(firm = %firm_name, chars = policy_text.len(), "policy ingestion requested");

    match state.pipeline.ingest(policy_text, firm_name).await {
        Ok(bundle) => {
            let rules: Vec<serde_json::Value> = bundle
                .rules
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "rule_name": r.rule_name,
                        "description": r.description,
                        "attempts": r.generation_attempt,
                        "validated": true,
                    })
                })
                .collect();

            Json(serde_json::json!({
                "status": "SUCCESS",
                "firm_name": bundle.firm_name,
                "rules_deployed": bundle.rules.len(),
                "total_iterations": bundle.total_iterations,
                "rules": rules,
            }))
            .into_response()
        }
        Err(e) => {
            error!(firm = %firm_name, error = %format!("{e:#}"), "policy ingestion failed");
            state.push_error(format!("ingestion failed for {firm_name}: {e:#}"), Some("INGESTION_FAILED".into()));
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INGESTION_FAILED",
                format!("{e:#}"),
            )
            .into_response()
        }
    }
}

// =============================================================================
// Compliance check
// =============================================================================

#[derive(Deserialize)]
struct CheckRequest {
    #[serde(default)]
    firm_name: String,
    #[serde(default)]
    employee_id: String,
    #[serde(default)]
    query: String,
    #[serde(default)]
    trade_date: Option<String>,
}

async fn check_compliance(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let firm_name = req.firm_name.trim();
    let employee_id = req.employee_id.trim();
    let question = req.query.trim();

    if firm_name.is_empty() || employee_id.is_empty() || question.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "firm_name, employee_id, and query are required",
        )
        .into_response();
    }

    let Some(parsed) = query::parse(question) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "PARSE_ERROR",
            "could not extract a ticker from the query",
        )
        .into_response();
    };

    let Some(employee) = state.directory.lookup(employee_id, firm_name) else {
        return error_response(
            StatusCode::NOT_FOUND,
            "EMPLOYEE_NOT_FOUND",
            format!("unknown employee_id {employee_id}"),
        )
        .into_response();
    };

    // Request-level date wins, then the date parsed out of the question,
    // then today (UTC).
    let trade_date = req
        .trade_date
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .or_else(|| parsed.trade_date.clone())
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    let security = Security::new(
        parsed.ticker.clone(),
        parsed.action.unwrap_or(TradeAction::Trade),
    );

    match state
        .evaluator
        .evaluate(firm_name, &employee, &security, &trade_date)
        .await
    {
        Ok(verdict) => {
            state.push_decision(DecisionRecord::from_verdict(
                firm_name,
                employee_id,
                &parsed,
                &verdict,
            ));

            Json(serde_json::json!({
                "status": "SUCCESS",
                "firm_name": firm_name,
                "employee_id": employee_id,
                "parsed_query": {
                    "ticker": parsed.ticker,
                    "action": parsed.action.unwrap_or(TradeAction::Trade).to_string(),
                    "trade_date": trade_date,
                },
                "compliance": verdict,
            }))
            .into_response()
        }
        Err(e) => {
            error!(firm = %firm_name, error = %format!("{e:#}"), "compliance check failed");
            state.push_error(format!("compliance check failed: {e:#}"), Some("STORE_ERROR".into()));
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "STORE_ERROR",
                format!("{e:#}"),
            )
            .into_response()
        }
    }
}

// =============================================================================
// Read-only views
// =============================================================================

#[derive(Deserialize)]
struct FirmQuery {
    #[serde(default)]
    firm_name: String,
}

async fn firm_rules(
    State(state): State<Arc<AppState>>,
    Query(params): Query<FirmQuery>,
) -> impl IntoResponse {
    let firm_name = params.firm_name.trim();
    if firm_name.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "firm_name query parameter is required",
        )
        .into_response();
    }

    match state.store.load(firm_name) {
        Ok(Some(bundle)) => {
            let rules: Vec<serde_json::Value> = bundle
                .rules
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "rule_id": r.rule_id,
                        "rule_name": r.rule_name,
                        "description": r.description,
                        "policy_reference": r.policy_reference,
                        "applies_to_roles": r.applies_to_roles,
                        "active": r.active,
                        "attempts": r.generation_attempt,
                    })
                })
                .collect();

            Json(serde_json::json!({
                "status": "SUCCESS",
                "firm_name": bundle.firm_name,
                "policy_version": bundle.policy_version,
                "last_updated": bundle.last_updated,
                "total_iterations": bundle.total_iterations,
                "rules": rules,
            }))
            .into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            "FIRM_NOT_FOUND",
            format!("no rules on file for {firm_name}"),
        )
        .into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORE_ERROR",
            format!("{e:#}"),
        )
        .into_response(),
    }
}

async fn audit_decisions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let decisions = state.recent_decisions.read().clone();
    Json(decisions)
}

async fn audit_errors(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let errors = state.recent_errors.read().clone();
    Json(errors)
}
