// =============================================================================
// Sentinel Compliance Nexus — Main Entry Point
// =============================================================================
//
// Converts written compliance policies into sandbox-validated executable
// rules and answers natural-language trade questions against them. All
// engines are constructed once here and injected into the request handlers;
// the only process-wide mutable state is the rules store cache and the audit
// ring buffers.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod config;
mod employees;
mod evaluator;
mod feedback;
mod generator;
mod pipeline;
mod query;
mod refinement;
mod runner;
mod sandbox;
mod screener;
mod store;
mod types;
mod validator;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::employees::EmployeeDirectory;
use crate::evaluator::ComplianceEvaluator;
use crate::generator::AnthropicGenerator;
use crate::pipeline::IngestionPipeline;
use crate::refinement::RefinementLoop;
use crate::runner::LocalRunner;
use crate::sandbox::DaytonaClient;
use crate::store::RulesStore;
use crate::validator::RuleValidator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Sentinel Compliance Nexus — Starting Up           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = EngineConfig::load("engine_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        EngineConfig::default()
    });
    config.apply_env_overrides();

    info!(
        model = %config.generator_model,
        rules_dir = %config.rules_dir,
        max_attempts = config.max_attempts,
        "Engine configured"
    );

    // ── 2. Vendor credentials ────────────────────────────────────────────
    let anthropic_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    if anthropic_key.is_empty() {
        warn!("ANTHROPIC_API_KEY is not set — policy ingestion will fail");
    }
    let daytona_key = std::env::var("DAYTONA_API_KEY").unwrap_or_default();
    if daytona_key.is_empty() {
        warn!("DAYTONA_API_KEY is not set — rule validation will fail");
    }

    // ── 3. Build engines ─────────────────────────────────────────────────
    let generator = Arc::new(AnthropicGenerator::new(
        anthropic_key,
        config.generator_model.clone(),
        config.generator_max_tokens,
    ));

    let sandbox = Arc::new(DaytonaClient::new(
        daytona_key,
        config.sandbox_api_url.clone(),
        config.sandbox_target.clone(),
    ));

    let validator = Arc::new(RuleValidator::new(
        sandbox,
        Duration::from_secs(config.syntax_timeout_secs),
        Duration::from_secs(config.functional_timeout_secs),
        config.preserve_sandboxes,
    ));

    let refinement = Arc::new(RefinementLoop::new(
        validator,
        generator.clone(),
        config.max_attempts,
    ));

    let store = Arc::new(RulesStore::new(config.rules_dir.clone()));

    let pipeline = Arc::new(IngestionPipeline::new(
        generator,
        refinement,
        store.clone(),
    ));

    let runner = Arc::new(LocalRunner::new(
        config.python_bin.clone(),
        Duration::from_secs(config.runner_timeout_secs),
    ));

    let evaluator = Arc::new(ComplianceEvaluator::new(store.clone(), runner));

    let directory = Arc::new(EmployeeDirectory::new());

    let state = Arc::new(AppState::new(
        config, store, pipeline, evaluator, directory,
    ));

    // ── 4. Start the API server ──────────────────────────────────────────
    let bind_addr = format!("0.0.0.0:{}", state.config.port);
    let app = api::rest::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind API server");
    info!(addr = %bind_addr, "API server listening");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    info!("Sentinel Compliance Nexus shut down complete.");
    Ok(())
}
