// =============================================================================
// Daytona Sandbox API Client — ephemeral Python sandboxes over REST
// =============================================================================
//
// SECURITY: the API key is never logged or serialized. Programs are shipped
// to the sandbox as base64 literals piped into the interpreter, which avoids
// every shell-quoting pitfall for arbitrary source text.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{ExecOutput, SandboxHandle, SandboxedExecutor};

/// Sandboxes self-terminate after this many minutes idle, even if a destroy
/// call never lands.
const AUTO_STOP_MINUTES: u32 = 5;

/// Daytona REST API client.
#[derive(Clone)]
pub struct DaytonaClient {
    base_url: String,
    target: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateSandboxResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    exit_code: i64,
    #[serde(default)]
    result: String,
}

impl DaytonaClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `DaytonaClient`.
    ///
    /// # Arguments
    /// * `api_key`  — Daytona API key (sent as a bearer header on every call).
    /// * `base_url` — API root, e.g. `https://app.daytona.io/api`.
    /// * `target`   — region sandboxes are provisioned in.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let api_key = api_key.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
            default_headers.insert("Authorization", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(Duration::from_secs(180))
            .build()
            .expect("failed to build reqwest client");

        let base_url = base_url.into();
        debug!(base_url = %base_url, "DaytonaClient initialised");

        Self {
            base_url,
            target: target.into(),
            client,
        }
    }

    /// Build the shell command that decodes and runs a program. The program
    /// text travels as a base64 literal so arbitrary source never touches
    /// shell quoting; an optional stdin payload is piped in the same way.
    fn command_for(program: &str, stdin: Option<&str>) -> String {
        let encoded = BASE64.encode(program);
        match stdin {
            Some(input) => {
                let stdin_b64 = BASE64.encode(input);
                format!("echo {stdin_b64} | base64 -d | (echo {encoded} | base64 -d | python3 /dev/stdin)")
            }
            None => format!("echo {encoded} | base64 -d | python3"),
        }
    }
}

#[async_trait]
impl SandboxedExecutor for DaytonaClient {
    #[instrument(skip(self), name = "daytona::create")]
    async fn create(&self) -> Result<SandboxHandle> {
        let url = format!("{}/sandbox", self.base_url);

        let body = serde_json::json!({
            "language": "python",
            "target": self.target,
            "autoStopInterval": AUTO_STOP_MINUTES,
            "labels": { "purpose": "rule-validation" },
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST /sandbox request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Daytona POST /sandbox returned {status}: {text}");
        }

        let created: CreateSandboxResponse = resp
            .json()
            .await
            .context("failed to parse sandbox create response")?;

        debug!(sandbox_id = %created.id, "sandbox provisioned");
        Ok(SandboxHandle { id: created.id })
    }

    #[instrument(skip(self, program, stdin), name = "daytona::run")]
    async fn run(
        &self,
        handle: &SandboxHandle,
        program: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let url = format!(
            "{}/toolbox/{}/toolbox/process/execute",
            self.base_url, handle.id
        );

        let body = serde_json::json!({
            "command": Self::command_for(program, stdin),
            "timeout": timeout.as_secs(),
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST process/execute request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "Daytona process/execute on {} returned {status}: {text}",
                handle.id
            );
        }

        let executed: ExecuteResponse = resp
            .json()
            .await
            .context("failed to parse process/execute response")?;

        debug!(
            sandbox_id = %handle.id,
            exit_code = executed.exit_code,
            "sandbox program finished"
        );

        // Daytona folds both streams into `result`; callers treat a non-zero
        // exit as the error signal and read the combined text either way.
        Ok(ExecOutput {
            exit_code: executed.exit_code,
            stdout: executed.result,
            stderr: String::new(),
        })
    }

    #[instrument(skip(self), name = "daytona::destroy")]
    async fn destroy(&self, handle: SandboxHandle) -> Result<()> {
        let url = format!("{}/sandbox/{}", self.base_url, handle.id);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .context("DELETE /sandbox request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(sandbox_id = %handle.id, %status, "sandbox destroy returned an error");
            anyhow::bail!("Daytona DELETE /sandbox/{} returned {status}: {text}", handle.id);
        }

        debug!(sandbox_id = %handle.id, "sandbox destroyed");
        Ok(())
    }
}

impl std::fmt::Debug for DaytonaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaytonaClient")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("target", &self.target)
            .finish()
    }
}
