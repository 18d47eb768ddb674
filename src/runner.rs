// =============================================================================
// Local Runner — steady-state rule execution outside the sandbox
// =============================================================================
//
// Rules reaching this point already passed sandbox validation, so evaluation
// trades isolation for throughput: the rule body runs in a local Python
// interpreter with the payload on stdin and a single JSON line expected on
// stdout. Deployments that need continued isolation at evaluation time can
// swap in a sandbox-backed RuleRunner without touching the evaluator.
//
// The configured interpreter is tried first; a binary-not-found condition
// falls through cleanly to `python`, any other spawn error aborts. Timeouts
// are enforced with hard termination (kill_on_drop).
// =============================================================================

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Fallback interpreter when the configured binary does not exist.
const FALLBACK_BIN: &str = "python";

/// Executes one validated rule against a payload. Implementations decide the
/// isolation level; the contract is JSON in, one JSON line out.
#[async_trait]
pub trait RuleRunner: Send + Sync {
    async fn run(&self, code: &str, payload: &serde_json::Value) -> Result<String>;
}

pub struct LocalRunner {
    python_bin: String,
    timeout: Duration,
}

impl LocalRunner {
    pub fn new(python_bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python_bin: python_bin.into(),
            timeout,
        }
    }

    /// The harness program: payload from stdin, rule body from an embedded
    /// base64 literal, result as one JSON line on stdout.
    fn build_program(code: &str) -> String {
        let code_b64 = BASE64.encode(code);
        format!(
            r#"import base64, json, sys, textwrap

payload = json.load(sys.stdin)
src = base64.b64decode("{code_b64}").decode()

namespace = {{}}
exec(textwrap.dedent(src), namespace)

fn = None
for name, value in namespace.items():
    if callable(value) and not name.startswith("__"):
        fn = value
        break
if fn is None:
    raise SystemExit("rule code defines no callable")

result = fn(payload["employee"], payload["security"], payload["trade_date"])
print(json.dumps(result))
"#
        )
    }

    fn spawn(&self, program: &str) -> Result<tokio::process::Child> {
        let mut cmd = Command::new(&self.python_bin);
        cmd.arg("-c")
            .arg(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match cmd.spawn() {
            Ok(child) => Ok(child),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    configured = %self.python_bin,
                    fallback = FALLBACK_BIN,
                    "configured interpreter not found; falling back"
                );
                let mut fallback = Command::new(FALLBACK_BIN);
                fallback
                    .arg("-c")
                    .arg(program)
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);
                fallback
                    .spawn()
                    .with_context(|| format!("failed to spawn {FALLBACK_BIN}"))
            }
            Err(e) => {
                Err(e).with_context(|| format!("failed to spawn {}", self.python_bin))
            }
        }
    }
}

#[async_trait]
impl RuleRunner for LocalRunner {
    async fn run(&self, code: &str, payload: &serde_json::Value) -> Result<String> {
        let program = Self::build_program(code);
        let mut child = self.spawn(&program)?;

        let input =
            serde_json::to_vec(payload).context("failed to serialise rule payload")?;
        let mut stdin = child
            .stdin
            .take()
            .context("rule runtime has no stdin pipe")?;
        stdin
            .write_all(&input)
            .await
            .context("failed to write payload to rule runtime")?;
        drop(stdin);

        // kill_on_drop means an elapsed timeout hard-terminates the child.
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("rule execution timed out after {:?}", self.timeout)
            })?
            .context("failed to collect rule runtime output")?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            anyhow::bail!(
                "rule runtime exited with {}: {}",
                output.status,
                format!("{} {}", stderr.trim(), stdout.trim()).trim()
            );
        }

        debug!(bytes = stdout.len(), "rule executed locally");
        Ok(stdout)
    }
}

// =============================================================================
// Test fakes
// =============================================================================
#[cfg(test)]
pub mod fakes {
    use std::collections::VecDeque;

    use parking_lot::Mutex;

    use super::*;

    /// A runner that replays scripted results in order.
    #[derive(Default)]
    pub struct ScriptedRunner {
        results: Mutex<VecDeque<Result<String>>>,
        pub payloads: Mutex<Vec<serde_json::Value>>,
    }

    impl ScriptedRunner {
        pub fn with_results(results: Vec<Result<String>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                payloads: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RuleRunner for ScriptedRunner {
        async fn run(&self, _code: &str, payload: &serde_json::Value) -> Result<String> {
            self.payloads.lock().push(payload.clone());
            self.results
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("{\"allowed\": true}\n".to_string()))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_reads_payload_from_stdin() {
        let program = LocalRunner::build_program("def rule(e, s, d):\n    return {}");
        assert!(program.contains("json.load(sys.stdin)"));
        assert!(program.contains("textwrap.dedent"));
        assert!(program.contains("json.dumps(result)"));
        // The rule body itself only appears base64-encoded.
        assert!(!program.contains("def rule"));
    }

    #[test]
    fn program_dispatches_on_first_callable() {
        let program = LocalRunner::build_program("x = 1");
        assert!(program.contains("callable(value)"));
        assert!(program.contains("rule code defines no callable"));
    }
}
