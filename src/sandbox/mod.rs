// =============================================================================
// Sandboxed execution capability
// =============================================================================
//
// An ephemeral, network-denied environment used solely during rule
// validation. Adapters must guarantee destruction on all exit paths; the
// validator owns the create/run/destroy sequencing.
// =============================================================================

pub mod daytona;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use daytona::DaytonaClient;

/// Opaque handle to one provisioned sandbox.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    pub id: String,
}

/// Captured output of one program run inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// stderr and stdout folded into one diagnostic string.
    pub fn combined(&self) -> String {
        let mut out = String::new();
        if !self.stderr.trim().is_empty() {
            out.push_str(self.stderr.trim());
        }
        if !self.stdout.trim().is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(self.stdout.trim());
        }
        out
    }
}

/// The sandbox vendor capability. Tests substitute in-memory fakes.
#[async_trait]
pub trait SandboxedExecutor: Send + Sync {
    /// Provision a fresh, isolated execution environment.
    async fn create(&self) -> Result<SandboxHandle>;

    /// Run a short program, optionally feeding `stdin`, bounded by `timeout`.
    async fn run(
        &self,
        handle: &SandboxHandle,
        program: &str,
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Tear the environment down. Must be called on every exit path unless
    /// the deployment explicitly preserves sandboxes for debugging.
    async fn destroy(&self, handle: SandboxHandle) -> Result<()>;
}

// =============================================================================
// Test fakes
// =============================================================================
#[cfg(test)]
pub mod fakes {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// A sandbox that replays scripted run outputs in order and counts calls.
    #[derive(Default)]
    pub struct ScriptedSandbox {
        outputs: Mutex<VecDeque<ExecOutput>>,
        pub created: AtomicUsize,
        pub runs: AtomicUsize,
        pub destroyed: AtomicUsize,
    }

    impl ScriptedSandbox {
        pub fn with_outputs(outputs: Vec<ExecOutput>) -> Self {
            Self {
                outputs: Mutex::new(outputs.into()),
                ..Default::default()
            }
        }

        pub fn ok(stdout: &str) -> ExecOutput {
            ExecOutput {
                exit_code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }

        pub fn failed(stdout: &str) -> ExecOutput {
            ExecOutput {
                exit_code: 1,
                stdout: stdout.to_string(),
                stderr: String::new(),
            }
        }
    }

    #[async_trait]
    impl SandboxedExecutor for ScriptedSandbox {
        async fn create(&self) -> Result<SandboxHandle> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(SandboxHandle {
                id: format!("fake-{n}"),
            })
        }

        async fn run(
            &self,
            _handle: &SandboxHandle,
            _program: &str,
            _stdin: Option<&str>,
            _timeout: Duration,
        ) -> Result<ExecOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .outputs
                .lock()
                .pop_front()
                .unwrap_or_else(|| Self::ok("")))
        }

        async fn destroy(&self, _handle: SandboxHandle) -> Result<()> {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
