// =============================================================================
// Engine Configuration — tunable settings with atomic save
// =============================================================================
//
// Central configuration hub for the Sentinel compliance engine. Every tunable
// knob lives here so deployments can be reconfigured without a rebuild.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry serde defaults so that adding new fields never
// breaks loading an older config file. Secrets (API keys) are NOT part of
// this file; they come from the environment at startup.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_port() -> u16 {
    3000
}

fn default_generator_model() -> String {
    "claude-sonnet-4-6".to_string()
}

fn default_generator_max_tokens() -> u32 {
    4096
}

fn default_sandbox_api_url() -> String {
    "https://app.daytona.io/api".to_string()
}

fn default_sandbox_target() -> String {
    "us".to_string()
}

fn default_rules_dir() -> String {
    "rules".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_syntax_timeout_secs() -> u64 {
    60
}

fn default_functional_timeout_secs() -> u64 {
    120
}

fn default_runner_timeout_secs() -> u64 {
    10
}

fn default_python_bin() -> String {
    "python3".to_string()
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the compliance engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- HTTP surface --------------------------------------------------------

    /// Port the REST API binds to.
    #[serde(default = "default_port")]
    pub port: u16,

    // --- Generator -----------------------------------------------------------

    /// Model id used for rule generation.
    #[serde(default = "default_generator_model")]
    pub generator_model: String,

    /// Output token ceiling per generation call.
    #[serde(default = "default_generator_max_tokens")]
    pub generator_max_tokens: u32,

    // --- Sandbox -------------------------------------------------------------

    /// Base URL of the sandbox vendor API.
    #[serde(default = "default_sandbox_api_url")]
    pub sandbox_api_url: String,

    /// Region/target sandboxes are provisioned in.
    #[serde(default = "default_sandbox_target")]
    pub sandbox_target: String,

    /// Skip sandbox destruction after validation (debugging only).
    #[serde(default)]
    pub preserve_sandboxes: bool,

    /// Timeout for the parse-check phase, seconds.
    #[serde(default = "default_syntax_timeout_secs")]
    pub syntax_timeout_secs: u64,

    /// Timeout for the functional-run phase, seconds.
    #[serde(default = "default_functional_timeout_secs")]
    pub functional_timeout_secs: u64,

    // --- Refinement ----------------------------------------------------------

    /// Maximum generate-validate iterations per draft rule.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    // --- Persistence ---------------------------------------------------------

    /// Directory holding one rules document per firm.
    #[serde(default = "default_rules_dir")]
    pub rules_dir: String,

    // --- Evaluation runner ---------------------------------------------------

    /// Interpreter used by the local runner; falls back to `python` when the
    /// configured binary is not found.
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Hard-kill timeout for steady-state rule execution, seconds.
    #[serde(default = "default_runner_timeout_secs")]
    pub runner_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            generator_model: default_generator_model(),
            generator_max_tokens: default_generator_max_tokens(),
            sandbox_api_url: default_sandbox_api_url(),
            sandbox_target: default_sandbox_target(),
            preserve_sandboxes: false,
            syntax_timeout_secs: default_syntax_timeout_secs(),
            functional_timeout_secs: default_functional_timeout_secs(),
            max_attempts: default_max_attempts(),
            rules_dir: default_rules_dir(),
            python_bin: default_python_bin(),
            runner_timeout_secs: default_runner_timeout_secs(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            model = %config.generator_model,
            rules_dir = %config.rules_dir,
            "engine config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides. Called once at startup, after `load`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
        if let Ok(model) = std::env::var("ANTHROPIC_MODEL") {
            if !model.trim().is_empty() {
                self.generator_model = model;
            }
        }
        if let Ok(url) = std::env::var("DAYTONA_API_URL") {
            if !url.trim().is_empty() {
                self.sandbox_api_url = url;
            }
        }
        if let Ok(target) = std::env::var("DAYTONA_TARGET") {
            if !target.trim().is_empty() {
                self.sandbox_target = target;
            }
        }
        if let Ok(flag) = std::env::var("DAYTONA_PRESERVE_SANDBOXES") {
            self.preserve_sandboxes = matches!(flag.as_str(), "1" | "true" | "yes");
        }
        if let Ok(bin) = std::env::var("PYTHON_BIN") {
            if !bin.trim().is_empty() {
                self.python_bin = bin;
            }
        }
        if let Ok(dir) = std::env::var("RULES_DIR") {
            if !dir.trim().is_empty() {
                self.rules_dir = dir;
            }
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
    fn default_config_has_expected_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.generator_model, "claude-sonnet-4-6");
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.syntax_timeout_secs, 60);
        assert_eq!(cfg.functional_timeout_secs, 120);
        assert_eq!(cfg.runner_timeout_secs, 10);
        assert_eq!(cfg.python_bin, "python3");
        assert_eq!(cfg.rules_dir, "rules");
        assert!(!cfg.preserve_sandboxes);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.sandbox_target, "us");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "max_attempts": 3, "rules_dir": "/var/lib/sentinel/rules" }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.rules_dir, "/var/lib/sentinel/rules");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.python_bin, "python3");
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.port, cfg2.port);
        assert_eq!(cfg.generator_model, cfg2.generator_model);
        assert_eq!(cfg.max_attempts, cfg2.max_attempts);
    }

    #[test]
    fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine_config.json");

        let mut cfg = EngineConfig::default();
        cfg.max_attempts = 2;
        cfg.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.max_attempts, 2);
    }
}
