// =============================================================================
// Rules Store — per-firm bundle persistence with a read-through cache
// =============================================================================
//
// One pretty-printed JSON document per firm, at
// <rules_dir>/<normalized_firm>_rules.json. Writes are atomic from the
// caller's perspective (write to .tmp, then rename), so a crash mid-save
// leaves the prior document intact. An in-memory cache keyed by the
// caller-supplied firm name absorbs repeated reads under evaluation load;
// it is populated on save and on first load, and entries are replaced
// whole.
//
// Single-writer-per-firm is assumed: concurrent saves for one firm are
// last-write-wins with no merge.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::types::{Rule, RulesBundle};

/// Normalize a firm name into a filesystem key: lowercase, trimmed,
/// whitespace runs collapsed to a single underscore.
pub fn normalize_firm_name(firm_name: &str) -> String {
    firm_name
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

pub struct RulesStore {
    rules_dir: PathBuf,
    cache: RwLock<HashMap<String, RulesBundle>>,
}

impl RulesStore {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn document_path(&self, firm_name: &str) -> PathBuf {
        self.rules_dir
            .join(format!("{}_rules.json", normalize_firm_name(firm_name)))
    }

    /// Persist a fresh bundle for `firm_name`, replacing any prior one, and
    /// return the bundle as stored.
    pub fn save(
        &self,
        firm_name: &str,
        rules: Vec<Rule>,
        total_iterations: u32,
    ) -> Result<RulesBundle> {
        let now = Utc::now();
        let bundle = RulesBundle {
            firm_name: firm_name.to_string(),
            policy_version: now.format("%Y-%m").to_string(),
            last_updated: now.to_rfc3339(),
            total_iterations,
            rules,
        };

        std::fs::create_dir_all(&self.rules_dir).with_context(|| {
            format!("failed to create rules dir {}", self.rules_dir.display())
        })?;

        let path = self.document_path(firm_name);
        let content = serde_json::to_string_pretty(&bundle)
            .context("failed to serialise rules bundle to JSON")?;

        // Atomic write: tmp sibling, then rename over the old document.
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp bundle to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to rename tmp bundle to {}", path.display()))?;

        self.cache
            .write()
            .insert(firm_name.to_string(), bundle.clone());

        info!(
            firm = %firm_name,
            rules = bundle.rules.len(),
            path = %path.display(),
            "rules bundle saved"
        );
        Ok(bundle)
    }

    /// Load the bundle for `firm_name`, reading through the cache. Returns
    /// `Ok(None)` when the firm has never been ingested.
    pub fn load(&self, firm_name: &str) -> Result<Option<RulesBundle>> {
        if let Some(bundle) = self.cache.read().get(firm_name) {
            debug!(firm = %firm_name, "rules bundle served from cache");
            return Ok(Some(bundle.clone()));
        }

        let path = self.document_path(firm_name);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read rules bundle from {}", path.display()))?;
        let bundle: RulesBundle = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse rules bundle from {}", path.display()))?;

        self.cache
            .write()
            .insert(firm_name.to_string(), bundle.clone());

        debug!(firm = %firm_name, path = %path.display(), "rules bundle loaded from disk");
        Ok(Some(bundle))
    }
}
