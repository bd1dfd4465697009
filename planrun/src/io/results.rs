//! Plan results storage (`<workdir>/<plan>/results.json`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ledger::OutcomeLedger;
use crate::core::types::{ResultKind, TestOutcomeRecord};

/// Serialized outcome of one plan run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultsFile {
    pub plan: String,
    /// Aggregate result, `None` when no tests ran.
    pub overall: Option<ResultKind>,
    pub summary: BTreeMap<ResultKind, usize>,
    pub results: Vec<TestOutcomeRecord>,
}

impl ResultsFile {
    pub fn from_ledger(plan: &str, ledger: &OutcomeLedger) -> Self {
        Self {
            plan: plan.to_string(),
            overall: ledger.overall(),
            summary: ledger.summary(),
            results: ledger.records().to_vec(),
        }
    }
}

pub fn load_results(path: &Path) -> Result<ResultsFile> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read results {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse results {}", path.display()))
}

/// Atomically write results to disk (temp file + rename).
pub fn write_results(path: &Path, results: &ResultsFile) -> Result<()> {
    debug!(path = %path.display(), tests = results.results.len(), "writing results");
    let mut buf = serde_json::to_string_pretty(results).context("serialize results")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("results path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp results {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace results {}", path.display()))?;
    Ok(())
}
