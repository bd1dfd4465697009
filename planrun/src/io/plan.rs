//! Plan files (TOML) describing the tests a pipeline runs.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A plan loaded from disk.
///
/// Missing sections default to sensible values; only `[[tests]]` entries need
/// a `name` and a `command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanConfig {
    pub plan: PlanMeta,
    pub tests: Vec<TestDef>,
    pub prepare: HookConfig,
    pub execute: ExecuteConfig,
    pub finish: HookConfig,
    pub login: LoginConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanMeta {
    /// Plan name. Defaults to the file stem.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestDef {
    pub name: String,
    /// Shell snippet run with `sh -c` on the guest.
    pub command: String,
    /// Overrides `execute.timeout_secs` for this test.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Shell commands run on the guest during `prepare` or `finish`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HookConfig {
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecuteConfig {
    /// Per-test wall-clock budget in seconds.
    pub timeout_secs: u64,
    /// Truncate captured test output beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoginConfig {
    /// Shell used for interactive sessions and `--command`.
    pub shell: String,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            plan: PlanMeta::default(),
            tests: Vec::new(),
            prepare: HookConfig::default(),
            execute: ExecuteConfig::default(),
            finish: HookConfig::default(),
            login: LoginConfig::default(),
        }
    }
}

impl PlanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.plan.name.trim().is_empty() {
            return Err(anyhow!("plan.name must be non-empty"));
        }
        if self.execute.timeout_secs == 0 {
            return Err(anyhow!("execute.timeout_secs must be > 0"));
        }
        if self.execute.output_limit_bytes == 0 {
            return Err(anyhow!("execute.output_limit_bytes must be > 0"));
        }
        if self.login.shell.trim().is_empty() {
            return Err(anyhow!("login.shell must be non-empty"));
        }
        let mut seen = BTreeSet::new();
        for test in &self.tests {
            if test.name.trim().is_empty() {
                return Err(anyhow!("test name must be non-empty"));
            }
            if !seen.insert(test.name.as_str()) {
                return Err(anyhow!("duplicate test name '{}'", test.name));
            }
            if test.command.trim().is_empty() {
                return Err(anyhow!("test '{}' has an empty command", test.name));
            }
            if test.timeout_secs == Some(0) {
                return Err(anyhow!("test '{}' timeout_secs must be > 0", test.name));
            }
        }
        Ok(())
    }

    pub fn test(&self, name: &str) -> Option<&TestDef> {
        self.tests.iter().find(|test| test.name == name)
    }

    pub fn test_timeout(&self, test: &TestDef) -> Duration {
        Duration::from_secs(test.timeout_secs.unwrap_or(self.execute.timeout_secs))
    }
}

/// Load and validate a plan file. An unset `plan.name` is taken from the file stem.
pub fn load_plan(path: &Path) -> Result<PlanConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut plan: PlanConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if plan.plan.name.trim().is_empty()
        && let Some(stem) = path.file_stem()
    {
        plan.plan.name = stem.to_string_lossy().into_owned();
    }
    plan.validate()
        .with_context(|| format!("invalid plan {}", path.display()))?;
    debug!(plan = %plan.plan.name, tests = plan.tests.len(), "plan loaded");
    Ok(plan)
}
