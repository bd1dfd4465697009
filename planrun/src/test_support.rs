//! Test-only helpers: scripted phase drivers and recording session invokers.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};

use crate::core::ledger::OutcomeLedger;
use crate::core::trigger::TriggerSpec;
use crate::core::types::{ResultKind, TestOutcomeRecord};
use crate::io::driver::{DiscoveredTest, GuestContext, PhaseDriver};
use crate::io::session::{SessionInvoker, SessionOutcome, SessionRequest};
use crate::pipeline::LoginOptions;

/// Build login options from raw CLI-style values.
pub fn login(per_test: bool, when: &[&str], steps: &[&str]) -> LoginOptions {
    LoginOptions {
        trigger: TriggerSpec::from_args(per_test, when, steps).expect("valid trigger"),
        command: None,
    }
}

/// Temp directory holding `<name>.toml` with the given body.
pub fn temp_plan(name: &str, body: &str) -> (tempfile::TempDir, PathBuf) {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = write_plan(temp.path(), name, body);
    (temp, path)
}

/// Write `<dir>/<name>.toml` and return its path.
pub fn write_plan(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(format!("{name}.toml"));
    fs::write(&path, body).expect("write plan");
    path
}

/// Create a record with the given kinds.
pub fn record(test_id: &str, kinds: &[ResultKind]) -> TestOutcomeRecord {
    TestOutcomeRecord::new(test_id, kinds.iter().copied())
}

/// Driver that returns predetermined outcomes and logs every call.
pub struct ScriptedDriver {
    outcomes: Vec<TestOutcomeRecord>,
    fail_at: Option<String>,
    calls: Vec<String>,
    reported: Option<OutcomeLedger>,
}

impl ScriptedDriver {
    /// Tests are discovered and executed in the given order.
    pub fn new(tests: Vec<(&str, Vec<ResultKind>)>) -> Self {
        Self {
            outcomes: tests
                .into_iter()
                .map(|(id, kinds)| TestOutcomeRecord::new(id, kinds))
                .collect(),
            fail_at: None,
            calls: Vec::new(),
            reported: None,
        }
    }

    /// Make the named phase (or `execute <test>`) return an error.
    pub fn failing_at(mut self, call: &str) -> Self {
        self.fail_at = Some(call.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.clone()
    }

    /// Ledger passed to `report`, if it ran.
    pub fn reported(&self) -> Option<&OutcomeLedger> {
        self.reported.as_ref()
    }

    fn call(&mut self, name: String) -> Result<()> {
        let fail = self.fail_at.as_deref() == Some(name.as_str());
        self.calls.push(name.clone());
        if fail {
            return Err(anyhow!("scripted failure in {name}"));
        }
        Ok(())
    }
}

impl PhaseDriver for ScriptedDriver {
    fn discover(&mut self) -> Result<Vec<DiscoveredTest>> {
        self.call("discover".to_string())?;
        Ok(self
            .outcomes
            .iter()
            .map(|outcome| DiscoveredTest::new(outcome.test_id.clone()))
            .collect())
    }

    fn provision(&mut self) -> Result<GuestContext> {
        self.call("provision".to_string())?;
        Ok(scripted_guest())
    }

    fn prepare(&mut self, _guest: &GuestContext) -> Result<()> {
        self.call("prepare".to_string())
    }

    fn execute(
        &mut self,
        _guest: &GuestContext,
        test: &DiscoveredTest,
    ) -> Result<TestOutcomeRecord> {
        self.call(format!("execute {}", test.id))?;
        self.outcomes
            .iter()
            .find(|outcome| outcome.test_id == test.id)
            .cloned()
            .ok_or_else(|| anyhow!("no scripted outcome for {}", test.id))
    }

    fn finish(&mut self, _guest: &GuestContext) -> Result<()> {
        self.call("finish".to_string())
    }

    fn report(&mut self, ledger: &OutcomeLedger) -> Result<()> {
        self.call("report".to_string())?;
        self.reported = Some(ledger.clone());
        Ok(())
    }

    fn cleanup(&mut self, _guest: Option<&GuestContext>) -> Result<()> {
        self.call("cleanup".to_string())
    }
}

/// Guest returned by [`ScriptedDriver::provision`].
pub fn scripted_guest() -> GuestContext {
    GuestContext {
        name: "scripted".to_string(),
        workdir: PathBuf::from("/tmp"),
        shell: None,
        env: BTreeMap::new(),
    }
}

/// Session invoker that records requests instead of spawning a shell.
pub struct RecordingInvoker {
    exit_code: i32,
    requests: Mutex<Vec<SessionRequest>>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::with_exit_code(0)
    }

    pub fn with_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

impl Default for RecordingInvoker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionInvoker for RecordingInvoker {
    fn invoke(&self, request: &SessionRequest) -> Result<SessionOutcome> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok(SessionOutcome {
            exit_code: Some(self.exit_code),
        })
    }
}
