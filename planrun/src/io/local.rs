//! Phase driver that uses the local host as the plan's only guest.
//!
//! Layout under the plan workdir:
//!
//! ```text
//! <workdir>/<plan>/
//!   prepare/<n>.txt
//!   execute/<test>/output.txt
//!   finish/<n>.txt
//!   results.json
//! ```
//!
//! `<plan>` and `<test>` are reduced to a single safe path component.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use tracing::{debug, info, instrument, warn};

use crate::core::ledger::OutcomeLedger;
use crate::core::types::{ResultKind, TestOutcomeRecord};
use crate::io::driver::{DiscoveredTest, GuestContext, PhaseDriver};
use crate::io::plan::PlanConfig;
use crate::io::process::{LoggedRun, Termination, run_logged};
use crate::io::results::{ResultsFile, write_results};

const GUEST_NAME: &str = "local";
const HOOK_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Per-run artifact directories, recreated on every provision.
const RUN_DIRS: [&str; 3] = ["prepare", "execute", "finish"];

/// Runs every phase on the local host.
pub struct LocalDriver {
    plan: PlanConfig,
    plan_dir: PathBuf,
    marker: Regex,
}

impl LocalDriver {
    pub fn new(plan: PlanConfig, workdir: &Path) -> Result<Self> {
        let plan_dir = workdir.join(path_component(&plan.plan.name));
        let marker = Regex::new(r"(?m)^::(warn|info)::").context("compile result marker")?;
        Ok(Self {
            plan,
            plan_dir,
            marker,
        })
    }

    pub fn plan_dir(&self) -> &Path {
        &self.plan_dir
    }

    pub fn results_path(&self) -> PathBuf {
        self.plan_dir.join("results.json")
    }

    fn run_hooks(&self, phase: &str, commands: &[String], guest: &GuestContext) -> Result<()> {
        for (index, script) in commands.iter().enumerate() {
            debug!(phase, index, "running hook");
            let log_path = self.plan_dir.join(phase).join(format!("{index}.txt"));
            let run = run_logged(
                shell_command(script, guest),
                HOOK_TIMEOUT,
                &log_path,
                self.plan.execute.output_limit_bytes,
            )
            .with_context(|| format!("{phase} command #{index}"))?;
            if !run.termination.success() {
                return Err(anyhow!(
                    "{phase} command #{index} failed ({:?}), see {}: {}",
                    run.termination,
                    run.log_path.display(),
                    script
                ));
            }
        }
        Ok(())
    }

    fn classify(&self, test_id: &str, run: &LoggedRun) -> TestOutcomeRecord {
        let mut kinds = vec![match run.termination {
            Termination::Exited(0) => ResultKind::Pass,
            Termination::Exited(1) => ResultKind::Fail,
            Termination::Exited(_) | Termination::Signaled | Termination::TimedOut => {
                ResultKind::Error
            }
        }];
        for captures in self.marker.captures_iter(&run.log) {
            match &captures[1] {
                "warn" => kinds.push(ResultKind::Warn),
                _ => kinds.push(ResultKind::Info),
            }
        }
        TestOutcomeRecord::new(test_id, kinds)
    }
}

impl PhaseDriver for LocalDriver {
    fn discover(&mut self) -> Result<Vec<DiscoveredTest>> {
        let tests: Vec<DiscoveredTest> = self
            .plan
            .tests
            .iter()
            .map(|test| DiscoveredTest::new(test.name.clone()))
            .collect();
        info!(plan = %self.plan.plan.name, count = tests.len(), "discovered tests");
        Ok(tests)
    }

    fn provision(&mut self) -> Result<GuestContext> {
        for name in RUN_DIRS {
            let dir = self.plan_dir.join(name);
            if dir.exists() {
                fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
            }
        }
        fs::create_dir_all(&self.plan_dir)
            .with_context(|| format!("create plan dir {}", self.plan_dir.display()))?;
        let workdir = self
            .plan_dir
            .canonicalize()
            .with_context(|| format!("resolve {}", self.plan_dir.display()))?;
        let env = BTreeMap::from([
            ("PLANRUN_WORKDIR".to_string(), workdir.display().to_string()),
            ("PLANRUN_GUEST".to_string(), GUEST_NAME.to_string()),
        ]);
        info!(guest = GUEST_NAME, workdir = %workdir.display(), "guest ready");
        Ok(GuestContext {
            name: GUEST_NAME.to_string(),
            workdir,
            shell: Some(self.plan.login.shell.clone()),
            env,
        })
    }

    fn prepare(&mut self, guest: &GuestContext) -> Result<()> {
        self.run_hooks("prepare", &self.plan.prepare.commands, guest)
    }

    #[instrument(skip_all, fields(test = %test.id))]
    fn execute(
        &mut self,
        guest: &GuestContext,
        test: &DiscoveredTest,
    ) -> Result<TestOutcomeRecord> {
        let def = self
            .plan
            .test(&test.id)
            .ok_or_else(|| anyhow!("unknown test '{}'", test.id))?;
        let mut cmd = shell_command(&def.command, guest);
        cmd.env("PLANRUN_TEST", &test.id);
        let log_path = self
            .plan_dir
            .join("execute")
            .join(path_component(&test.id))
            .join("output.txt");
        let run = run_logged(
            cmd,
            self.plan.test_timeout(def),
            &log_path,
            self.plan.execute.output_limit_bytes,
        )
        .with_context(|| format!("run test '{}'", test.id))?;

        let record = self.classify(&test.id, &run);
        if run.termination == Termination::TimedOut {
            warn!(test = %test.id, "test timed out");
        }
        info!(test = %test.id, kinds = ?record.kinds, "test finished");
        Ok(record)
    }

    fn finish(&mut self, guest: &GuestContext) -> Result<()> {
        self.run_hooks("finish", &self.plan.finish.commands, guest)
    }

    fn report(&mut self, ledger: &OutcomeLedger) -> Result<()> {
        let path = self.results_path();
        write_results(&path, &ResultsFile::from_ledger(&self.plan.plan.name, ledger))?;
        info!(path = %path.display(), "results written");
        Ok(())
    }

    fn cleanup(&mut self, guest: Option<&GuestContext>) -> Result<()> {
        // Local guests have nothing to tear down; artifacts are kept.
        debug!(guest = guest.map(|g| g.name.as_str()), "cleanup");
        Ok(())
    }
}

fn shell_command(script: &str, guest: &GuestContext) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(script)
        .current_dir(&guest.workdir)
        .envs(&guest.env);
    cmd
}

/// Map a plan name or test id such as `/tests/basic` to a single path
/// component.
pub fn path_component(value: &str) -> String {
    let name: String = value
        .trim_matches('/')
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if name.is_empty() || name.chars().all(|c| c == '.') {
        return "_".to_string();
    }
    name
}
