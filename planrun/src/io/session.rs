//! Interactive login sessions on a guest.

use std::process::{Command, Stdio};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::types::{PhaseName, TestOutcomeRecord};
use crate::io::driver::GuestContext;

/// Everything a session needs to open on the right guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub plan: String,
    pub phase: PhaseName,
    /// Run this instead of an interactive shell. Passed through untouched.
    pub command: Option<String>,
    pub guest: GuestContext,
    /// The test that triggered a per-test firing.
    pub test: Option<TestOutcomeRecord>,
}

impl SessionRequest {
    /// Environment exported to the session on top of the guest's own.
    pub fn session_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("PLANRUN_PLAN".to_string(), self.plan.clone()),
            ("PLANRUN_PHASE".to_string(), self.phase.to_string()),
        ];
        if let Some(test) = &self.test {
            let kinds: Vec<&str> = test.kinds.iter().map(|kind| kind.as_str()).collect();
            env.push(("PLANRUN_TEST".to_string(), test.test_id.clone()));
            env.push(("PLANRUN_TEST_RESULT".to_string(), kinds.join(",")));
        }
        env
    }
}

/// Exit status of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    /// `None` if the session was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl SessionOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Opens sessions. Blocks until the session ends.
pub trait SessionInvoker {
    fn invoke(&self, request: &SessionRequest) -> Result<SessionOutcome>;
}

/// Session backed by a local shell with inherited stdio.
///
/// The guest's own shell wins over the default given here. Sessions share the
/// caller's terminal, so concurrent plans take turns: at most one session
/// runs at a time.
pub struct ShellSession {
    shell: String,
    terminal: Mutex<()>,
}

impl ShellSession {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            terminal: Mutex::new(()),
        }
    }
}

impl SessionInvoker for ShellSession {
    #[instrument(skip_all, fields(plan = %request.plan, phase = %request.phase))]
    fn invoke(&self, request: &SessionRequest) -> Result<SessionOutcome> {
        let shell = request.guest.shell.as_deref().unwrap_or(&self.shell);
        let mut cmd = Command::new(shell);
        if let Some(command) = &request.command {
            cmd.arg("-c").arg(command);
        }
        cmd.current_dir(&request.guest.workdir)
            .envs(&request.guest.env)
            .envs(request.session_env())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        info!(
            guest = %request.guest.name,
            test = request.test.as_ref().map(|t| t.test_id.as_str()),
            interactive = request.command.is_none(),
            "opening login session"
        );
        let _terminal = self
            .terminal
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let status = cmd
            .status()
            .with_context(|| format!("spawn login shell {shell}"))?;
        debug!(exit_code = ?status.code(), "login session ended");
        Ok(SessionOutcome {
            exit_code: status.code(),
        })
    }
}
