//! Orchestration for a single plan run.
//!
//! Drives the enabled phases in their fixed order, feeds test outcomes to the
//! ledger, and opens login sessions whenever the [`LoginEvaluator`] decides to
//! fire. Test failures never stop the pipeline. Driver errors and fatal login
//! errors abort it; a provisioned guest is still released before returning.

use std::collections::BTreeSet;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, warn};

use crate::core::evaluator::{BoundaryDecision, Firing, LoginError, LoginEvaluator};
use crate::core::ledger::OutcomeLedger;
use crate::core::readiness::GuestReadiness;
use crate::core::trigger::TriggerSpec;
use crate::core::types::{PhaseName, TestOutcomeRecord};
use crate::io::driver::{DiscoveredTest, GuestContext, PhaseDriver};
use crate::io::session::{SessionInvoker, SessionRequest};

/// Login options from the `login` subcommand.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub trigger: TriggerSpec,
    /// Forwarded to the session invoker untouched.
    pub command: Option<String>,
}

/// Input for one plan run.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub plan: String,
    /// Phases the invocation asked to run.
    pub enabled: BTreeSet<PhaseName>,
    pub login: Option<LoginOptions>,
}

impl PlanRequest {
    /// Request with every phase enabled and no login.
    pub fn new(plan: impl Into<String>) -> Self {
        Self {
            plan: plan.into(),
            enabled: PhaseName::ALL.into_iter().collect(),
            login: None,
        }
    }

    pub fn with_login(mut self, login: LoginOptions) -> Self {
        self.login = Some(login);
        self
    }

    pub fn with_enabled(mut self, enabled: impl IntoIterator<Item = PhaseName>) -> Self {
        self.enabled = enabled.into_iter().collect();
        self
    }
}

/// Terminal state of a plan that ran to the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Completed,
    /// A login session failed or a login was rejected at a guestless phase.
    Failed,
}

/// A login session that could not be opened or exited non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub phase: PhaseName,
    pub test_id: Option<String>,
    pub reason: String,
}

/// Summary of a plan run.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: String,
    pub status: PlanStatus,
    pub phases_run: Vec<PhaseName>,
    /// Firings in the order sessions were opened.
    pub firings: Vec<Firing>,
    pub ledger: OutcomeLedger,
    pub session_failures: Vec<SessionFailure>,
    /// Guestless phases where a due login was rejected.
    pub rejected: Vec<PhaseName>,
}

/// The phase whose end hosts the default login.
///
/// This is the last enabled phase up to `finish`; when none of those is
/// enabled, the last enabled phase overall.
pub fn last_enabled_phase(enabled: &BTreeSet<PhaseName>) -> Option<PhaseName> {
    enabled
        .iter()
        .copied()
        .filter(|phase| *phase <= PhaseName::Finish)
        .next_back()
        .or_else(|| enabled.iter().copied().next_back())
}

/// Run one plan through its enabled phases.
///
/// Returns an error for invalid login configuration (before any phase runs),
/// fatal login errors, and driver failures.
pub fn run_plan<D: PhaseDriver, S: SessionInvoker>(
    driver: &mut D,
    invoker: &S,
    request: &PlanRequest,
) -> Result<PlanOutcome> {
    let last_enabled =
        last_enabled_phase(&request.enabled).ok_or_else(|| anyhow!("no phases enabled"))?;
    let evaluator = match &request.login {
        Some(login) => Some(LoginEvaluator::new(login.trigger.clone(), last_enabled)?),
        None => None,
    };
    info!(
        plan = %request.plan,
        enabled = ?request.enabled,
        login_phases = ?evaluator.as_ref().map(LoginEvaluator::effective_phases),
        "starting plan"
    );

    let mut run = PlanRun::new(request);
    match run.drive(driver, invoker, evaluator.as_ref()) {
        Ok(()) => {
            let outcome = run.into_outcome();
            info!(
                plan = %outcome.plan,
                status = ?outcome.status,
                tests = outcome.ledger.len(),
                logins = outcome.firings.len(),
                "plan finished"
            );
            Ok(outcome)
        }
        Err(err) => {
            run.release_guest(driver);
            Err(err).with_context(|| format!("plan {}", request.plan))
        }
    }
}

/// Mutable state of one plan run. Never shared between plans.
struct PlanRun<'a> {
    request: &'a PlanRequest,
    readiness: GuestReadiness,
    ledger: OutcomeLedger,
    tests: Vec<DiscoveredTest>,
    guest: Option<GuestContext>,
    phases_run: Vec<PhaseName>,
    firings: Vec<Firing>,
    session_failures: Vec<SessionFailure>,
    rejected: Vec<PhaseName>,
}

impl<'a> PlanRun<'a> {
    fn new(request: &'a PlanRequest) -> Self {
        Self {
            request,
            readiness: GuestReadiness::new(),
            ledger: OutcomeLedger::new(),
            tests: Vec::new(),
            guest: None,
            phases_run: Vec::new(),
            firings: Vec::new(),
            session_failures: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn drive<D: PhaseDriver, S: SessionInvoker>(
        &mut self,
        driver: &mut D,
        invoker: &S,
        evaluator: Option<&LoginEvaluator>,
    ) -> Result<()> {
        for phase in PhaseName::ALL {
            if !self.request.enabled.contains(&phase) {
                debug!(%phase, "phase not enabled");
                continue;
            }
            self.readiness.enter_phase(phase);
            info!(plan = %self.request.plan, %phase, "phase started");
            self.run_phase(phase, driver, invoker, evaluator)
                .with_context(|| format!("{phase} phase"))?;
            self.phases_run.push(phase);

            if let Some(evaluator) = evaluator {
                self.evaluate_boundary(phase, evaluator, invoker)?;
            }
        }
        Ok(())
    }

    fn run_phase<D: PhaseDriver, S: SessionInvoker>(
        &mut self,
        phase: PhaseName,
        driver: &mut D,
        invoker: &S,
        evaluator: Option<&LoginEvaluator>,
    ) -> Result<()> {
        match phase {
            PhaseName::Discover => {
                self.tests = driver.discover()?;
                info!(count = self.tests.len(), "tests discovered");
            }
            PhaseName::Provision => {
                self.guest = Some(driver.provision()?);
                self.readiness.mark_provisioned();
            }
            PhaseName::Prepare => {
                if let Some(guest) = self.guest_for(phase) {
                    driver.prepare(&guest)?;
                }
            }
            PhaseName::Execute => {
                if let Some(guest) = self.guest_for(phase) {
                    self.execute_tests(driver, invoker, evaluator, &guest)?;
                }
            }
            PhaseName::Finish => {
                if let Some(guest) = self.guest_for(phase) {
                    driver.finish(&guest)?;
                }
            }
            PhaseName::Report => driver.report(&self.ledger)?,
            PhaseName::Cleanup => {
                let guest = self.guest.take();
                self.readiness.mark_destroyed();
                driver.cleanup(guest.as_ref())?;
            }
        }
        Ok(())
    }

    fn execute_tests<D: PhaseDriver, S: SessionInvoker>(
        &mut self,
        driver: &mut D,
        invoker: &S,
        evaluator: Option<&LoginEvaluator>,
        guest: &GuestContext,
    ) -> Result<()> {
        // The ledger covers a single execute pass.
        self.ledger.clear();
        let tests = self.tests.clone();
        for test in &tests {
            let record = driver
                .execute(guest, test)
                .with_context(|| format!("test {}", test.id))?;
            self.ledger.record(record.clone());

            let Some(evaluator) = evaluator else {
                continue;
            };
            if let Some(firing) =
                evaluator.after_test(PhaseName::Execute, &record, &self.readiness)?
            {
                self.fire(firing, Some(record), invoker)?;
            }
        }
        Ok(())
    }

    fn evaluate_boundary<S: SessionInvoker>(
        &mut self,
        phase: PhaseName,
        evaluator: &LoginEvaluator,
        invoker: &S,
    ) -> Result<()> {
        match evaluator.at_boundary(phase, &self.ledger, &self.readiness)? {
            BoundaryDecision::Skip => {}
            BoundaryDecision::Fire(firing) => self.fire(firing, None, invoker)?,
            BoundaryDecision::Reject(phase) => {
                warn!(%phase, "login rejected: {}", LoginError::NoGuestsReady { phase: Some(phase) });
                self.rejected.push(phase);
            }
        }
        Ok(())
    }

    fn fire<S: SessionInvoker>(
        &mut self,
        firing: Firing,
        test: Option<TestOutcomeRecord>,
        invoker: &S,
    ) -> Result<()> {
        let guest = self.guest.clone().ok_or(LoginError::NoGuestsReady {
            phase: Some(firing.phase),
        })?;
        let login = self.request.login.as_ref();
        let request = SessionRequest {
            plan: self.request.plan.clone(),
            phase: firing.phase,
            command: login.and_then(|l| l.command.clone()),
            guest,
            test,
        };
        info!(phase = %firing.phase, test = firing.test_id(), "login");

        let failure = match invoker.invoke(&request) {
            Ok(outcome) if outcome.success() => None,
            Ok(outcome) => Some(match outcome.exit_code {
                Some(code) => format!("login session exited with code {code}"),
                None => "login session terminated by signal".to_string(),
            }),
            Err(err) => Some(format!("{err:#}")),
        };
        if let Some(reason) = failure {
            warn!(phase = %firing.phase, test = firing.test_id(), %reason, "login session failed");
            self.session_failures.push(SessionFailure {
                phase: firing.phase,
                test_id: firing.test_id().map(str::to_string),
                reason,
            });
        }
        self.firings.push(firing);
        Ok(())
    }

    /// Guest for a phase that needs one. Logs and returns `None` when the
    /// plan has no guest (e.g. `provision` was not enabled).
    fn guest_for(&self, phase: PhaseName) -> Option<GuestContext> {
        let guest = self.guest.clone();
        if guest.is_none() {
            warn!(%phase, "no guest provisioned, skipping phase work");
        }
        guest
    }

    /// Best-effort guest teardown after an aborted run.
    fn release_guest<D: PhaseDriver>(&mut self, driver: &mut D) {
        let Some(guest) = self.guest.take() else {
            return;
        };
        self.readiness.mark_destroyed();
        if let Err(err) = driver.cleanup(Some(&guest)) {
            let err = format!("{err:#}");
            warn!(guest = %guest.name, %err, "failed to release guest");
        }
    }

    fn into_outcome(self) -> PlanOutcome {
        let status = if self.session_failures.is_empty() && self.rejected.is_empty() {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        PlanOutcome {
            plan: self.request.plan.clone(),
            status,
            phases_run: self.phases_run,
            firings: self.firings,
            ledger: self.ledger,
            session_failures: self.session_failures,
            rejected: self.rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ResultKind;
    use crate::test_support::{RecordingInvoker, ScriptedDriver, login};

    fn phases(values: &[PhaseName]) -> BTreeSet<PhaseName> {
        values.iter().copied().collect()
    }

    #[test]
    fn last_enabled_defaults_to_finish() {
        let all: BTreeSet<PhaseName> = PhaseName::ALL.into_iter().collect();
        assert_eq!(last_enabled_phase(&all), Some(PhaseName::Finish));
    }

    #[test]
    fn last_enabled_follows_narrowed_phase_list() {
        let enabled = phases(&[PhaseName::Discover, PhaseName::Provision, PhaseName::Prepare]);
        assert_eq!(last_enabled_phase(&enabled), Some(PhaseName::Prepare));
        let enabled = phases(&[PhaseName::Report, PhaseName::Cleanup]);
        assert_eq!(last_enabled_phase(&enabled), Some(PhaseName::Cleanup));
        assert_eq!(last_enabled_phase(&BTreeSet::new()), None);
    }

    #[test]
    fn phases_run_in_fixed_order() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]);
        let invoker = RecordingInvoker::new();
        let outcome = run_plan(&mut driver, &invoker, &PlanRequest::new("p")).expect("run");
        assert_eq!(outcome.phases_run, PhaseName::ALL.to_vec());
        assert_eq!(
            driver.calls(),
            vec![
                "discover",
                "provision",
                "prepare",
                "execute a",
                "finish",
                "report",
                "cleanup"
            ]
        );
        assert!(outcome.firings.is_empty());
        assert_eq!(outcome.status, PlanStatus::Completed);
    }

    #[test]
    fn failing_tests_do_not_stop_the_pipeline() {
        let mut driver = ScriptedDriver::new(vec![
            ("a", vec![ResultKind::Fail]),
            ("b", vec![ResultKind::Error]),
            ("c", vec![ResultKind::Pass]),
        ]);
        let invoker = RecordingInvoker::new();
        let outcome = run_plan(&mut driver, &invoker, &PlanRequest::new("p")).expect("run");
        assert_eq!(outcome.ledger.len(), 3);
        assert_eq!(outcome.phases_run.last(), Some(&PhaseName::Cleanup));
    }

    #[test]
    fn disabled_phases_are_skipped() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]);
        let invoker = RecordingInvoker::new();
        let request = PlanRequest::new("p").with_enabled([PhaseName::Discover, PhaseName::Report]);
        let outcome = run_plan(&mut driver, &invoker, &request).expect("run");
        assert_eq!(outcome.phases_run, vec![PhaseName::Discover, PhaseName::Report]);
        assert_eq!(driver.calls(), vec!["discover", "report"]);
        assert!(outcome.ledger.is_empty());
    }

    #[test]
    fn session_failure_marks_run_failed_but_continues() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]);
        let invoker = RecordingInvoker::with_exit_code(1);
        let request = PlanRequest::new("p").with_login(login(false, &[], &["prepare", "finish"]));
        let outcome = run_plan(&mut driver, &invoker, &request).expect("run");
        assert_eq!(outcome.firings.len(), 2);
        assert_eq!(outcome.session_failures.len(), 2);
        assert_eq!(
            outcome.session_failures[0].reason,
            "login session exited with code 1"
        );
        assert_eq!(outcome.status, PlanStatus::Failed);
        assert_eq!(outcome.phases_run.last(), Some(&PhaseName::Cleanup));
    }

    #[test]
    fn fatal_login_error_releases_guest() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]);
        let invoker = RecordingInvoker::new();
        let request = PlanRequest::new("p").with_login(login(false, &[], &["provision"]));
        let err = run_plan(&mut driver, &invoker, &request).unwrap_err();
        assert!(err.downcast_ref::<LoginError>().is_some());
        assert_eq!(invoker.count(), 0);
        assert_eq!(driver.calls(), vec!["discover", "provision", "cleanup"]);
    }

    #[test]
    fn driver_failure_aborts_and_releases_guest() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]).failing_at("finish");
        let invoker = RecordingInvoker::new();
        let err = run_plan(&mut driver, &invoker, &PlanRequest::new("p")).unwrap_err();
        assert!(format!("{err:#}").contains("finish phase"));
        assert_eq!(driver.calls().last().map(String::as_str), Some("cleanup"));
    }

    #[test]
    fn failing_cleanup_is_not_retried() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]).failing_at("cleanup");
        let invoker = RecordingInvoker::new();
        let err = run_plan(&mut driver, &invoker, &PlanRequest::new("p")).unwrap_err();
        assert!(format!("{err:#}").contains("cleanup phase"));
        let cleanups = driver.calls().iter().filter(|call| *call == "cleanup").count();
        assert_eq!(cleanups, 1);
    }

    #[test]
    fn per_test_session_carries_test_context() {
        let mut driver = ScriptedDriver::new(vec![
            ("a", vec![ResultKind::Pass]),
            ("b", vec![ResultKind::Fail, ResultKind::Warn]),
        ]);
        let invoker = RecordingInvoker::new();
        let mut options = login(true, &["warn"], &[]);
        options.command = Some("cat /etc/os-release".to_string());
        let request = PlanRequest::new("p").with_login(options);
        run_plan(&mut driver, &invoker, &request).expect("run");

        let requests = invoker.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].phase, PhaseName::Execute);
        assert_eq!(requests[0].command.as_deref(), Some("cat /etc/os-release"));
        let test = requests[0].test.as_ref().expect("test context");
        assert_eq!(test.test_id, "b");
    }

    #[test]
    fn rejected_guestless_member_marks_run_failed() {
        let mut driver = ScriptedDriver::new(vec![("a", vec![ResultKind::Pass])]);
        let invoker = RecordingInvoker::new();
        let request = PlanRequest::new("p").with_login(login(false, &[], &["finish", "cleanup"]));
        let outcome = run_plan(&mut driver, &invoker, &request).expect("run");
        assert_eq!(outcome.firings.len(), 1);
        assert_eq!(outcome.rejected, vec![PhaseName::Cleanup]);
        assert_eq!(outcome.status, PlanStatus::Failed);
    }
}
