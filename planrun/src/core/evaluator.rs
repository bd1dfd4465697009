//! Login trigger resolution.
//!
//! Decides whether, where, and how many times the interactive session opens.
//! The evaluator is a pure function of the trigger options, the last enabled
//! phase, guest readiness, and the outcome ledger. It performs no I/O.
//!
//! Resolution of the phases where firing is considered:
//!
//! | `--step` given | `-t` | effective phases            |
//! |----------------|------|-----------------------------|
//! | yes            | yes  | explicit phases + `execute` |
//! | yes            | no   | explicit phases             |
//! | no             | yes  | `execute`                   |
//! | no             | no   | last enabled phase          |
//!
//! In per-test mode `execute` is evaluated after each test and never also at
//! its boundary. Every other effective phase is evaluated once, at its end,
//! against all outcomes recorded so far.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use crate::core::ledger::OutcomeLedger;
use crate::core::readiness::GuestReadiness;
use crate::core::trigger::TriggerSpec;
use crate::core::types::{PhaseName, TestOutcomeRecord};

/// Login cannot be performed because no guest is available.
///
/// Always fatal for the plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoginError {
    #[error("No guests ready for login")]
    NoGuestsReady {
        /// Phase where a firing was due, or `None` when rejected up front.
        phase: Option<PhaseName>,
    },
}

/// Granularity of a firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FiringKind {
    /// Fired right after the named test finished.
    PerTest { test_id: String },
    /// Fired once at the end of a phase.
    Aggregate,
}

/// One decision to open the interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub phase: PhaseName,
    pub kind: FiringKind,
}

impl Firing {
    pub fn test_id(&self) -> Option<&str> {
        match &self.kind {
            FiringKind::PerTest { test_id } => Some(test_id),
            FiringKind::Aggregate => None,
        }
    }
}

/// Outcome of evaluating a phase boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// Nothing to do at this boundary.
    Skip,
    /// Open the session now.
    Fire(Firing),
    /// A firing was due at a guestless phase of a mixed phase set. The run is
    /// marked failed but continues.
    Reject(PhaseName),
}

/// Resolved login trigger for one plan run.
#[derive(Debug, Clone)]
pub struct LoginEvaluator {
    spec: TriggerSpec,
    effective: BTreeSet<PhaseName>,
}

impl LoginEvaluator {
    /// Resolve the effective phase set and reject configurations that can never
    /// reach a guest.
    pub fn new(spec: TriggerSpec, last_enabled: PhaseName) -> Result<Self, LoginError> {
        let effective = resolve_effective_phases(&spec, last_enabled);
        debug!(
            ?effective,
            %last_enabled,
            per_test = spec.per_test,
            conditions = ?spec.conditions,
            "resolved login phases"
        );
        if last_enabled.is_guestless() || effective.iter().all(|phase| phase.is_guestless()) {
            return Err(LoginError::NoGuestsReady { phase: None });
        }
        Ok(Self { spec, effective })
    }

    /// Phases where firing is considered.
    pub fn effective_phases(&self) -> &BTreeSet<PhaseName> {
        &self.effective
    }

    /// True if `phase` is evaluated once at its end rather than per test.
    pub fn is_aggregate_phase(&self, phase: PhaseName) -> bool {
        self.effective.contains(&phase) && !(self.spec.per_test && phase == PhaseName::Execute)
    }

    /// Decide whether to fire right after a test finished.
    pub fn after_test(
        &self,
        phase: PhaseName,
        record: &TestOutcomeRecord,
        readiness: &GuestReadiness,
    ) -> Result<Option<Firing>, LoginError> {
        if !self.spec.per_test || phase != PhaseName::Execute {
            return Ok(None);
        }
        if !self.spec.matches(&record.kinds) {
            debug!(test = %record.test_id, kinds = ?record.kinds, "test does not match login conditions");
            return Ok(None);
        }
        if !readiness.is_ready() {
            return Err(LoginError::NoGuestsReady { phase: Some(phase) });
        }
        Ok(Some(Firing {
            phase,
            kind: FiringKind::PerTest {
                test_id: record.test_id.clone(),
            },
        }))
    }

    /// Decide whether to fire at the end of `phase`.
    pub fn at_boundary(
        &self,
        phase: PhaseName,
        ledger: &OutcomeLedger,
        readiness: &GuestReadiness,
    ) -> Result<BoundaryDecision, LoginError> {
        if !self.is_aggregate_phase(phase) {
            return Ok(BoundaryDecision::Skip);
        }
        // Unconditional triggers fire whenever the phase is reached, even with
        // no tests recorded.
        if !self.spec.is_unconditional() && !ledger.any_matches(&self.spec) {
            debug!(%phase, "no recorded outcome matches login conditions");
            return Ok(BoundaryDecision::Skip);
        }
        if phase.is_guestless() {
            return Ok(BoundaryDecision::Reject(phase));
        }
        if !readiness.is_ready() {
            return Err(LoginError::NoGuestsReady { phase: Some(phase) });
        }
        Ok(BoundaryDecision::Fire(Firing {
            phase,
            kind: FiringKind::Aggregate,
        }))
    }
}

/// Compute the phases where firing is considered.
pub fn resolve_effective_phases(spec: &TriggerSpec, last_enabled: PhaseName) -> BTreeSet<PhaseName> {
    let mut phases = spec.explicit_phases.clone();
    if spec.per_test {
        phases.insert(PhaseName::Execute);
    }
    if phases.is_empty() {
        phases.insert(last_enabled);
    }
    phases
}
