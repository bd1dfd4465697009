//! Shared deterministic types for the plan pipeline.
//!
//! These types define stable contracts between core components. They should not
//! depend on external state or I/O and must remain deterministic across runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::trigger::TriggerError;

/// One named step of the fixed pipeline sequence.
///
/// Variant order is the execution order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseName {
    Discover,
    Provision,
    Prepare,
    Execute,
    Finish,
    Report,
    Cleanup,
}

/// Phases during which no connectable guest exists.
const GUESTLESS_PHASES: [PhaseName; 2] = [PhaseName::Discover, PhaseName::Cleanup];

impl PhaseName {
    /// The fixed pipeline sequence.
    pub const ALL: [PhaseName; 7] = [
        PhaseName::Discover,
        PhaseName::Provision,
        PhaseName::Prepare,
        PhaseName::Execute,
        PhaseName::Finish,
        PhaseName::Report,
        PhaseName::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PhaseName::Discover => "discover",
            PhaseName::Provision => "provision",
            PhaseName::Prepare => "prepare",
            PhaseName::Execute => "execute",
            PhaseName::Finish => "finish",
            PhaseName::Report => "report",
            PhaseName::Cleanup => "cleanup",
        }
    }

    pub fn is_guestless(self) -> bool {
        GUESTLESS_PHASES.contains(&self)
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseName {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PhaseName::ALL
            .into_iter()
            .find(|phase| phase.as_str() == s)
            .ok_or_else(|| TriggerError::UnknownPhase {
                value: s.to_string(),
                expected: join_names(PhaseName::ALL.iter().map(|p| p.as_str())),
            })
    }
}

/// Result kinds a finished test may carry.
///
/// Kinds are independent facts: a failing test may also emit warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Pass,
    Fail,
    Error,
    Warn,
    Info,
}

impl ResultKind {
    pub const ALL: [ResultKind; 5] = [
        ResultKind::Pass,
        ResultKind::Fail,
        ResultKind::Error,
        ResultKind::Warn,
        ResultKind::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ResultKind::Pass => "pass",
            ResultKind::Fail => "fail",
            ResultKind::Error => "error",
            ResultKind::Warn => "warn",
            ResultKind::Info => "info",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| TriggerError::UnknownResult {
                value: s.to_string(),
                expected: join_names(ResultKind::ALL.iter().map(|k| k.as_str())),
            })
    }
}

/// Outcome of one test, finalized when the execute phase finishes running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOutcomeRecord {
    pub test_id: String,
    pub kinds: BTreeSet<ResultKind>,
}

impl TestOutcomeRecord {
    pub fn new(test_id: impl Into<String>, kinds: impl IntoIterator<Item = ResultKind>) -> Self {
        Self {
            test_id: test_id.into(),
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn has(&self, kind: ResultKind) -> bool {
        self.kinds.contains(&kind)
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    names.collect::<Vec<_>>().join(", ")
}
