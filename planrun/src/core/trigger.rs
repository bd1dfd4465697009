//! Parsed login trigger options.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::core::types::{PhaseName, ResultKind};

/// Invalid trigger options. Raised before the pipeline starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("invalid phase '{value}' (expected one of: {expected})")]
    UnknownPhase { value: String, expected: String },
    #[error("invalid result '{value}' (expected one of: {expected})")]
    UnknownResult { value: String, expected: String },
}

/// Immutable description of when the interactive session should be opened.
///
/// `per_test` and `explicit_phases` are independent: neither is inferred from
/// the other. See [`crate::core::evaluator::LoginEvaluator`] for how they combine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Evaluate conditions after every test in `execute` (`-t`).
    pub per_test: bool,
    /// Result kinds that allow firing (`--when`). Empty means unconditional.
    pub conditions: BTreeSet<ResultKind>,
    /// Phases named with `--step`. Empty means none given.
    pub explicit_phases: BTreeSet<PhaseName>,
}

impl TriggerSpec {
    /// Build from raw command-line values. Repeated values collapse.
    pub fn from_args<W, S>(per_test: bool, when: &[W], steps: &[S]) -> Result<Self, TriggerError>
    where
        W: AsRef<str>,
        S: AsRef<str>,
    {
        let conditions = when
            .iter()
            .map(|value| value.as_ref().trim().parse::<ResultKind>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        let explicit_phases = steps
            .iter()
            .map(|value| value.as_ref().trim().parse::<PhaseName>())
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self {
            per_test,
            conditions,
            explicit_phases,
        })
    }

    /// True when `kinds` satisfies the conditions (OR semantics).
    pub fn matches(&self, kinds: &BTreeSet<ResultKind>) -> bool {
        self.conditions.is_empty() || !self.conditions.is_disjoint(kinds)
    }

    pub fn is_unconditional(&self) -> bool {
        self.conditions.is_empty()
    }
}
