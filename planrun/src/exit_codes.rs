//! Stable exit codes for `planrun run`.

use crate::core::types::ResultKind;
use crate::pipeline::{PlanOutcome, PlanStatus};

/// Every test passed.
pub const OK: i32 = 0;
/// At least one test failed.
pub const FAILED: i32 = 1;
/// A test errored, or the run hit a configuration, login, session, or
/// infrastructure error.
pub const ERROR: i32 = 2;
/// No test results were produced.
pub const NO_RESULTS: i32 = 3;

/// Exit code for one finished plan. Independent of how many logins fired.
pub fn for_outcome(outcome: &PlanOutcome) -> i32 {
    if outcome.status == PlanStatus::Failed {
        return ERROR;
    }
    match outcome.ledger.overall() {
        None => NO_RESULTS,
        Some(ResultKind::Error) => ERROR,
        Some(ResultKind::Fail) => FAILED,
        Some(_) => OK,
    }
}

/// Combine per-plan codes: errors win over failures, failures over empty
/// plans; the run is `NO_RESULTS` only if no plan produced results.
pub fn combine(codes: impl IntoIterator<Item = i32>) -> i32 {
    let codes: Vec<i32> = codes.into_iter().collect();
    for code in [ERROR, FAILED] {
        if codes.contains(&code) {
            return code;
        }
    }
    if !codes.is_empty() && codes.iter().all(|code| *code == NO_RESULTS) {
        return NO_RESULTS;
    }
    OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_error_then_failure() {
        assert_eq!(combine([OK, FAILED, ERROR]), ERROR);
        assert_eq!(combine([OK, FAILED, NO_RESULTS]), FAILED);
        assert_eq!(combine([OK, NO_RESULTS]), OK);
        assert_eq!(combine([NO_RESULTS, NO_RESULTS]), NO_RESULTS);
        assert_eq!(combine(Vec::new()), OK);
    }
}
