//! Per-run record of finished tests.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::trigger::TriggerSpec;
use crate::core::types::{ResultKind, TestOutcomeRecord};

/// Append-only ledger of test outcomes for one pipeline run.
///
/// Records are kept in completion order. A fresh ledger is created per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutcomeLedger {
    records: Vec<TestOutcomeRecord>,
}

impl OutcomeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: TestOutcomeRecord) {
        self.records.push(record);
    }

    /// Replace the record with the same test id in place, or append.
    ///
    /// Used when a single test is rerun within the same run.
    pub fn replace_or_append(&mut self, record: TestOutcomeRecord) {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.test_id == record.test_id)
        {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn records(&self) -> &[TestOutcomeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// True if any finalized record satisfies the trigger conditions.
    ///
    /// An empty ledger never matches, even with unconditional triggers.
    pub fn any_matches(&self, spec: &TriggerSpec) -> bool {
        self.records.iter().any(|record| spec.matches(&record.kinds))
    }

    /// Number of records carrying each kind.
    pub fn summary(&self) -> BTreeMap<ResultKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            for kind in &record.kinds {
                *counts.entry(*kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Aggregate result for the run: `error` > `fail` > `warn` > `pass`.
    ///
    /// Returns `None` when no tests were recorded.
    pub fn overall(&self) -> Option<ResultKind> {
        if self.records.is_empty() {
            return None;
        }
        let summary = self.summary();
        let overall = [ResultKind::Error, ResultKind::Fail, ResultKind::Warn]
            .into_iter()
            .find(|kind| summary.contains_key(kind))
            .unwrap_or(ResultKind::Pass);
        Some(overall)
    }
}
