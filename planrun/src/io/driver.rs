//! Phase driver abstraction.
//!
//! The [`PhaseDriver`] trait decouples the pipeline orchestrator from the
//! concrete phase implementations (test discovery, guest provisioning, test
//! execution, reporting). Tests use scripted drivers that return predetermined
//! outcomes without spawning processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;

use crate::core::ledger::OutcomeLedger;
use crate::core::types::TestOutcomeRecord;

/// A test found by `discover`, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTest {
    pub id: String,
}

impl DiscoveredTest {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Connection details for a provisioned guest, passed through to sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestContext {
    pub name: String,
    pub workdir: PathBuf,
    /// Login shell on the guest, if it differs from the invoker's default.
    pub shell: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Concrete phase implementations for one plan.
///
/// Errors returned here are infrastructure failures and abort the plan. Test
/// failures are reported through [`TestOutcomeRecord`] instead.
pub trait PhaseDriver {
    fn discover(&mut self) -> Result<Vec<DiscoveredTest>>;

    fn provision(&mut self) -> Result<GuestContext>;

    fn prepare(&mut self, guest: &GuestContext) -> Result<()>;

    /// Run one test and return its finalized outcome.
    fn execute(&mut self, guest: &GuestContext, test: &DiscoveredTest)
    -> Result<TestOutcomeRecord>;

    fn finish(&mut self, guest: &GuestContext) -> Result<()>;

    fn report(&mut self, ledger: &OutcomeLedger) -> Result<()>;

    /// Release the guest, if one was provisioned.
    fn cleanup(&mut self, guest: Option<&GuestContext>) -> Result<()>;
}
