//! Running several independent plans in one invocation.

use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::debug;

use crate::io::driver::PhaseDriver;
use crate::io::session::SessionInvoker;
use crate::pipeline::{PlanOutcome, PlanRequest, run_plan};

/// One plan together with the driver that runs its phases.
pub struct PlanJob<D> {
    pub driver: D,
    pub request: PlanRequest,
}

/// Result of one plan, keyed by plan name.
pub struct PlanResult {
    pub plan: String,
    pub result: Result<PlanOutcome>,
}

/// Run `jobs` on a pool of up to `workers` threads and return results in
/// input order.
///
/// Each plan owns its driver, ledger, and login state; only the session invoker
/// is shared. A failing plan never affects the others.
pub fn run_plans<D, S>(jobs: Vec<PlanJob<D>>, invoker: &S, workers: usize) -> Result<Vec<PlanResult>>
where
    D: PhaseDriver + Send,
    S: SessionInvoker + Sync,
{
    let workers = workers.clamp(1, jobs.len().max(1));
    debug!(plans = jobs.len(), workers, "running plans");
    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|idx| format!("planrun-plan-{idx}"))
        .build()
        .context("build plan worker pool")?;

    Ok(pool.install(|| {
        jobs.into_par_iter()
            .map(|mut job| PlanResult {
                result: run_plan(&mut job.driver, invoker, &job.request),
                plan: job.request.plan,
            })
            .collect()
    }))
}
