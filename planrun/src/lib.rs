//! Test-plan pipeline runner with interactive login triggers.
//!
//! A plan runs through a fixed sequence of phases (discover, provision,
//! prepare, execute, finish, report, cleanup). The `login` options decide
//! whether, where, and how many times an interactive session is opened on the
//! plan's guest. The architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (trigger parsing, the outcome
//!   ledger, guest readiness, login trigger evaluation). No I/O.
//! - **[`io`]**: Side-effecting collaborators (plan files, phase drivers,
//!   child processes, login sessions). Isolated behind traits for tests.
//!
//! Orchestration modules ([`pipeline`], [`plans`]) coordinate core logic with
//! I/O to implement the `run` command.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod plans;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
