//! Side-effecting collaborators of the pipeline: plan files, phase drivers,
//! child processes, login sessions, and result files.

pub mod driver;
pub mod local;
pub mod plan;
pub mod process;
pub mod results;
pub mod session;
