//! Deterministic, pure logic for login trigger resolution.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod evaluator;
pub mod ledger;
pub mod readiness;
pub mod trigger;
pub mod types;
