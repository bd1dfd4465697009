//! Guest availability per pipeline phase.

use crate::core::types::PhaseName;

/// Tracks whether a connectable guest exists in the current phase.
///
/// Readiness is fixed when a phase is entered: a guest counts as ready in phase
/// `P` only if provisioning completed before `P` started and the guest has not
/// been destroyed. `provision` itself therefore never has a ready guest, and
/// guestless phases never do.
#[derive(Debug, Clone, Default)]
pub struct GuestReadiness {
    provisioned: bool,
    destroyed: bool,
    ready: bool,
}

impl GuestReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_phase(&mut self, phase: PhaseName) {
        self.ready = !phase.is_guestless() && self.provisioned && !self.destroyed;
    }

    /// Record that provisioning finished. Takes effect from the next phase.
    pub fn mark_provisioned(&mut self) {
        self.provisioned = true;
        self.destroyed = false;
    }

    /// Record that guests were torn down. Takes effect immediately.
    pub fn mark_destroyed(&mut self) {
        self.destroyed = true;
        self.ready = false;
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }
}
