//! Per-tick work budget
//!
//! Caps the number of generate and mesh jobs dispatched in one scheduler
//! tick so a large viewpoint jump cannot stall the coordinating thread.

use super::priority::RequestKind;

/// Remaining dispatch allowance for the current tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickBudget {
    generate_remaining: usize,
    mesh_remaining: usize,
}

impl TickBudget {
    /// Create a budget of `max_generate` generate jobs (K) and `max_mesh` mesh jobs (M)
    pub fn new(max_generate: usize, max_mesh: usize) -> Self {
        Self {
            generate_remaining: max_generate,
            mesh_remaining: max_mesh,
        }
    }

    /// Jobs of this kind still allowed this tick
    pub fn remaining(&self, kind: RequestKind) -> usize {
        match kind {
            RequestKind::Generate => self.generate_remaining,
            RequestKind::Mesh => self.mesh_remaining,
            // Evictions are never deferred
            RequestKind::Evict => usize::MAX,
        }
    }

    /// Check if no more jobs of this kind may be dispatched
    pub fn exhausted(&self, kind: RequestKind) -> bool {
        self.remaining(kind) == 0
    }

    /// Consume one unit; returns false if the budget was already spent
    pub fn try_take(&mut self, kind: RequestKind) -> bool {
        let slot = match kind {
            RequestKind::Generate => &mut self.generate_remaining,
            RequestKind::Mesh => &mut self.mesh_remaining,
            RequestKind::Evict => return true,
        };
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }
}
