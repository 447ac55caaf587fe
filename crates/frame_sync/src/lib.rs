//! Frame synchronisation between a simulation thread and a render thread.
//!
//! Buffered values live in three slots. The simulation thread writes the
//! current-simulation slot, the render thread reads the present slot, and the
//! last-simulation slot holds the most recently completed frame waiting to be
//! presented. `TripleBufferEnabler` owns the slot permutation, the phase
//! signals and the deferred action queues that move structural changes from
//! one thread to the other at well-defined frame boundaries.

mod buffered;
mod enabler;
mod signal;

pub use buffered::TripleBuffered;
pub use enabler::{DeferredAction, FrameSyncConfig, PresentationFrame, TripleBufferEnabler};
pub use signal::SignalConnection;

pub const BUFFER_COUNT: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferRole {
    CurrentSimulation,
    LastSimulation,
    Present,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FramePhase {
    /// Emitted on the simulation thread right after a simulation frame completes.
    CompleteSimulationFrame,
    /// Emitted on the render thread after the pending render actions ran.
    PostUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferIndices {
    current_simulation: usize,
    last_simulation: usize,
    present: usize,
}

impl BufferIndices {
    pub const INITIAL: Self = Self {
        current_simulation: 0,
        last_simulation: 1,
        present: 2,
    };

    pub fn index(&self, role: BufferRole) -> usize {
        match role {
            BufferRole::CurrentSimulation => self.current_simulation,
            BufferRole::LastSimulation => self.last_simulation,
            BufferRole::Present => self.present,
        }
    }

    pub fn current_simulation(&self) -> usize {
        self.current_simulation
    }

    pub fn last_simulation(&self) -> usize {
        self.last_simulation
    }

    pub fn present(&self) -> usize {
        self.present
    }

    pub(crate) fn complete_simulation(&mut self) {
        std::mem::swap(&mut self.current_simulation, &mut self.last_simulation);
    }

    pub(crate) fn present_last_simulation(&mut self) {
        std::mem::swap(&mut self.present, &mut self.last_simulation);
    }

    #[cfg(test)]
    fn is_permutation(&self) -> bool {
        let mut seen = [false; BUFFER_COUNT];
        for index in [self.current_simulation, self.last_simulation, self.present] {
            if index >= BUFFER_COUNT || seen[index] {
                return false;
            }
            seen[index] = true;
        }
        true
    }
}

impl Default for BufferIndices {
    fn default() -> Self {
        Self::INITIAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_swaps_keep_a_permutation() {
        let mut indices = BufferIndices::INITIAL;
        for step in 0..12 {
            if step % 3 == 0 {
                indices.present_last_simulation();
            } else {
                indices.complete_simulation();
            }
            assert!(indices.is_permutation(), "step {step}: {indices:?}");
        }
    }

    #[test]
    fn completed_frame_becomes_presentable() {
        let mut indices = BufferIndices::INITIAL;
        let written = indices.current_simulation();
        indices.complete_simulation();
        assert_eq!(indices.last_simulation(), written);
        indices.present_last_simulation();
        assert_eq!(indices.present(), written);
        assert_ne!(indices.current_simulation(), written);
    }
}
