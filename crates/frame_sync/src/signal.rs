use std::sync::{Arc, Mutex};

use slotmap::SlotMap;

use crate::{BufferIndices, FramePhase};

slotmap::new_key_type! {
    /// Token returned by `TripleBufferEnabler::connect`, used to disconnect.
    pub struct SignalConnection;
}

pub(crate) type PhaseCallback = Arc<dyn Fn(&BufferIndices) + Send + Sync>;

struct SignalSlot {
    phase: FramePhase,
    ordering: i32,
    sequence: u64,
    callback: PhaseCallback,
}

#[derive(Default)]
struct SignalSlots {
    slots: SlotMap<SignalConnection, SignalSlot>,
    next_sequence: u64,
}

#[derive(Default)]
pub(crate) struct SignalRegistry {
    slots: Mutex<SignalSlots>,
}

impl SignalRegistry {
    pub(crate) fn connect(
        &self,
        phase: FramePhase,
        ordering: i32,
        callback: PhaseCallback,
    ) -> SignalConnection {
        let mut slots = self.lock_slots();
        let sequence = slots.next_sequence;
        slots.next_sequence += 1;
        slots.slots.insert(SignalSlot {
            phase,
            ordering,
            sequence,
            callback,
        })
    }

    pub(crate) fn disconnect(&self, connection: SignalConnection) -> bool {
        self.lock_slots().slots.remove(connection).is_some()
    }

    pub(crate) fn connection_count(&self, phase: FramePhase) -> usize {
        self.lock_slots()
            .slots
            .values()
            .filter(|slot| slot.phase == phase)
            .count()
    }

    /// Callbacks run outside the registry lock so they may connect or disconnect.
    pub(crate) fn emit(&self, phase: FramePhase, indices: &BufferIndices) -> usize {
        let mut callbacks: Vec<(i32, u64, PhaseCallback)> = {
            let slots = self.lock_slots();
            slots
                .slots
                .values()
                .filter(|slot| slot.phase == phase)
                .map(|slot| (slot.ordering, slot.sequence, Arc::clone(&slot.callback)))
                .collect()
        };
        callbacks.sort_by_key(|(ordering, sequence, _)| (*ordering, *sequence));
        for (_, _, callback) in &callbacks {
            callback(indices);
        }
        callbacks.len()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, SignalSlots> {
        self.slots.lock().expect("signal registry lock poisoned")
    }
}
