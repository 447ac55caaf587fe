use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{BUFFER_COUNT, BufferIndices, BufferRole};

/// A value kept in three slots, one per buffer role.
///
/// Access goes through role-keyed accessors; callers pass the
/// `BufferIndices` of the phase they run in, never raw slot numbers.
pub struct TripleBuffered<T> {
    slots: [ArcSwap<T>; BUFFER_COUNT],
}

impl<T> TripleBuffered<T> {
    pub fn new(value: T) -> Self {
        let shared = Arc::new(value);
        Self {
            slots: [
                ArcSwap::new(Arc::clone(&shared)),
                ArcSwap::new(Arc::clone(&shared)),
                ArcSwap::new(shared),
            ],
        }
    }

    fn slot(&self, indices: &BufferIndices, role: BufferRole) -> &ArcSwap<T> {
        &self.slots[indices.index(role)]
    }

    pub fn simulation_value(&self, indices: &BufferIndices) -> Arc<T> {
        self.slot(indices, BufferRole::CurrentSimulation).load_full()
    }

    pub fn last_simulation_value(&self, indices: &BufferIndices) -> Arc<T> {
        self.slot(indices, BufferRole::LastSimulation).load_full()
    }

    pub fn render_value(&self, indices: &BufferIndices) -> Arc<T> {
        self.slot(indices, BufferRole::Present).load_full()
    }

    pub fn set_simulation_value(&self, indices: &BufferIndices, value: T) {
        self.slot(indices, BufferRole::CurrentSimulation)
            .store(Arc::new(value));
    }

    /// Carry the just-completed simulation value into the slot the simulation
    /// thread edits next.
    pub fn advance(&self, indices: &BufferIndices) {
        let completed = self.slot(indices, BufferRole::LastSimulation).load_full();
        self.slot(indices, BufferRole::CurrentSimulation)
            .store(completed);
    }
}

impl<T> TripleBuffered<T>
where
    T: Clone,
{
    pub fn update_simulation_value<F>(&self, indices: &BufferIndices, update: F)
    where
        F: FnOnce(&mut T),
    {
        let mut value = T::clone(&self.simulation_value(indices));
        update(&mut value);
        self.set_simulation_value(indices, value);
    }
}

impl<T> Default for TripleBuffered<T>
where
    T: Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for TripleBuffered<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_list()
            .entries(self.slots.iter().map(|slot| slot.load_full()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulation_writes_do_not_touch_present_slot() {
        let indices = BufferIndices::INITIAL;
        let value = TripleBuffered::new(1u32);
        value.set_simulation_value(&indices, 5);

        assert_eq!(*value.simulation_value(&indices), 5);
        assert_eq!(*value.render_value(&indices), 1);
        assert_eq!(*value.last_simulation_value(&indices), 1);
    }

    #[test]
    fn advance_seeds_next_simulation_slot_from_completed_frame() {
        let mut indices = BufferIndices::INITIAL;
        let value = TripleBuffered::new(String::from("initial"));
        value.set_simulation_value(&indices, String::from("frame-1"));

        indices.complete_simulation();
        value.advance(&indices);
        assert_eq!(value.simulation_value(&indices).as_str(), "frame-1");

        value.update_simulation_value(&indices, |text| text.push_str("+edit"));
        assert_eq!(value.simulation_value(&indices).as_str(), "frame-1+edit");
        assert_eq!(value.last_simulation_value(&indices).as_str(), "frame-1");

        indices.present_last_simulation();
        assert_eq!(value.render_value(&indices).as_str(), "frame-1");
    }
}
