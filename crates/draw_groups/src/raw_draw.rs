use std::cmp::Ordering;
use std::sync::{Arc, Mutex, Weak};

use frame_sync::{BufferIndices, TripleBufferEnabler};
use layer_protocol::{DrawPass, RenderBackend};

use crate::{DrawElement, DrawOrderComparer};

/// Edit of the render list, replayed in the order it was made.
enum RenderEdit {
    Add(Arc<dyn DrawElement>),
    Remove(u64),
    Clear,
}

/// Draw elements of one pass of one layer.
///
/// The simulation list is edited in place. Every edit is also queued as a
/// render action, so the render list only changes when the frame that made
/// the edit is presented.
pub struct RawDrawData {
    pass: DrawPass,
    enabler: Arc<TripleBufferEnabler>,
    comparer: Arc<dyn DrawOrderComparer>,
    simulation: Mutex<Vec<Arc<dyn DrawElement>>>,
    render: Mutex<Vec<Arc<dyn DrawElement>>>,
}

impl RawDrawData {
    pub fn new(
        pass: DrawPass,
        enabler: Arc<TripleBufferEnabler>,
        comparer: Arc<dyn DrawOrderComparer>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pass,
            enabler,
            comparer,
            simulation: Mutex::new(Vec::new()),
            render: Mutex::new(Vec::new()),
        })
    }

    pub fn pass(&self) -> DrawPass {
        self.pass
    }

    /// Returns `false` if the element was already registered.
    pub fn add(self: &Arc<Self>, element: Arc<dyn DrawElement>) -> bool {
        let mut simulation = self.lock_simulation();
        let element_id = element.element_id();
        if simulation
            .iter()
            .any(|existing| existing.element_id() == element_id)
        {
            return false;
        }
        simulation.push(Arc::clone(&element));
        // Scheduled under the simulation lock so edits replay in list order.
        self.schedule_render_edit(RenderEdit::Add(element));
        true
    }

    pub fn remove(self: &Arc<Self>, element_id: u64) -> bool {
        let mut simulation = self.lock_simulation();
        let Some(position) = simulation
            .iter()
            .position(|element| element.element_id() == element_id)
        else {
            return false;
        };
        simulation.remove(position);
        self.schedule_render_edit(RenderEdit::Remove(element_id));
        true
    }

    pub fn clear(self: &Arc<Self>) {
        let mut simulation = self.lock_simulation();
        if simulation.is_empty() {
            return;
        }
        simulation.clear();
        self.schedule_render_edit(RenderEdit::Clear);
    }

    pub fn simulation_len(&self) -> usize {
        self.lock_simulation().len()
    }

    pub fn render_len(&self) -> usize {
        self.lock_render().len()
    }

    pub fn render_element_ids(&self) -> Vec<u64> {
        self.lock_render()
            .iter()
            .map(|element| element.element_id())
            .collect()
    }

    /// Render thread: draw the mirrored elements in sorted order.
    pub fn draw(&self, backend: &mut dyn RenderBackend, indices: &BufferIndices) -> usize {
        let elements = self.lock_render().clone();
        let mut drawn = 0;
        for element in &elements {
            if element.draw(backend, indices) {
                drawn += 1;
            }
        }
        drawn
    }

    fn schedule_render_edit(self: &Arc<Self>, edit: RenderEdit) {
        let raw_draw: Weak<Self> = Arc::downgrade(self);
        self.enabler.schedule_rendering_action(move || {
            if let Some(raw_draw) = raw_draw.upgrade() {
                raw_draw.apply_render_edit(edit);
            }
        });
    }

    fn apply_render_edit(&self, edit: RenderEdit) {
        let mut render = self.lock_render();
        match edit {
            RenderEdit::Add(element) => {
                render.push(element);
                // Stable, so equal draw orders keep registration order.
                render.sort_by(|lhs, rhs| {
                    self.comparer
                        .compare(lhs.draw_order(), rhs.draw_order())
                        .unwrap_or(Ordering::Equal)
                });
            }
            RenderEdit::Remove(element_id) => {
                render.retain(|element| element.element_id() != element_id);
            }
            RenderEdit::Clear => render.clear(),
        }
        tracing::trace!(
            pass = ?self.pass,
            elements = render.len(),
            "render draw list edited"
        );
    }

    fn lock_simulation(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn DrawElement>>> {
        self.simulation
            .lock()
            .expect("raw draw simulation list lock poisoned")
    }

    fn lock_render(&self) -> std::sync::MutexGuard<'_, Vec<Arc<dyn DrawElement>>> {
        self.render.lock().expect("raw draw render list lock poisoned")
    }
}

impl std::fmt::Debug for RawDrawData {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RawDrawData")
            .field("pass", &self.pass)
            .field("simulation_len", &self.simulation_len())
            .field("render_len", &self.render_len())
            .finish()
    }
}
