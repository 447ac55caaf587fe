use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use draw_groups::{DrawGroupAllocator, DrawOrderComparer, TokenOrderComparer};
use frame_sync::{BufferIndices, FramePhase, SignalConnection, TripleBufferEnabler, TripleBuffered};
use layer_protocol::{
    LayerMatrix, LayerMatrixKind, LayerTransformation, Matrix4, MatrixCompositionMode,
};
use slotmap::SlotMap;

use crate::traversal::RenderFrame;
use crate::{ClipDrawer, ItemNodeHandle, LayerConfig, LayerError};

slotmap::new_key_type! {
    pub(crate) struct ChildSlot;
}

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub(crate) struct LayerState {
    pub(crate) modelview: LayerMatrix,
    pub(crate) projection: LayerMatrix,
    pub(crate) clip_drawer: Option<Arc<dyn ClipDrawer>>,
    pub(crate) child_order: i32,
}

impl LayerState {
    fn from_config(config: &LayerConfig) -> Self {
        Self {
            modelview: LayerMatrix::new(config.modelview_mode),
            projection: LayerMatrix::new(config.projection_mode),
            clip_drawer: None,
            child_order: config.child_order,
        }
    }

    fn matrix(&self, kind: LayerMatrixKind) -> &LayerMatrix {
        match kind {
            LayerMatrixKind::Modelview => &self.modelview,
            LayerMatrixKind::Projection => &self.projection,
        }
    }

    fn matrix_mut(&mut self, kind: LayerMatrixKind) -> &mut LayerMatrix {
        match kind {
            LayerMatrixKind::Modelview => &mut self.modelview,
            LayerMatrixKind::Projection => &mut self.projection,
        }
    }
}

impl std::fmt::Debug for LayerState {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("LayerState")
            .field("modelview", &self.modelview)
            .field("projection", &self.projection)
            .field("clip_drawer", &self.clip_drawer.is_some())
            .field("child_order", &self.child_order)
            .finish()
    }
}

#[derive(Default)]
struct ParentLink {
    parent: Weak<Layer>,
    slot: Option<ChildSlot>,
}

pub(crate) struct ChildLists {
    simulation: SlotMap<ChildSlot, Arc<Layer>>,
    pub(crate) render: Vec<Arc<Layer>>,
    pub(crate) needs_resort: bool,
}

/// A node of the layer hierarchy.
///
/// Parents own their children; children point back weakly. Every layer
/// shares its parent's `TripleBufferEnabler`.
pub struct Layer {
    id: u64,
    enabler: Arc<TripleBufferEnabler>,
    config: LayerConfig,
    comparer: Arc<dyn DrawOrderComparer>,
    pub(crate) state: TripleBuffered<LayerState>,
    visible: AtomicBool,
    parent: Mutex<ParentLink>,
    pub(crate) children: Mutex<ChildLists>,
    pub(crate) render_frame: Mutex<Option<RenderFrame>>,
    draw_groups: DrawGroupAllocator<ItemNodeHandle>,
    signal: SignalConnection,
    phase_deleted: AtomicBool,
}

impl Layer {
    pub fn new_root(enabler: Arc<TripleBufferEnabler>, config: &LayerConfig) -> Arc<Layer> {
        Self::with_comparer(enabler, config, Arc::new(TokenOrderComparer))
    }

    /// Root layer whose batches are ordered by `comparer`. Children inherit it.
    pub fn with_comparer(
        enabler: Arc<TripleBufferEnabler>,
        config: &LayerConfig,
        comparer: Arc<dyn DrawOrderComparer>,
    ) -> Arc<Layer> {
        Arc::new_cyclic(|weak: &Weak<Layer>| {
            let weak = weak.clone();
            let signal = enabler.connect(
                FramePhase::CompleteSimulationFrame,
                0,
                move |indices: &BufferIndices| {
                    if let Some(layer) = weak.upgrade() {
                        layer.on_end_simulation_frame(indices);
                    }
                },
            );
            let id = NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(layer = id, "layer created");
            Layer {
                id,
                draw_groups: DrawGroupAllocator::with_comparer(
                    Arc::clone(&enabler),
                    Arc::clone(&comparer),
                ),
                enabler,
                config: *config,
                comparer,
                state: TripleBuffered::new(LayerState::from_config(config)),
                visible: AtomicBool::new(config.initially_visible),
                parent: Mutex::new(ParentLink::default()),
                children: Mutex::new(ChildLists {
                    simulation: SlotMap::with_key(),
                    render: Vec::new(),
                    needs_resort: false,
                }),
                render_frame: Mutex::new(None),
                signal,
                phase_deleted: AtomicBool::new(false),
            }
        })
    }

    pub fn new_child(parent: &Arc<Layer>) -> Arc<Layer> {
        let child = Self::with_comparer(
            Arc::clone(&parent.enabler),
            &parent.config,
            Arc::clone(&parent.comparer),
        );
        let slot = parent.attach_child(Arc::clone(&child));
        *child.lock_parent() = ParentLink {
            parent: Arc::downgrade(parent),
            slot: Some(slot),
        };
        child
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn enabler(&self) -> &Arc<TripleBufferEnabler> {
        &self.enabler
    }

    pub fn parent(&self) -> Option<Arc<Layer>> {
        self.lock_parent().parent.upgrade()
    }

    /// Move this layer under `parent`, or detach it with `None`.
    ///
    /// Fails without changing the hierarchy when `parent` is this layer or
    /// one of its descendants.
    pub fn set_parent(self: &Arc<Self>, parent: Option<&Arc<Layer>>) -> Result<(), LayerError> {
        if self.is_phase_deleted() {
            return Err(LayerError::PhaseDeleted);
        }
        if let Some(parent) = parent {
            if parent.is_phase_deleted() {
                return Err(LayerError::PhaseDeleted);
            }
            if !Arc::ptr_eq(&parent.enabler, &self.enabler) {
                return Err(LayerError::EnablerMismatch);
            }
            if Arc::ptr_eq(parent, self) || self.is_ancestor_of(parent) {
                return Err(LayerError::CyclicParent);
            }
        }

        let mut link = self.lock_parent();
        let current = link.parent.upgrade();
        match (&current, parent) {
            (Some(current), Some(parent)) if Arc::ptr_eq(current, parent) => return Ok(()),
            (None, None) => return Ok(()),
            _ => {}
        }
        if let (Some(current), Some(slot)) = (current, link.slot.take()) {
            current.detach_child(slot);
        }
        *link = match parent {
            Some(parent) => ParentLink {
                parent: Arc::downgrade(parent),
                slot: Some(parent.attach_child(Arc::clone(self))),
            },
            None => ParentLink::default(),
        };
        tracing::debug!(
            layer = self.id,
            parent = ?parent.map(|parent| parent.id),
            "layer reparented"
        );
        Ok(())
    }

    /// Simulation-side children.
    pub fn children(&self) -> Vec<Arc<Layer>> {
        self.lock_children().simulation.values().cloned().collect()
    }

    /// Children the next render traversal visits.
    pub fn render_children(&self) -> Vec<Arc<Layer>> {
        self.lock_children().render.clone()
    }

    pub fn root(self: &Arc<Self>) -> Arc<Layer> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn is_ancestor_of(&self, other: &Layer) -> bool {
        let mut current = other.parent();
        while let Some(layer) = current {
            if std::ptr::eq(Arc::as_ptr(&layer), self) {
                return true;
            }
            current = layer.parent();
        }
        false
    }

    /// Detach from the parent, delete the subtree and release every draw group.
    pub fn phase_delete(self: &Arc<Self>) {
        if self.phase_deleted.swap(true, Ordering::AcqRel) {
            return;
        }
        let link = std::mem::take(&mut *self.lock_parent());
        if let (Some(parent), Some(slot)) = (link.parent.upgrade(), link.slot) {
            parent.detach_child(slot);
        }

        for child in self.children() {
            child.phase_delete();
        }
        self.draw_groups.release_all();
        self.enabler.disconnect(self.signal);
        tracing::debug!(layer = self.id, "layer phase-deleted");
    }

    pub fn is_phase_deleted(&self) -> bool {
        self.phase_deleted.load(Ordering::Acquire)
    }

    pub fn visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn simulation_matrix(&self, kind: LayerMatrixKind) -> Matrix4 {
        self.simulation_state().matrix(kind).matrix
    }

    pub fn set_simulation_matrix(&self, kind: LayerMatrixKind, matrix: Matrix4) {
        self.update_state(|state| state.matrix_mut(kind).matrix = matrix);
    }

    pub fn simulation_composition_mode(&self, kind: LayerMatrixKind) -> MatrixCompositionMode {
        self.simulation_state().matrix(kind).mode
    }

    pub fn set_simulation_composition_mode(
        &self,
        kind: LayerMatrixKind,
        mode: MatrixCompositionMode,
    ) {
        self.update_state(|state| state.matrix_mut(kind).mode = mode);
    }

    pub fn clip_drawer(&self) -> Option<Arc<dyn ClipDrawer>> {
        self.simulation_state().clip_drawer.clone()
    }

    pub fn set_clip_drawer(&self, clip_drawer: Option<Arc<dyn ClipDrawer>>) {
        self.update_state(|state| state.clip_drawer = clip_drawer);
    }

    pub fn child_order(&self) -> i32 {
        self.simulation_state().child_order
    }

    /// Siblings are drawn in ascending child order. The parent re-sorts its
    /// render list once the change is presented.
    pub fn set_child_order(&self, child_order: i32) {
        self.update_state(|state| state.child_order = child_order);
        let parent = self.lock_parent().parent.clone();
        self.enabler.schedule_rendering_action(move || {
            if let Some(parent) = parent.upgrade() {
                parent.lock_children().needs_resort = true;
            }
        });
    }

    /// Carry the completed simulation frame into the next simulation slot.
    pub fn on_end_simulation_frame(&self, indices: &BufferIndices) {
        self.state.advance(indices);
    }

    pub fn draw_groups(&self) -> &DrawGroupAllocator<ItemNodeHandle> {
        &self.draw_groups
    }

    /// Transformation of this layer from the simulation-side values of its
    /// parent chain.
    pub fn simulation_transformation(&self) -> LayerTransformation {
        let parent = self
            .parent()
            .map(|parent| parent.simulation_transformation());
        let state = self.simulation_state();
        LayerTransformation::resolve(&state.modelview, &state.projection, parent.as_ref())
    }

    /// Transformation resolved by the running render traversal; `None`
    /// outside of `draw`.
    pub fn render_transformation(&self) -> Option<LayerTransformation> {
        self.lock_render_frame()
            .as_ref()
            .map(|frame| frame.transformation)
    }

    /// Parent the running render traversal reached this layer through.
    pub fn render_parent(&self) -> Option<Arc<Layer>> {
        self.lock_render_frame()
            .as_ref()
            .and_then(|frame| frame.render_parent.upgrade())
    }

    fn simulation_state(&self) -> Arc<LayerState> {
        self.state.simulation_value(&self.enabler.buffer_indices())
    }

    fn update_state<F>(&self, update: F)
    where
        F: FnOnce(&mut LayerState),
    {
        self.state
            .update_simulation_value(&self.enabler.buffer_indices(), update);
    }

    fn attach_child(self: &Arc<Self>, child: Arc<Layer>) -> ChildSlot {
        let slot = self.lock_children().simulation.insert(Arc::clone(&child));
        let parent = Arc::downgrade(self);
        self.enabler.schedule_rendering_action(move || {
            if let Some(parent) = parent.upgrade() {
                let mut children = parent.lock_children();
                children.render.push(child);
                children.needs_resort = true;
            }
        });
        slot
    }

    fn detach_child(self: &Arc<Self>, slot: ChildSlot) {
        let Some(child) = self.lock_children().simulation.remove(slot) else {
            return;
        };
        let parent = Arc::downgrade(self);
        self.enabler.schedule_rendering_action(move || {
            if let Some(parent) = parent.upgrade() {
                parent
                    .lock_children()
                    .render
                    .retain(|existing| !Arc::ptr_eq(existing, &child));
            }
        });
    }

    fn lock_parent(&self) -> MutexGuard<'_, ParentLink> {
        self.parent.lock().expect("layer parent lock poisoned")
    }

    pub(crate) fn lock_children(&self) -> MutexGuard<'_, ChildLists> {
        self.children.lock().expect("layer child list lock poisoned")
    }

    pub(crate) fn lock_render_frame(&self) -> MutexGuard<'_, Option<RenderFrame>> {
        self.render_frame
            .lock()
            .expect("layer render frame lock poisoned")
    }
}

impl Drop for Layer {
    fn drop(&mut self) {
        self.enabler.disconnect(self.signal);
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Layer")
            .field("id", &self.id)
            .field("visible", &self.visible())
            .field("phase_deleted", &self.is_phase_deleted())
            .finish()
    }
}
