use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, Weak};

use draw_groups::SlotNode;
use frame_sync::{BufferIndices, FramePhase, SignalConnection, TripleBufferEnabler, TripleBuffered};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemNodeKind {
    Translate {
        translation: [f32; 2],
    },
    /// Rotation in radians, applied before the translation.
    RotateTranslate {
        rotation: f32,
        translation: [f32; 2],
    },
    /// Column-major 2x2 linear part plus translation.
    Matrix {
        linear: [f32; 4],
        translation: [f32; 2],
    },
}

impl ItemNodeKind {
    pub const IDENTITY: Self = ItemNodeKind::Translate {
        translation: [0.0, 0.0],
    };

    pub fn linear(&self) -> [f32; 4] {
        match *self {
            ItemNodeKind::Translate { .. } => [1.0, 0.0, 0.0, 1.0],
            ItemNodeKind::RotateTranslate { rotation, .. } => {
                let (sin, cos) = rotation.sin_cos();
                [cos, sin, -sin, cos]
            }
            ItemNodeKind::Matrix { linear, .. } => linear,
        }
    }

    pub fn translation(&self) -> [f32; 2] {
        match *self {
            ItemNodeKind::Translate { translation }
            | ItemNodeKind::RotateTranslate { translation, .. }
            | ItemNodeKind::Matrix { translation, .. } => translation,
        }
    }

    pub fn transform_point(&self, point: [f32; 2]) -> [f32; 2] {
        let [m00, m10, m01, m11] = self.linear();
        let [tx, ty] = self.translation();
        [
            m00 * point[0] + m01 * point[1] + tx,
            m10 * point[0] + m11 * point[1] + ty,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemNodeState {
    pub kind: ItemNodeKind,
    pub z: f32,
    pub visible: bool,
}

impl Default for ItemNodeState {
    fn default() -> Self {
        Self {
            kind: ItemNodeKind::IDENTITY,
            z: 0.0,
            visible: true,
        }
    }
}

/// Transform and visibility of a group of drawn items, buffered per frame.
pub struct ItemNode {
    enabler: Arc<TripleBufferEnabler>,
    state: TripleBuffered<ItemNodeState>,
    signal: SignalConnection,
}

impl ItemNode {
    pub const VALUES_PER_SLOT: usize = 8;

    pub fn new(enabler: &Arc<TripleBufferEnabler>, initial: ItemNodeState) -> ItemNodeHandle {
        let node = Arc::new_cyclic(|weak: &Weak<ItemNode>| {
            let weak = weak.clone();
            let signal = enabler.connect(
                FramePhase::CompleteSimulationFrame,
                0,
                move |indices: &BufferIndices| {
                    if let Some(node) = weak.upgrade() {
                        node.state.advance(indices);
                    }
                },
            );
            ItemNode {
                enabler: Arc::clone(enabler),
                state: TripleBuffered::new(initial),
                signal,
            }
        });
        ItemNodeHandle(node)
    }

    pub fn simulation_state(&self) -> ItemNodeState {
        *self.state.simulation_value(&self.enabler.buffer_indices())
    }

    pub fn render_state(&self, indices: &BufferIndices) -> ItemNodeState {
        *self.state.render_value(indices)
    }

    pub fn set_kind(&self, kind: ItemNodeKind) {
        self.update(|state| state.kind = kind);
    }

    pub fn set_z(&self, z: f32) {
        self.update(|state| state.z = z);
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(|state| state.visible = visible);
    }

    fn update<F>(&self, update: F)
    where
        F: FnOnce(&mut ItemNodeState),
    {
        self.state
            .update_simulation_value(&self.enabler.buffer_indices(), update);
    }
}

impl Drop for ItemNode {
    fn drop(&mut self) {
        self.enabler.disconnect(self.signal);
    }
}

impl std::fmt::Debug for ItemNode {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ItemNode")
            .field("state", &self.state)
            .finish()
    }
}

/// Shared handle to an `ItemNode`. Equality and hashing use node identity.
#[derive(Debug, Clone)]
pub struct ItemNodeHandle(Arc<ItemNode>);

impl PartialEq for ItemNodeHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ItemNodeHandle {}

impl Hash for ItemNodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl Deref for ItemNodeHandle {
    type Target = ItemNode;

    fn deref(&self) -> &ItemNode {
        &self.0
    }
}

// Slot layout: 2x2 linear part, translation, z, visibility.
impl SlotNode for ItemNodeHandle {
    const VALUES_PER_SLOT: usize = ItemNode::VALUES_PER_SLOT;

    fn write_values(&self, indices: &BufferIndices, out: &mut [f32]) {
        let state = self.render_state(indices);
        out[0..4].copy_from_slice(&state.kind.linear());
        out[4..6].copy_from_slice(&state.kind.translation());
        out[6] = state.z;
        out[7] = if state.visible { 1.0 } else { 0.0 };
    }

    fn write_sentinel_values(out: &mut [f32]) {
        out.fill(0.0);
        out[6] = -1.0;
    }

    fn write_unclipped_values(out: &mut [f32]) {
        out.fill(0.0);
        out[0] = 1.0;
        out[3] = 1.0;
        out[7] = 1.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_translate_rotates_before_translating() {
        let kind = ItemNodeKind::RotateTranslate {
            rotation: std::f32::consts::FRAC_PI_2,
            translation: [10.0, 0.0],
        };
        let [x, y] = kind.transform_point([1.0, 0.0]);
        assert!((x - 10.0).abs() < 1e-5, "x = {x}");
        assert!((y - 1.0).abs() < 1e-5, "y = {y}");
    }

    #[test]
    fn node_values_follow_presented_frame() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let node = ItemNode::new(&enabler, ItemNodeState::default());
        node.set_kind(ItemNodeKind::Translate {
            translation: [3.0, 4.0],
        });
        node.set_visible(false);

        let mut values = [0.0; ItemNode::VALUES_PER_SLOT];
        node.write_values(&enabler.buffer_indices(), &mut values);
        assert_eq!(values, [1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);

        enabler.signal_complete_simulation_frame();
        let frame = enabler.begin_presentation_frame();
        node.write_values(&frame.indices, &mut values);
        assert_eq!(values, [1.0, 0.0, 0.0, 1.0, 3.0, 4.0, 0.0, 0.0]);
        assert!(!node.simulation_state().visible);
    }

    #[test]
    fn handles_compare_by_identity() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let first = ItemNode::new(&enabler, ItemNodeState::default());
        let second = ItemNode::new(&enabler, ItemNodeState::default());
        assert_eq!(first, first.clone());
        assert_ne!(first, second);
    }

    #[test]
    fn dropping_node_disconnects_its_signal() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let node = ItemNode::new(&enabler, ItemNodeState::default());
        assert_eq!(enabler.connection_count(FramePhase::CompleteSimulationFrame), 1);
        drop(node);
        assert_eq!(enabler.connection_count(FramePhase::CompleteSimulationFrame), 0);
    }
}
