//! Scene layers shared between a simulation thread and a render thread.
//!
//! The simulation thread edits matrices, clip drawers, child order and the
//! hierarchy. Buffered values are read by the render thread from the present
//! slot; structural edits reach the render-side child lists through render
//! actions queued on the layer's `TripleBufferEnabler`.

mod clip;
mod config;
mod layer;
mod node;
mod traversal;

use thiserror::Error;

pub use clip::{AncestorFrame, ClipDrawer, ClipMode, RectClipDrawer};
pub use config::LayerConfig;
pub use layer::Layer;
pub use node::{ItemNode, ItemNodeHandle, ItemNodeKind, ItemNodeState};
pub use traversal::DrawStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayerError {
    #[error("new parent is the layer itself or one of its descendants")]
    CyclicParent,
    #[error("parent and child are driven by different triple buffer enablers")]
    EnablerMismatch,
    #[error("layer was phase-deleted")]
    PhaseDeleted,
}
