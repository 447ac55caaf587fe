//! Batching of scene nodes into meta groups that share an index store.
//!
//! A `DrawGroupAllocator` hands out `DrawHandle`s for (attribute store,
//! implicit slot, draw state) keys. Nodes land in a meta group with a free
//! node slot; slot 0 of every meta group is held by an invisible sentinel so
//! that stray indices never draw anything. Batches are registered per draw
//! pass in `RawDrawData`. Structural edits (node slots and registered
//! batches) reach the render thread as deferred render actions, so a
//! presented frame never sees edits from a frame that has not completed.

mod allocator;
mod batch;
mod comparer;
mod raw_draw;

use std::hash::Hash;

use frame_sync::BufferIndices;
use thiserror::Error;

pub use allocator::{DrawGroupAllocator, DrawHandle};
pub use batch::{DrawBatch, DrawElement, next_element_id};
pub use comparer::{DrawOrderComparer, TokenOrderComparer};
pub use raw_draw::RawDrawData;

/// Node keys stored in meta-group slots.
///
/// Equality is node identity. Each occupied slot receives
/// `VALUES_PER_SLOT` floats when a batch is drawn.
pub trait SlotNode: Clone + Eq + Hash + Send + Sync + 'static {
    const VALUES_PER_SLOT: usize;

    /// Render-side values of this node for the present buffer in `indices`.
    fn write_values(&self, indices: &BufferIndices, out: &mut [f32]);

    /// Values that make every vertex referencing the slot invisible.
    fn write_sentinel_values(out: &mut [f32]);

    /// Values for the shared "unclipped" slot of binary-addressed groups.
    fn write_unclipped_values(out: &mut [f32]);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotOccupant<N> {
    Sentinel,
    Node(N),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DrawGroupError {
    #[error("no draw-group bucket matches the handle")]
    UnknownBucket,
    #[error("meta group referenced by the handle no longer exists")]
    UnknownMetaGroup,
    #[error("node is not registered in its meta group")]
    NodeNotInMetaGroup,
}
