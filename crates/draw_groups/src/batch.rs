use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use frame_sync::{BufferIndices, TripleBufferEnabler};
use layer_protocol::{
    AttributeStoreId, BatchDraw, DrawOrderOverride, DrawPass, DrawStateSignature, RenderBackend,
};
use slot_allocator::{SlotAllocator, SlotAllocatorError, SlotRelease};

use crate::{DrawGroupError, SlotNode, SlotOccupant};

static NEXT_ELEMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for anything registered in `RawDrawData`.
pub fn next_element_id() -> u64 {
    NEXT_ELEMENT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Something the render thread can draw within a single pass.
pub trait DrawElement: Send + Sync {
    fn element_id(&self) -> u64;

    fn draw_order(&self) -> &DrawOrderOverride;

    /// Returns `false` when there was nothing to draw.
    fn draw(&self, backend: &mut dyn RenderBackend, indices: &BufferIndices) -> bool;
}

pub(crate) const SENTINEL_SLOT: usize = 0;
pub(crate) const BINARY_NODE_SLOT: usize = 1;

/// Slot table of a slotted meta group.
///
/// The allocator is the simulation view. `presented` is what the render
/// thread draws and only changes through render actions, so a released
/// node's slot stays reserved until its release has been presented.
pub(crate) struct SlottedNodes<N> {
    slots: SlotAllocator<SlotOccupant<N>>,
    /// Pending releases per node, applied by render actions.
    retiring: Mutex<HashMap<N, usize>>,
    presented: Mutex<Vec<Option<N>>>,
}

impl<N> SlottedNodes<N>
where
    N: SlotNode,
{
    fn new(node_slot_count: usize) -> Self {
        let slots = SlotAllocator::new(node_slot_count);
        let sentinel_slot = slots.add(SlotOccupant::Sentinel);
        assert_eq!(
            sentinel_slot,
            Ok(SENTINEL_SLOT),
            "sentinel must occupy the first slot of a fresh meta group"
        );
        Self {
            slots,
            retiring: Mutex::new(HashMap::new()),
            presented: Mutex::new(vec![None]),
        }
    }

    /// References of `node` that have not been released.
    fn live_count(&self, retiring: &HashMap<N, usize>, node: &N) -> usize {
        let tracked = self.slots.reference_count(&SlotOccupant::Node(node.clone()));
        tracked - retiring.get(node).copied().unwrap_or(0)
    }

    /// Returns the slot and whether the node just became live.
    fn add(&self, node: N) -> Result<(usize, bool), SlotAllocatorError> {
        let retiring = self.lock_retiring();
        let was_live = self.live_count(&retiring, &node) > 0;
        let slot = self.slots.add(SlotOccupant::Node(node))?;
        Ok((slot, !was_live))
    }

    /// Returns `true` when the last live reference went away; the slot is
    /// then released by `retire` on the render thread.
    fn release(&self, node: &N) -> Result<bool, DrawGroupError> {
        let mut retiring = self.lock_retiring();
        match self.live_count(&retiring, node) {
            0 => Err(DrawGroupError::NodeNotInMetaGroup),
            1 => {
                *retiring.entry(node.clone()).or_insert(0) += 1;
                Ok(true)
            }
            _ => {
                self.slots
                    .remove(&SlotOccupant::Node(node.clone()))
                    .map_err(|_| DrawGroupError::NodeNotInMetaGroup)?;
                Ok(false)
            }
        }
    }

    fn retire(&self, node: &N) {
        let released = {
            let mut retiring = self.lock_retiring();
            if let Some(pending) = retiring.get_mut(node) {
                *pending -= 1;
                if *pending == 0 {
                    retiring.remove(node);
                }
            }
            self.slots.remove(&SlotOccupant::Node(node.clone()))
        };
        match released {
            Ok(SlotRelease::Released { slot }) => {
                let mut presented = self.lock_presented();
                if let Some(occupant) = presented.get_mut(slot) {
                    *occupant = None;
                }
                while presented.len() > 1 && presented.last().is_some_and(Option::is_none) {
                    presented.pop();
                }
            }
            Ok(SlotRelease::Retained { .. }) => {}
            Err(error) => tracing::warn!(%error, "retired node was not in its meta group"),
        }
    }

    fn present(&self, slot: usize, node: N) {
        let mut presented = self.lock_presented();
        if presented.len() <= slot {
            presented.resize(slot + 1, None);
        }
        presented[slot] = Some(node);
    }

    fn slot_of(&self, node: &N) -> Option<usize> {
        let retiring = self.lock_retiring();
        if self.live_count(&retiring, node) == 0 {
            return None;
        }
        self.slots.slot_of(&SlotOccupant::Node(node.clone()))
    }

    fn node_count(&self) -> usize {
        let retiring = self.lock_retiring();
        let retired_only = retiring
            .keys()
            .filter(|node| self.live_count(&retiring, node) == 0)
            .count();
        self.slots.number_active() - 1 - retired_only
    }

    fn lock_retiring(&self) -> std::sync::MutexGuard<'_, HashMap<N, usize>> {
        self.retiring
            .lock()
            .expect("retiring node table lock poisoned")
    }

    fn lock_presented(&self) -> std::sync::MutexGuard<'_, Vec<Option<N>>> {
        self.presented
            .lock()
            .expect("presented slot table lock poisoned")
    }
}

pub(crate) enum NodeAddressing<N> {
    Slotted(SlottedNodes<N>),
    /// Clipped or unclipped only: the sentinel is slot 0, every node slot 1.
    Binary(Mutex<HashMap<N, usize>>),
}

impl<N> NodeAddressing<N>
where
    N: SlotNode,
{
    pub(crate) fn for_signature(signature: &DrawStateSignature) -> Self {
        if signature.uses_binary_addressing() {
            return NodeAddressing::Binary(Mutex::new(HashMap::new()));
        }
        assert!(
            signature.node_slot_count >= 2,
            "a slotted draw state needs room for the sentinel and at least one node, got {}",
            signature.node_slot_count
        );
        NodeAddressing::Slotted(SlottedNodes::new(signature.node_slot_count))
    }

    /// Slots of released nodes count as taken until the release is presented.
    pub(crate) fn has_free_slots(&self) -> bool {
        match self {
            NodeAddressing::Slotted(nodes) => nodes.slots.has_free_slots(),
            NodeAddressing::Binary(_) => true,
        }
    }

    /// Whether `node` still holds a slot, live or awaiting release.
    pub(crate) fn holds(&self, node: &N) -> bool {
        match self {
            NodeAddressing::Slotted(nodes) => nodes
                .slots
                .slot_of(&SlotOccupant::Node(node.clone()))
                .is_some(),
            NodeAddressing::Binary(nodes) => lock_binary(nodes).contains_key(node),
        }
    }

    pub(crate) fn slot_of(&self, node: &N) -> Option<usize> {
        match self {
            NodeAddressing::Slotted(nodes) => nodes.slot_of(node),
            NodeAddressing::Binary(nodes) => lock_binary(nodes)
                .contains_key(node)
                .then_some(BINARY_NODE_SLOT),
        }
    }

    pub(crate) fn occupant_at(&self, slot: usize) -> Option<SlotOccupant<N>> {
        match self {
            NodeAddressing::Slotted(nodes) => nodes.slots.element_at(slot),
            NodeAddressing::Binary(_) => match slot {
                SENTINEL_SLOT => Some(SlotOccupant::Sentinel),
                _ => None,
            },
        }
    }

    pub(crate) fn node_count(&self) -> usize {
        match self {
            NodeAddressing::Slotted(nodes) => nodes.node_count(),
            NodeAddressing::Binary(nodes) => lock_binary(nodes).len(),
        }
    }

    /// Presented per-slot values up to the high-water mark. Holes and the
    /// sentinel slot get sentinel values.
    fn gather_values(&self, indices: &BufferIndices, out: &mut Vec<f32>) {
        let per_slot = N::VALUES_PER_SLOT;
        out.clear();
        if per_slot == 0 {
            return;
        }
        match self {
            NodeAddressing::Slotted(nodes) => {
                let presented = nodes.lock_presented();
                out.resize(presented.len() * per_slot, 0.0);
                for (values, occupant) in out.chunks_mut(per_slot).zip(presented.iter()) {
                    match occupant {
                        Some(node) => node.write_values(indices, values),
                        None => N::write_sentinel_values(values),
                    }
                }
            }
            NodeAddressing::Binary(_) => {
                out.resize(2 * per_slot, 0.0);
                let (sentinel, unclipped) = out.split_at_mut(per_slot);
                N::write_sentinel_values(sentinel);
                N::write_unclipped_values(unclipped);
            }
        }
    }
}

fn lock_binary<N>(
    nodes: &Mutex<HashMap<N, usize>>,
) -> std::sync::MutexGuard<'_, HashMap<N, usize>> {
    nodes.lock().expect("binary node table lock poisoned")
}

/// State shared by every batch of one meta group.
pub(crate) struct GroupShared<N> {
    pub(crate) attribute_store: AttributeStoreId,
    pub(crate) implicit_slot: u32,
    pub(crate) signature: DrawStateSignature,
    pub(crate) addressing: NodeAddressing<N>,
    index_store: Mutex<HashMap<u64, Vec<u32>>>,
}

impl<N> GroupShared<N>
where
    N: SlotNode,
{
    pub(crate) fn new(
        attribute_store: AttributeStoreId,
        implicit_slot: u32,
        signature: DrawStateSignature,
    ) -> Self {
        let addressing = NodeAddressing::for_signature(&signature);
        Self {
            attribute_store,
            implicit_slot,
            signature,
            addressing,
            index_store: Mutex::new(HashMap::new()),
        }
    }

    /// Simulation thread: add a reference of `node`. A node that becomes
    /// live is published to the presented slot table by a render action.
    pub(crate) fn add_node(
        self: &Arc<Self>,
        enabler: &TripleBufferEnabler,
        node: N,
    ) -> Result<usize, SlotAllocatorError> {
        match &self.addressing {
            NodeAddressing::Slotted(nodes) => {
                let (slot, became_live) = nodes.add(node.clone())?;
                if became_live {
                    let group = Arc::clone(self);
                    enabler.schedule_rendering_action(move || {
                        if let NodeAddressing::Slotted(nodes) = &group.addressing {
                            nodes.present(slot, node);
                        }
                    });
                }
                Ok(slot)
            }
            NodeAddressing::Binary(nodes) => {
                *lock_binary(nodes).entry(node).or_insert(0) += 1;
                Ok(BINARY_NODE_SLOT)
            }
        }
    }

    /// Simulation thread: drop a reference of `node`. Returns `true` when
    /// the last live reference went away.
    pub(crate) fn remove_node(
        self: &Arc<Self>,
        enabler: &TripleBufferEnabler,
        node: &N,
    ) -> Result<bool, DrawGroupError> {
        match &self.addressing {
            NodeAddressing::Slotted(nodes) => {
                if !nodes.release(node)? {
                    return Ok(false);
                }
                let group = Arc::clone(self);
                let node = node.clone();
                enabler.schedule_rendering_action(move || {
                    if let NodeAddressing::Slotted(nodes) = &group.addressing {
                        nodes.retire(&node);
                    }
                });
                Ok(true)
            }
            NodeAddressing::Binary(nodes) => {
                let mut nodes = lock_binary(nodes);
                let count = nodes
                    .get_mut(node)
                    .ok_or(DrawGroupError::NodeNotInMetaGroup)?;
                *count -= 1;
                if *count > 0 {
                    return Ok(false);
                }
                nodes.remove(node);
                Ok(true)
            }
        }
    }

    fn lock_index_store(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Vec<u32>>> {
        self.index_store
            .lock()
            .expect("meta group index store lock poisoned")
    }
}

/// A draw call of a meta group. The primary batch and every draw-order
/// alternate share the group's index store, each with its own section.
pub struct DrawBatch<N> {
    id: u64,
    draw_order: DrawOrderOverride,
    group: Arc<GroupShared<N>>,
}

impl<N> DrawBatch<N>
where
    N: SlotNode,
{
    pub(crate) fn new(draw_order: DrawOrderOverride, group: Arc<GroupShared<N>>) -> Self {
        Self {
            id: next_element_id(),
            draw_order,
            group,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn signature(&self) -> &DrawStateSignature {
        &self.group.signature
    }

    pub fn pass(&self) -> DrawPass {
        self.group.signature.pass
    }

    pub fn attribute_store(&self) -> AttributeStoreId {
        self.group.attribute_store
    }

    pub fn implicit_slot(&self) -> u32 {
        self.group.implicit_slot
    }

    pub fn slot_of(&self, node: &N) -> Option<usize> {
        self.group.addressing.slot_of(node)
    }

    pub fn occupant_at(&self, slot: usize) -> Option<SlotOccupant<N>> {
        self.group.addressing.occupant_at(slot)
    }

    pub fn node_count(&self) -> usize {
        self.group.addressing.node_count()
    }

    /// Edit this batch's indices while holding the index store lock.
    pub fn write_indices<F, R>(&self, write: F) -> R
    where
        F: FnOnce(&mut Vec<u32>) -> R,
    {
        let mut store = self.group.lock_index_store();
        write(store.entry(self.id).or_default())
    }

    pub fn index_count(&self) -> usize {
        self.group
            .lock_index_store()
            .get(&self.id)
            .map_or(0, Vec::len)
    }

    pub fn node_values(&self, indices: &BufferIndices) -> Vec<f32> {
        let mut values = Vec::new();
        self.group.addressing.gather_values(indices, &mut values);
        values
    }
}

impl<N> DrawElement for DrawBatch<N>
where
    N: SlotNode,
{
    fn element_id(&self) -> u64 {
        self.id
    }

    fn draw_order(&self) -> &DrawOrderOverride {
        &self.draw_order
    }

    fn draw(&self, backend: &mut dyn RenderBackend, indices: &BufferIndices) -> bool {
        let node_values = self.node_values(indices);
        let store = self.group.lock_index_store();
        let Some(batch_indices) = store.get(&self.id).filter(|section| !section.is_empty()) else {
            return false;
        };
        backend.draw_batch(&BatchDraw {
            batch_id: self.id,
            attribute_store: self.group.attribute_store,
            implicit_slot: self.group.implicit_slot,
            signature: &self.group.signature,
            indices: batch_indices,
            node_values: &node_values,
            values_per_slot: N::VALUES_PER_SLOT,
        });
        tracing::trace!(
            batch_id = self.id,
            index_count = batch_indices.len(),
            "drew batch"
        );
        true
    }
}

impl<N> std::fmt::Debug for DrawBatch<N> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DrawBatch")
            .field("id", &self.id)
            .field("draw_order", &self.draw_order)
            .field("pass", &self.group.signature.pass)
            .finish()
    }
}
