use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use frame_sync::{BufferIndices, TripleBufferEnabler};
use layer_protocol::{
    AttributeStoreId, DrawOrderOverride, DrawPass, DrawStateSignature, RenderBackend,
};
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::batch::GroupShared;
use crate::{
    DrawBatch, DrawElement, DrawGroupError, DrawOrderComparer, RawDrawData, SlotNode,
    TokenOrderComparer,
};

slotmap::new_key_type! {
    struct MetaGroupKey;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    attribute_store: AttributeStoreId,
    implicit_slot: u32,
    signature: DrawStateSignature,
}

struct MetaGroup<N> {
    shared: Arc<GroupShared<N>>,
    primary: Arc<DrawBatch<N>>,
    alternates: HashMap<DrawOrderOverride, Arc<DrawBatch<N>>>,
    use_count: usize,
}

impl<N> MetaGroup<N>
where
    N: SlotNode,
{
    fn new(bucket_key: &BucketKey) -> Self {
        let shared = Arc::new(GroupShared::new(
            bucket_key.attribute_store,
            bucket_key.implicit_slot,
            bucket_key.signature.clone(),
        ));
        let primary = Arc::new(DrawBatch::new(DrawOrderOverride::new(), Arc::clone(&shared)));
        Self {
            shared,
            primary,
            alternates: HashMap::new(),
            use_count: 0,
        }
    }

    /// Returns the batch and whether it was created by this call.
    fn batch_for(&mut self, draw_order: &DrawOrderOverride) -> (Arc<DrawBatch<N>>, bool) {
        if draw_order.is_empty() {
            return (Arc::clone(&self.primary), false);
        }
        if let Some(batch) = self.alternates.get(draw_order) {
            return (Arc::clone(batch), false);
        }
        let batch = Arc::new(DrawBatch::new(draw_order.clone(), Arc::clone(&self.shared)));
        self.alternates
            .insert(draw_order.clone(), Arc::clone(&batch));
        (batch, true)
    }
}

struct Bucket<N> {
    groups: SlotMap<MetaGroupKey, MetaGroup<N>>,
    /// Meta group of every node with a live reference.
    node_groups: HashMap<N, MetaGroupKey>,
}

impl<N> Default for Bucket<N> {
    fn default() -> Self {
        Self {
            groups: SlotMap::with_key(),
            node_groups: HashMap::new(),
        }
    }
}

impl<N> Bucket<N>
where
    N: SlotNode,
{
    /// The node's current group, else the group still holding its released
    /// slot, else the first one with a free slot, else a new one. The flag
    /// reports whether a group was created.
    ///
    /// Free slots are rescanned because presenting a release frees them on
    /// the render thread.
    fn group_for_node(&mut self, node: &N, bucket_key: &BucketKey) -> (MetaGroupKey, bool) {
        if let Some(group_key) = self.node_groups.get(node) {
            return (*group_key, false);
        }
        let existing = self
            .groups
            .iter()
            .find(|(_, group)| group.shared.addressing.holds(node))
            .or_else(|| {
                self.groups
                    .iter()
                    .find(|(_, group)| group.shared.addressing.has_free_slots())
            })
            .map(|(group_key, _)| group_key);
        if let Some(group_key) = existing {
            return (group_key, false);
        }
        let group_key = self.groups.insert(MetaGroup::new(bucket_key));
        tracing::debug!(
            program = bucket_key.signature.program.0,
            pass = ?bucket_key.signature.pass,
            node_slot_count = bucket_key.signature.node_slot_count,
            meta_groups = self.groups.len(),
            "meta group created"
        );
        (group_key, true)
    }
}

struct AllocatorState<N> {
    buckets: HashMap<BucketKey, Bucket<N>>,
    /// Bumped by `release_all`; handles from an older generation are stale.
    generation: u64,
}

/// A node's membership in a meta group, returned by `create`.
pub struct DrawHandle<N> {
    batch: Arc<DrawBatch<N>>,
    slot: usize,
    node: N,
    bucket: BucketKey,
    group: MetaGroupKey,
    generation: u64,
}

impl<N> DrawHandle<N>
where
    N: SlotNode,
{
    pub fn batch(&self) -> &Arc<DrawBatch<N>> {
        &self.batch
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn pass(&self) -> DrawPass {
        self.batch.pass()
    }

    pub fn write_indices<F, R>(&self, write: F) -> R
    where
        F: FnOnce(&mut Vec<u32>) -> R,
    {
        self.batch.write_indices(write)
    }
}

impl<N> std::fmt::Debug for DrawHandle<N> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DrawHandle")
            .field("batch", &self.batch)
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

pub struct DrawGroupAllocator<N> {
    enabler: Arc<TripleBufferEnabler>,
    raw_draw: [Arc<RawDrawData>; DrawPass::COUNT],
    state: Mutex<AllocatorState<N>>,
}

impl<N> DrawGroupAllocator<N>
where
    N: SlotNode,
{
    pub fn new(enabler: Arc<TripleBufferEnabler>) -> Self {
        Self::with_comparer(enabler, Arc::new(TokenOrderComparer))
    }

    pub fn with_comparer(
        enabler: Arc<TripleBufferEnabler>,
        comparer: Arc<dyn DrawOrderComparer>,
    ) -> Self {
        let raw_draw = DrawPass::ALL.map(|pass| {
            RawDrawData::new(pass, Arc::clone(&enabler), Arc::clone(&comparer))
        });
        Self {
            enabler,
            raw_draw,
            state: Mutex::new(AllocatorState {
                buckets: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn enabler(&self) -> &Arc<TripleBufferEnabler> {
        &self.enabler
    }

    /// Place `node` in a meta group for the given key and return its handle.
    ///
    /// New batches are registered in the raw draw data of the signature's pass.
    pub fn create(
        &self,
        attribute_store: AttributeStoreId,
        signature: &DrawStateSignature,
        node: N,
        implicit_slot: u32,
        draw_order: &DrawOrderOverride,
    ) -> DrawHandle<N> {
        let bucket_key = BucketKey {
            attribute_store,
            implicit_slot,
            signature: signature.clone(),
        };
        let mut new_batches: SmallVec<[Arc<DrawBatch<N>>; 2]> = SmallVec::new();
        let handle = {
            let mut state = self.lock_state();
            let generation = state.generation;
            let bucket = state.buckets.entry(bucket_key.clone()).or_default();
            let (group_key, group_created) = bucket.group_for_node(&node, &bucket_key);
            let group = bucket
                .groups
                .get_mut(group_key)
                .expect("selected meta group is stored in its bucket");
            if group_created {
                new_batches.push(Arc::clone(&group.primary));
            }

            let slot = match group.shared.add_node(&self.enabler, node.clone()) {
                Ok(slot) => slot,
                Err(error) => panic!("meta group selected for a node rejected it: {error}"),
            };
            group.use_count += 1;
            let (batch, batch_created) = group.batch_for(draw_order);
            if batch_created {
                new_batches.push(Arc::clone(&batch));
            }
            bucket.node_groups.insert(node.clone(), group_key);

            DrawHandle {
                batch,
                slot,
                node,
                bucket: bucket_key,
                group: group_key,
                generation,
            }
        };

        for batch in new_batches {
            let pass = batch.pass();
            self.add_raw_draw_command(pass, batch);
        }
        handle
    }

    /// Undo one `create`. The meta group is destroyed, and its batches
    /// unregistered, when its last handle is released. A node's slot is
    /// reused only after its release has been presented.
    pub fn release(&self, handle: DrawHandle<N>) -> Result<(), DrawGroupError> {
        let destroyed = {
            let mut state = self.lock_state();
            if handle.generation != state.generation {
                return Err(DrawGroupError::UnknownMetaGroup);
            }
            let bucket = state
                .buckets
                .get_mut(&handle.bucket)
                .ok_or(DrawGroupError::UnknownBucket)?;
            let group = bucket
                .groups
                .get_mut(handle.group)
                .ok_or(DrawGroupError::UnknownMetaGroup)?;
            if group.shared.remove_node(&self.enabler, &handle.node)? {
                bucket.node_groups.remove(&handle.node);
            }
            group.use_count -= 1;
            if group.use_count > 0 {
                None
            } else {
                bucket
                    .node_groups
                    .retain(|_, group_key| *group_key != handle.group);
                let group = bucket.groups.remove(handle.group);
                if bucket.groups.is_empty() {
                    state.buckets.remove(&handle.bucket);
                }
                group
            }
        };

        if let Some(group) = destroyed {
            let pass = group.shared.signature.pass;
            let batch_count = 1 + group.alternates.len();
            self.remove_raw_draw_command(pass, group.primary.id());
            for batch in group.alternates.values() {
                self.remove_raw_draw_command(pass, batch.id());
            }
            tracing::debug!(pass = ?pass, batch_count, "meta group destroyed");
        }
        Ok(())
    }

    /// Tear down every meta group. Outstanding handles become stale.
    pub fn release_all(&self) {
        let destroyed = {
            let mut state = self.lock_state();
            state.generation += 1;
            state
                .buckets
                .drain()
                .map(|(_, bucket)| bucket.groups.len())
                .sum::<usize>()
        };
        for raw_draw in &self.raw_draw {
            raw_draw.clear();
        }
        tracing::debug!(destroyed, "released all meta groups");
    }

    pub fn add_raw_draw_command(&self, pass: DrawPass, element: Arc<dyn DrawElement>) -> bool {
        self.raw_draw[pass.index()].add(element)
    }

    pub fn remove_raw_draw_command(&self, pass: DrawPass, element_id: u64) -> bool {
        self.raw_draw[pass.index()].remove(element_id)
    }

    pub fn raw_draw_data(&self, pass: DrawPass) -> &Arc<RawDrawData> {
        &self.raw_draw[pass.index()]
    }

    /// Whether the render-side list of `pass` has anything registered.
    pub fn has_render_elements(&self, pass: DrawPass) -> bool {
        self.raw_draw[pass.index()].render_len() > 0
    }

    /// Render thread: draw the mirrored elements of `pass`.
    pub fn draw_pass(
        &self,
        pass: DrawPass,
        backend: &mut dyn RenderBackend,
        indices: &BufferIndices,
    ) -> usize {
        self.raw_draw[pass.index()].draw(backend, indices)
    }

    pub fn meta_group_count(&self) -> usize {
        self.lock_state()
            .buckets
            .values()
            .map(|bucket| bucket.groups.len())
            .sum()
    }

    pub fn bucket_count(&self) -> usize {
        self.lock_state().buckets.len()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, AllocatorState<N>> {
        self.state
            .lock()
            .expect("draw group allocator state lock poisoned")
    }
}

impl<N> std::fmt::Debug for DrawGroupAllocator<N>
where
    N: SlotNode,
{
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DrawGroupAllocator")
            .field("buckets", &self.bucket_count())
            .field("meta_groups", &self.meta_group_count())
            .finish()
    }
}
