use std::sync::{Arc, Weak};

use frame_sync::BufferIndices;
use layer_protocol::{DrawPass, LayerTransformation, RasterState, RenderBackend, StencilState};

use crate::{AncestorFrame, ClipDrawer, ClipMode, Layer};

/// Render-thread scratch of a layer, set while its subtree is drawn.
#[derive(Debug, Clone)]
pub(crate) struct RenderFrame {
    pub(crate) render_parent: Weak<Layer>,
    pub(crate) transformation: LayerTransformation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub layers_drawn: usize,
    pub layers_hidden: usize,
    /// Layers whose clip drawer reported `ClipMode::SkipLayer`.
    pub layers_skipped: usize,
    pub batches_drawn: usize,
    pub clip_regions: usize,
}

struct Traversal<'a> {
    backend: &'a mut dyn RenderBackend,
    indices: BufferIndices,
    stencil_reference: u32,
    ancestors: Vec<AncestorFrame>,
    stats: DrawStats,
}

struct ClipPush {
    mode: ClipMode,
    drawer: Option<Arc<dyn ClipDrawer>>,
    have_clip_items: bool,
    outer_reference: u32,
}

const OPAQUE_PASSES: [DrawPass; 3] = [
    DrawPass::ClipOutside,
    DrawPass::Opaque,
    DrawPass::OpaqueOverdraw,
];

const TRANSPARENT_PASSES: [DrawPass; 2] = [DrawPass::Transparent, DrawPass::TransparentOverdraw];

impl Layer {
    /// Render thread: draw this layer and its render-side subtree from the
    /// present buffer.
    ///
    /// The backend is expected to start with the stencil test at reference 0.
    pub fn draw(self: &Arc<Self>, backend: &mut dyn RenderBackend) -> DrawStats {
        let mut traversal = Traversal {
            backend,
            indices: self.enabler().buffer_indices(),
            stencil_reference: 0,
            ancestors: Vec::new(),
            stats: DrawStats::default(),
        };
        self.draw_subtree(&mut traversal, None, None);
        debug_assert_eq!(traversal.stencil_reference, 0, "unbalanced clip stack");
        debug_assert!(traversal.ancestors.is_empty(), "unbalanced ancestor stack");
        tracing::trace!(
            layer = self.id(),
            layers_drawn = traversal.stats.layers_drawn,
            batches_drawn = traversal.stats.batches_drawn,
            "layer tree drawn"
        );
        traversal.stats
    }

    fn draw_subtree(
        self: &Arc<Self>,
        traversal: &mut Traversal<'_>,
        render_parent: Option<&Arc<Layer>>,
        parent_transformation: Option<&LayerTransformation>,
    ) {
        if !self.visible() {
            traversal.stats.layers_hidden += 1;
            return;
        }

        let state = self.state.render_value(&traversal.indices);
        let transformation =
            LayerTransformation::resolve(&state.modelview, &state.projection, parent_transformation);
        *self.lock_render_frame() = Some(RenderFrame {
            render_parent: render_parent.map_or_else(Weak::new, Arc::downgrade),
            transformation,
        });

        let Some(clip) = self.push_clip(traversal, state.clip_drawer.clone(), &transformation)
        else {
            traversal.stats.layers_skipped += 1;
            *self.lock_render_frame() = None;
            return;
        };

        traversal.backend.set_transformation(&transformation);
        self.draw_passes(traversal, &OPAQUE_PASSES);

        for child in self.sorted_render_children(&traversal.indices) {
            child.draw_subtree(traversal, Some(self), Some(&transformation));
        }

        // Children may have changed the transformation.
        traversal.backend.set_transformation(&transformation);
        self.draw_passes(traversal, &TRANSPARENT_PASSES);

        self.pop_clip(traversal, clip, &transformation);
        traversal.stats.layers_drawn += 1;
        *self.lock_render_frame() = None;
    }

    fn draw_passes(&self, traversal: &mut Traversal<'_>, passes: &[DrawPass]) {
        for pass in passes {
            if !self.draw_groups().has_render_elements(*pass) {
                continue;
            }
            traversal
                .backend
                .apply_raster_state(RasterState::for_pass(*pass));
            traversal.stats.batches_drawn +=
                self.draw_groups()
                    .draw_pass(*pass, traversal.backend, &traversal.indices);
        }
    }

    fn sorted_render_children(&self, indices: &BufferIndices) -> Vec<Arc<Layer>> {
        let mut children = self.lock_children();
        if children.needs_resort {
            children
                .render
                .sort_by_key(|child| child.state.render_value(indices).child_order);
            children.needs_resort = false;
        }
        children.render.clone()
    }

    /// Returns `None` when the layer is skipped; no state was touched then.
    fn push_clip(
        &self,
        traversal: &mut Traversal<'_>,
        drawer: Option<Arc<dyn ClipDrawer>>,
        transformation: &LayerTransformation,
    ) -> Option<ClipPush> {
        let mode = drawer.as_ref().map_or(ClipMode::Unclipped, |drawer| {
            drawer.clip_mode(self, transformation, &traversal.ancestors)
        });
        if mode == ClipMode::SkipLayer {
            return None;
        }

        let outer_reference = traversal.stencil_reference;
        let region_drawer = drawer.as_ref().filter(|_| mode.draws_region());
        if let Some(drawer) = region_drawer {
            traversal.backend.apply_raster_state(RasterState::clip_region(
                mode == ClipMode::ClippedHierarchy,
            ));
            traversal
                .backend
                .apply_stencil_state(StencilState::increment(traversal.stencil_reference));
            drawer.draw_region(traversal.backend, false, transformation, &traversal.ancestors);
            traversal.stencil_reference += 1;
            traversal.stats.clip_regions += 1;
        }

        let have_clip_items = self.draw_groups().has_render_elements(DrawPass::ClipInside);
        if have_clip_items {
            traversal
                .backend
                .apply_raster_state(RasterState::for_pass(DrawPass::ClipInside));
            traversal
                .backend
                .apply_stencil_state(StencilState::increment(traversal.stencil_reference));
            traversal.backend.set_transformation(transformation);
            self.draw_groups()
                .draw_pass(DrawPass::ClipInside, traversal.backend, &traversal.indices);
            traversal.stencil_reference += 1;
        }

        if traversal.stencil_reference != outer_reference {
            traversal
                .backend
                .apply_stencil_state(StencilState::test(traversal.stencil_reference));
        }
        traversal.ancestors.push(AncestorFrame {
            transformation: *transformation,
            clip_mode: mode,
            stencil_reference: traversal.stencil_reference,
        });

        Some(ClipPush {
            mode,
            drawer: region_drawer.cloned(),
            have_clip_items,
            outer_reference,
        })
    }

    /// Mirror of `push_clip`: clip items first, then the clip region.
    fn pop_clip(
        &self,
        traversal: &mut Traversal<'_>,
        clip: ClipPush,
        transformation: &LayerTransformation,
    ) {
        traversal.ancestors.pop();

        let have_clip_items = self.draw_groups().has_render_elements(DrawPass::ClipInside);
        debug_assert_eq!(
            have_clip_items, clip.have_clip_items,
            "clip items changed between push and pop"
        );
        if clip.have_clip_items {
            traversal
                .backend
                .apply_raster_state(RasterState::for_pass(DrawPass::ClipInside));
            traversal
                .backend
                .apply_stencil_state(StencilState::decrement(traversal.stencil_reference));
            self.draw_groups()
                .draw_pass(DrawPass::ClipInside, traversal.backend, &traversal.indices);
            traversal.stencil_reference -= 1;
        }

        if let Some(drawer) = &clip.drawer {
            traversal
                .backend
                .apply_raster_state(RasterState::STENCIL_ONLY);
            traversal
                .backend
                .apply_stencil_state(StencilState::decrement(traversal.stencil_reference));
            drawer.draw_region(traversal.backend, false, transformation, &traversal.ancestors);
            traversal.stencil_reference -= 1;

            if clip.mode == ClipMode::ClippedHierarchy {
                traversal
                    .backend
                    .apply_raster_state(RasterState::DEPTH_RESET);
                traversal
                    .backend
                    .apply_stencil_state(StencilState::test(traversal.stencil_reference));
                drawer.draw_region(traversal.backend, true, transformation, &traversal.ancestors);
            }
        }

        debug_assert_eq!(traversal.stencil_reference, clip.outer_reference);
        if clip.drawer.is_some() || clip.have_clip_items {
            traversal
                .backend
                .apply_stencil_state(StencilState::test(clip.outer_reference));
        }
    }
}
