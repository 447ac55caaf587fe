use layer_protocol::{LayerTransformation, RegionDraw, RenderBackend, transform_point};

use crate::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipMode {
    /// Nothing of the layer can be visible; its subtree is not drawn.
    SkipLayer,
    /// The region writes depth, so the subtree depth-tests against it.
    ClippedHierarchy,
    /// The region only touches stencil; the subtree shares the parent's depth.
    ClippedSibling,
    Unclipped,
}

impl ClipMode {
    pub fn draws_region(self) -> bool {
        matches!(self, ClipMode::ClippedHierarchy | ClipMode::ClippedSibling)
    }
}

/// One enclosing layer of the layer being drawn, outermost first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AncestorFrame {
    pub transformation: LayerTransformation,
    pub clip_mode: ClipMode,
    /// Stencil value inside the ancestor's clip region.
    pub stencil_reference: u32,
}

/// Rasterizes a layer's clip region into the stencil buffer.
///
/// `draw_region` must only draw. Raster and stencil state are set up by the
/// traversal before the call and must be left as they were.
pub trait ClipDrawer: Send + Sync {
    fn clip_mode(
        &self,
        layer: &Layer,
        transformation: &LayerTransformation,
        ancestors: &[AncestorFrame],
    ) -> ClipMode;

    fn draw_region(
        &self,
        backend: &mut dyn RenderBackend,
        clear_z: bool,
        transformation: &LayerTransformation,
        ancestors: &[AncestorFrame],
    );
}

/// Clips a layer to an axis-aligned rectangle in layer coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectClipDrawer {
    pub min: [f32; 2],
    pub max: [f32; 2],
    pub z: f32,
    pub hierarchical: bool,
}

impl RectClipDrawer {
    pub fn new(min: [f32; 2], max: [f32; 2]) -> Self {
        Self {
            min,
            max,
            z: 0.0,
            hierarchical: false,
        }
    }

    pub fn hierarchical(mut self) -> Self {
        self.hierarchical = true;
        self
    }

    fn corners(&self, transformation: &LayerTransformation) -> [[f32; 3]; 4] {
        let [min_x, min_y] = self.min;
        let [max_x, max_y] = self.max;
        [
            [min_x, min_y, self.z],
            [max_x, min_y, self.z],
            [max_x, max_y, self.z],
            [min_x, max_y, self.z],
        ]
        .map(|corner| transform_point(&transformation.project_view_model, corner))
    }
}

impl ClipDrawer for RectClipDrawer {
    fn clip_mode(
        &self,
        _layer: &Layer,
        transformation: &LayerTransformation,
        _ancestors: &[AncestorFrame],
    ) -> ClipMode {
        if self.min[0] >= self.max[0] || self.min[1] >= self.max[1] {
            return ClipMode::SkipLayer;
        }
        let corners = self.corners(transformation);
        let outside = |axis: usize| {
            corners.iter().all(|corner| corner[axis] < -1.0)
                || corners.iter().all(|corner| corner[axis] > 1.0)
        };
        if outside(0) || outside(1) {
            return ClipMode::SkipLayer;
        }
        if self.hierarchical {
            ClipMode::ClippedHierarchy
        } else {
            ClipMode::ClippedSibling
        }
    }

    fn draw_region(
        &self,
        backend: &mut dyn RenderBackend,
        clear_z: bool,
        transformation: &LayerTransformation,
        _ancestors: &[AncestorFrame],
    ) {
        let corners = self.corners(transformation);
        let [a, b, c, d] = corners.map(|corner| [corner[0], corner[1]]);
        let triangles = [a, b, c, a, c, d];
        let depth = if clear_z { 1.0 } else { corners[0][2] };
        backend.draw_region(&RegionDraw {
            triangles: &triangles,
            depth,
        });
    }
}
