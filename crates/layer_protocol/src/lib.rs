//! Value types shared by the draw-group allocator, the scene layers and the
//! render backends.

mod backend;
mod math;
mod recording;
mod state;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use backend::{BatchDraw, RegionDraw, RenderBackend};
pub use math::{
    IDENTITY_MATRIX, LayerMatrix, LayerMatrixKind, LayerTransformation, Matrix4,
    MatrixCompositionMode, multiply, orthographic, scale, transform_point, translation,
};
pub use recording::{BackendCommand, RecordingBackend};
pub use state::{DepthFunc, RasterState, StencilFunc, StencilOp, StencilState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawPass {
    /// Occluders: depth only, carves regions children cannot draw into.
    ClipOutside,
    Opaque,
    OpaqueOverdraw,
    /// Stencil-only items that add to the layer's clip region.
    ClipInside,
    Transparent,
    TransparentOverdraw,
}

impl DrawPass {
    pub const ALL: [DrawPass; 6] = [
        DrawPass::ClipOutside,
        DrawPass::Opaque,
        DrawPass::OpaqueOverdraw,
        DrawPass::ClipInside,
        DrawPass::Transparent,
        DrawPass::TransparentOverdraw,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub const fn index(self) -> usize {
        match self {
            DrawPass::ClipOutside => 0,
            DrawPass::Opaque => 1,
            DrawPass::OpaqueOverdraw => 2,
            DrawPass::ClipInside => 3,
            DrawPass::Transparent => 4,
            DrawPass::TransparentOverdraw => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeStoreId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Everything that has to match for two draws to share one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrawStateSignature {
    pub program: ProgramId,
    pub textures: SmallVec<[TextureId; 4]>,
    pub pass: DrawPass,
    /// Per-node slots the program can address. Zero means the program only
    /// distinguishes clipped from unclipped.
    pub node_slot_count: usize,
}

impl DrawStateSignature {
    pub fn new(program: ProgramId, pass: DrawPass, node_slot_count: usize) -> Self {
        Self {
            program,
            textures: SmallVec::new(),
            pass,
            node_slot_count,
        }
    }

    pub fn with_texture(mut self, texture: TextureId) -> Self {
        self.textures.push(texture);
        self
    }

    pub fn uses_binary_addressing(&self) -> bool {
        self.node_slot_count == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawOrderToken(pub i32);

/// Draw-order tokens for an alternate batch. Empty selects the primary batch.
pub type DrawOrderOverride = SmallVec<[DrawOrderToken; 2]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_index_matches_position_in_all() {
        for (position, pass) in DrawPass::ALL.iter().enumerate() {
            assert_eq!(pass.index(), position);
        }
    }

    #[test]
    fn signatures_with_different_textures_are_distinct() {
        let base = DrawStateSignature::new(ProgramId(1), DrawPass::Opaque, 16);
        let textured = base.clone().with_texture(TextureId(3));
        assert_ne!(base, textured);
        assert_eq!(textured, base.with_texture(TextureId(3)));
    }

    #[test]
    fn zero_node_slots_means_binary_addressing() {
        let binary = DrawStateSignature::new(ProgramId(0), DrawPass::Transparent, 0);
        let slotted = DrawStateSignature::new(ProgramId(0), DrawPass::Transparent, 1);
        assert!(binary.uses_binary_addressing());
        assert!(!slotted.uses_binary_addressing());
    }
}
