use crate::{AttributeStoreId, DrawStateSignature, LayerTransformation, RasterState, StencilState};

/// One batched draw call: the indices of a draw batch plus the per-node
/// values for every slot up to the group's high-water mark.
#[derive(Debug, Clone, Copy)]
pub struct BatchDraw<'a> {
    pub batch_id: u64,
    pub attribute_store: AttributeStoreId,
    pub implicit_slot: u32,
    pub signature: &'a DrawStateSignature,
    pub indices: &'a [u32],
    pub node_values: &'a [f32],
    pub values_per_slot: usize,
}

impl BatchDraw<'_> {
    pub fn slot_count(&self) -> usize {
        if self.values_per_slot == 0 {
            return 0;
        }
        self.node_values.len() / self.values_per_slot
    }

    pub fn slot_values(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.values_per_slot)?;
        self.node_values.get(start..start + self.values_per_slot)
    }
}

/// Geometry of a clip region, drawn by clip drawers.
#[derive(Debug, Clone, Copy)]
pub struct RegionDraw<'a> {
    pub triangles: &'a [[f32; 2]],
    /// Normalized depth the region is written at; `1.0` resets to the clear value.
    pub depth: f32,
}

pub trait RenderBackend {
    fn apply_raster_state(&mut self, state: RasterState);
    fn apply_stencil_state(&mut self, state: StencilState);
    fn set_transformation(&mut self, transformation: &LayerTransformation);
    fn draw_batch(&mut self, draw: &BatchDraw<'_>);
    fn draw_region(&mut self, region: &RegionDraw<'_>);
}
