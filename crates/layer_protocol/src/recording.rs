use crate::{
    BatchDraw, DrawPass, LayerTransformation, RasterState, RegionDraw, RenderBackend, StencilOp,
    StencilState,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BackendCommand {
    RasterState(RasterState),
    StencilState(StencilState),
    Transformation(LayerTransformation),
    DrawBatch {
        batch_id: u64,
        pass: DrawPass,
        index_count: usize,
        /// Per-slot values sent with the draw, flattened.
        node_values: Vec<f32>,
        values_per_slot: usize,
    },
    DrawRegion {
        vertex_count: usize,
        depth: f32,
    },
}

/// Backend that performs no GPU work and records every call in order.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    commands: Vec<BackendCommand>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> &[BackendCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<BackendCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn stencil_op_count(&self, op: StencilOp) -> usize {
        self.commands
            .iter()
            .filter(|command| {
                matches!(command, BackendCommand::StencilState(state) if state.pass_op == op)
            })
            .count()
    }

    /// Raster and stencil state changes; these cover every depth and stencil call.
    pub fn state_change_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| {
                matches!(
                    command,
                    BackendCommand::RasterState(_) | BackendCommand::StencilState(_)
                )
            })
            .count()
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, BackendCommand::DrawBatch { .. }))
            .count()
    }

    pub fn region_draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, BackendCommand::DrawRegion { .. }))
            .count()
    }

    pub fn drawn_batches(&self) -> Vec<u64> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                BackendCommand::DrawBatch { batch_id, .. } => Some(*batch_id),
                _ => None,
            })
            .collect()
    }
}

impl RenderBackend for RecordingBackend {
    fn apply_raster_state(&mut self, state: RasterState) {
        self.commands.push(BackendCommand::RasterState(state));
    }

    fn apply_stencil_state(&mut self, state: StencilState) {
        self.commands.push(BackendCommand::StencilState(state));
    }

    fn set_transformation(&mut self, transformation: &LayerTransformation) {
        self.commands
            .push(BackendCommand::Transformation(*transformation));
    }

    fn draw_batch(&mut self, draw: &BatchDraw<'_>) {
        self.commands.push(BackendCommand::DrawBatch {
            batch_id: draw.batch_id,
            pass: draw.signature.pass,
            index_count: draw.indices.len(),
            node_values: draw.node_values.to_vec(),
            values_per_slot: draw.values_per_slot,
        });
    }

    fn draw_region(&mut self, region: &RegionDraw<'_>) {
        self.commands.push(BackendCommand::DrawRegion {
            vertex_count: region.triangles.len(),
            depth: region.depth,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttributeStoreId, DrawStateSignature, ProgramId};

    #[test]
    fn recording_backend_counts_calls_by_kind() {
        let mut backend = RecordingBackend::new();
        let signature = DrawStateSignature::new(ProgramId(2), DrawPass::Opaque, 4);
        backend.apply_raster_state(RasterState::OPAQUE);
        backend.apply_stencil_state(StencilState::increment(0));
        backend.apply_stencil_state(StencilState::test(1));
        backend.apply_stencil_state(StencilState::decrement(1));
        backend.draw_batch(&BatchDraw {
            batch_id: 9,
            attribute_store: AttributeStoreId(1),
            implicit_slot: 0,
            signature: &signature,
            indices: &[0, 1, 2],
            node_values: &[0.0; 8],
            values_per_slot: 4,
        });

        assert_eq!(backend.stencil_op_count(StencilOp::Incr), 1);
        assert_eq!(backend.stencil_op_count(StencilOp::Decr), 1);
        assert_eq!(backend.stencil_op_count(StencilOp::Keep), 1);
        assert_eq!(backend.state_change_count(), 4);
        assert_eq!(backend.draw_count(), 1);
        assert_eq!(backend.drawn_batches(), vec![9]);
        assert_eq!(
            backend.commands().last(),
            Some(&BackendCommand::DrawBatch {
                batch_id: 9,
                pass: DrawPass::Opaque,
                index_count: 3,
                node_values: vec![0.0; 8],
                values_per_slot: 4,
            })
        );

        backend.clear();
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn batch_draw_exposes_per_slot_values() {
        let signature = DrawStateSignature::new(ProgramId(0), DrawPass::Opaque, 2);
        let values = [1.0, 2.0, 3.0, 4.0];
        let draw = BatchDraw {
            batch_id: 0,
            attribute_store: AttributeStoreId(0),
            implicit_slot: 0,
            signature: &signature,
            indices: &[],
            node_values: &values,
            values_per_slot: 2,
        };
        assert_eq!(draw.slot_count(), 2);
        assert_eq!(draw.slot_values(1), Some(&values[2..4]));
        assert_eq!(draw.slot_values(2), None);
    }
}
