use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use draw_groups::DrawHandle;
use layer_protocol::{
    AttributeStoreId, DrawOrderOverride, DrawOrderToken, DrawPass, DrawStateSignature,
    LayerMatrixKind, ProgramId, RecordingBackend, StencilOp, TextureId, orthographic,
    translation,
};
use layer_runtime::{FramePipeline, RuntimeConfig, RuntimeError, SimulationContext};
use scene::{ItemNode, ItemNodeHandle, ItemNodeKind, ItemNodeState, Layer, RectClipDrawer};
use tracing_subscriber::EnvFilter;

const VIEWPORT: [f32; 2] = [800.0, 600.0];

#[derive(Parser)]
#[command(author, version, about = "Animate a clipped layer scene and record its draw commands")]
struct Arguments {
    /// Frames to render before shutting down.
    #[arg(long, default_value_t = 8)]
    frames: u64,
    /// JSON runtime configuration.
    #[arg(long)]
    config: Option<PathBuf>,
}

struct DemoScene {
    panel: Arc<Layer>,
    overlay: Arc<Layer>,
    spinners: Vec<ItemNodeHandle>,
    _handles: Vec<DrawHandle<ItemNodeHandle>>,
}

fn main() -> Result<(), RuntimeError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arguments = Arguments::parse();
    let config = match &arguments.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    let mut pipeline = FramePipeline::start(config, build_scene, animate_scene)?;
    let mut backend = RecordingBackend::new();
    for _ in 0..arguments.frames {
        let frame = pipeline.render_frame(&mut backend)?;
        tracing::info!(
            presentation_frame = frame.presentation.presentation_frame,
            simulation_frame = ?frame.simulation_frame,
            swapped = frame.presentation.swapped,
            layers_drawn = frame.stats.layers_drawn,
            layers_skipped = frame.stats.layers_skipped,
            batches_drawn = frame.stats.batches_drawn,
            clip_regions = frame.stats.clip_regions,
            draw_calls = backend.draw_count(),
            state_changes = backend.state_change_count(),
            stencil_increments = backend.stencil_op_count(StencilOp::Incr),
            stencil_decrements = backend.stencil_op_count(StencilOp::Decr),
            "frame rendered"
        );
        backend.clear();
    }
    pipeline.shutdown()
}

fn build_scene(root: &Arc<Layer>) -> DemoScene {
    root.set_simulation_matrix(
        LayerMatrixKind::Projection,
        orthographic(0.0, VIEWPORT[0], VIEWPORT[1], 0.0, -1.0, 1.0),
    );

    let panel = Layer::new_child(root);
    panel.set_clip_drawer(Some(Arc::new(
        RectClipDrawer::new([100.0, 100.0], [700.0, 500.0]).hierarchical(),
    )));
    let overlay = Layer::new_child(root);
    overlay.set_child_order(1);

    let quads = DrawStateSignature::new(ProgramId(1), DrawPass::Opaque, 16);
    let glyphs = DrawStateSignature::new(ProgramId(2), DrawPass::Transparent, 16)
        .with_texture(TextureId(1));

    let mut spinners = Vec::new();
    let mut handles = Vec::new();
    for index in 0..4 {
        let node = ItemNode::new(
            panel.enabler(),
            ItemNodeState {
                kind: ItemNodeKind::Translate {
                    translation: [150.0 + 120.0 * index as f32, 300.0],
                },
                z: index as f32 * 0.1,
                visible: true,
            },
        );
        let handle = panel.draw_groups().create(
            AttributeStoreId(1),
            &quads,
            node.clone(),
            0,
            &DrawOrderOverride::new(),
        );
        let base = 4 * index as u32;
        handle.write_indices(|indices| {
            indices.extend([base, base + 1, base + 2, base, base + 2, base + 3])
        });
        spinners.push(node);
        handles.push(handle);
    }

    let label = ItemNode::new(overlay.enabler(), ItemNodeState::default());
    let label_order: DrawOrderOverride = [DrawOrderToken(1)].into_iter().collect();
    let handle = overlay
        .draw_groups()
        .create(AttributeStoreId(2), &glyphs, label, 0, &label_order);
    handle.write_indices(|indices| indices.extend(0..6));
    handles.push(handle);

    tracing::info!(
        panel = panel.id(),
        overlay = overlay.id(),
        items = handles.len(),
        "demo scene built"
    );
    DemoScene {
        panel,
        overlay,
        spinners,
        _handles: handles,
    }
}

fn animate_scene(scene: &mut DemoScene, context: &SimulationContext<'_>) {
    let time = context.frame as f32 / 60.0;
    for (index, spinner) in scene.spinners.iter().enumerate() {
        let translation = spinner.simulation_state().kind.translation();
        spinner.set_kind(ItemNodeKind::RotateTranslate {
            rotation: time * (index as f32 + 1.0),
            translation,
        });
    }
    scene.panel.set_simulation_matrix(
        LayerMatrixKind::Modelview,
        translation(40.0 * time.sin(), 0.0, 0.0),
    );
    // Swap the overlay below and above the panel every second.
    if context.frame % 60 == 0 {
        let order = if (context.frame / 60) % 2 == 0 { 1 } else { -1 };
        scene.overlay.set_child_order(order);
    }
}
