use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, TryRecvError};
use frame_sync::{PresentationFrame, TripleBufferEnabler};
use layer_protocol::RenderBackend;
use scene::{DrawStats, Layer};

use crate::{RuntimeConfig, RuntimeError};

const NOTICE_RETRY_INTERVAL: Duration = Duration::from_millis(1);
const NOTICE_POLL_INTERVAL: Duration = Duration::from_micros(200);

/// Pushed by the simulation thread once a frame has been completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameNotice {
    pub simulation_frame: u64,
}

/// Handed to the update closure on the simulation thread.
pub struct SimulationContext<'a> {
    pub root: &'a Arc<Layer>,
    pub enabler: &'a TripleBufferEnabler,
    /// Simulation frames completed before this update; the first sees 0.
    pub frame: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderedFrame {
    /// Latest completed simulation frame noticed before presenting, if any
    /// arrived within the wait timeout.
    pub simulation_frame: Option<u64>,
    pub presentation: PresentationFrame,
    pub stats: DrawStats,
}

/// Runs a simulation thread that mutates a layer tree while the owning
/// thread presents and draws it.
pub struct FramePipeline {
    enabler: Arc<TripleBufferEnabler>,
    root: Arc<Layer>,
    config: RuntimeConfig,
    notices: rtrb::Consumer<FrameNotice>,
    shutdown_sender: Sender<()>,
    simulation_thread: Option<JoinHandle<()>>,
    latest_simulation_frame: Option<u64>,
}

impl FramePipeline {
    /// Spawn the simulation thread. `setup` runs there once before the first
    /// frame and builds the state that `update` receives every frame.
    pub fn start<S, Setup, Update>(
        config: RuntimeConfig,
        setup: Setup,
        mut update: Update,
    ) -> Result<Self, RuntimeError>
    where
        Setup: FnOnce(&Arc<Layer>) -> S + Send + 'static,
        Update: FnMut(&mut S, &SimulationContext<'_>) + Send + 'static,
    {
        config.validate()?;
        let enabler = Arc::new(TripleBufferEnabler::new(config.frame_sync));
        let root = Layer::new_root(Arc::clone(&enabler), &config.layer);
        let (mut notice_producer, notices) = rtrb::RingBuffer::new(config.notice_capacity);
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded::<()>(1);

        let thread_enabler = Arc::clone(&enabler);
        let thread_root = Arc::clone(&root);
        let simulation_thread = std::thread::Builder::new()
            .name("layer-simulation".to_string())
            .spawn(move || {
                let mut state = setup(&thread_root);
                let mut frame = 0u64;
                loop {
                    match shutdown_receiver.try_recv() {
                        Ok(()) | Err(TryRecvError::Disconnected) => break,
                        Err(TryRecvError::Empty) => {}
                    }

                    let context = SimulationContext {
                        root: &thread_root,
                        enabler: &thread_enabler,
                        frame,
                    };
                    update(&mut state, &context);
                    let completed = thread_enabler.signal_complete_simulation_frame();
                    frame = completed;

                    let mut notice = FrameNotice {
                        simulation_frame: completed,
                    };
                    loop {
                        match notice_producer.push(notice) {
                            Ok(()) => break,
                            Err(rtrb::PushError::Full(rejected)) => {
                                notice = rejected;
                                match shutdown_receiver.recv_timeout(NOTICE_RETRY_INTERVAL) {
                                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                                        tracing::debug!(frame = completed, "simulation stopped");
                                        return;
                                    }
                                    Err(RecvTimeoutError::Timeout) => {}
                                }
                            }
                        }
                    }
                }
                tracing::debug!(frame, "simulation stopped");
            })
            .map_err(RuntimeError::SpawnSimulation)?;

        tracing::info!(
            notice_capacity = config.notice_capacity,
            "frame pipeline started"
        );
        Ok(Self {
            enabler,
            root,
            config,
            notices,
            shutdown_sender,
            simulation_thread: Some(simulation_thread),
            latest_simulation_frame: None,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn enabler(&self) -> &Arc<TripleBufferEnabler> {
        &self.enabler
    }

    pub fn root(&self) -> &Arc<Layer> {
        &self.root
    }

    /// Drain pending notices, waiting up to the configured timeout for at
    /// least one. Returns the newest simulation frame seen.
    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<Option<u64>, RuntimeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut received = None;
            while let Ok(notice) = self.notices.pop() {
                received = Some(notice.simulation_frame);
            }
            if received.is_some() {
                self.latest_simulation_frame = received;
                return Ok(received);
            }
            if self.simulation_finished() {
                return Err(RuntimeError::SimulationStopped);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(NOTICE_POLL_INTERVAL);
        }
    }

    /// Present the newest completed simulation frame and draw the tree.
    ///
    /// When no frame completes within the timeout the previous presentation
    /// is drawn again.
    pub fn render_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
    ) -> Result<RenderedFrame, RuntimeError> {
        let simulation_frame = self.wait_for_frame(self.config.frame_wait_timeout())?;
        if simulation_frame.is_none() {
            tracing::warn!(
                timeout_ms = self.config.frame_wait_timeout_ms,
                last_frame = ?self.latest_simulation_frame,
                "no simulation frame completed in time, redrawing"
            );
        }
        let presentation = self.enabler.begin_presentation_frame();
        let stats = self.root.draw(backend);
        tracing::trace!(
            presentation_frame = presentation.presentation_frame,
            swapped = presentation.swapped,
            executed_actions = presentation.executed_actions,
            "frame rendered"
        );
        Ok(RenderedFrame {
            simulation_frame,
            presentation,
            stats,
        })
    }

    /// Stop and join the simulation thread.
    pub fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.stop()
    }

    fn simulation_finished(&self) -> bool {
        self.simulation_thread
            .as_ref()
            .is_none_or(|thread| thread.is_finished())
    }

    fn stop(&mut self) -> Result<(), RuntimeError> {
        let Some(thread) = self.simulation_thread.take() else {
            return Ok(());
        };
        let _ = self.shutdown_sender.try_send(());
        thread.join().map_err(|_| RuntimeError::SimulationPanicked)?;
        tracing::info!(
            last_frame = ?self.latest_simulation_frame,
            "frame pipeline stopped"
        );
        Ok(())
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            tracing::error!(%error, "frame pipeline shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use layer_protocol::{
        AttributeStoreId, DrawOrderOverride, DrawPass, DrawStateSignature, LayerMatrixKind,
        ProgramId, RecordingBackend, translation,
    };
    use scene::{ItemNode, ItemNodeState};

    use super::*;

    fn quick_config() -> RuntimeConfig {
        RuntimeConfig {
            frame_wait_timeout_ms: 2_000,
            ..RuntimeConfig::default()
        }
    }

    #[test]
    fn zero_notice_capacity_is_rejected_before_spawning() {
        let config = RuntimeConfig {
            notice_capacity: 0,
            ..RuntimeConfig::default()
        };
        let result = FramePipeline::start(config, |_root: &Arc<Layer>| (), |_, _| {});
        assert!(matches!(result, Err(RuntimeError::ZeroNoticeCapacity)));
    }

    #[test]
    fn rendered_frames_follow_simulation_in_order() {
        let mut pipeline = FramePipeline::start(
            quick_config(),
            |_root: &Arc<Layer>| (),
            |_, context: &SimulationContext<'_>| {
                context.root.set_simulation_matrix(
                    LayerMatrixKind::Modelview,
                    translation(context.frame as f32, 0.0, 0.0),
                );
            },
        )
        .expect("start pipeline");
        let mut backend = RecordingBackend::new();

        let mut previous_translation = -1.0f32;
        let mut previous_frame = None;
        for _ in 0..6 {
            let frame = pipeline.render_frame(&mut backend).expect("render frame");
            let simulation_frame = frame.simulation_frame.expect("frame completed in time");
            assert!(previous_frame < Some(simulation_frame));
            previous_frame = Some(simulation_frame);

            let root_translation = backend
                .commands()
                .iter()
                .rev()
                .find_map(|command| match command {
                    layer_protocol::BackendCommand::Transformation(transformation) => {
                        Some(transformation.modelview[12])
                    }
                    _ => None,
                })
                .expect("root transformation recorded");
            assert!(root_translation >= previous_translation);
            previous_translation = root_translation;
            backend.clear();
        }
        // Six distinct notices mean at least six completed frames were
        // available to the last presentation.
        assert!(previous_translation >= 5.0);
        pipeline.shutdown().expect("clean shutdown");
    }

    #[test]
    fn setup_state_persists_across_updates() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pipeline = FramePipeline::start(
            quick_config(),
            |root: &Arc<Layer>| {
                let node = ItemNode::new(root.enabler(), ItemNodeState::default());
                let handle = root.draw_groups().create(
                    AttributeStoreId(1),
                    &DrawStateSignature::new(ProgramId(1), DrawPass::Opaque, 4),
                    node,
                    0,
                    &DrawOrderOverride::new(),
                );
                handle.write_indices(|indices| indices.extend([0, 1, 2]));
                (handle, 0usize)
            },
            move |(_, updates), context: &SimulationContext<'_>| {
                *updates += 1;
                sink.lock().expect("sink lock poisoned").push((context.frame, *updates));
            },
        )
        .expect("start pipeline");
        let mut backend = RecordingBackend::new();

        let mut batches = 0;
        for _ in 0..3 {
            batches = pipeline
                .render_frame(&mut backend)
                .expect("render frame")
                .stats
                .batches_drawn;
        }
        assert_eq!(batches, 1);
        pipeline.shutdown().expect("clean shutdown");

        let seen = seen.lock().expect("seen lock poisoned");
        for (index, (frame, updates)) in seen.iter().enumerate() {
            assert_eq!(*frame, index as u64);
            assert_eq!(*updates, index + 1);
        }
    }

    #[test]
    fn dropping_pipeline_stops_a_blocked_simulation() {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        struct StopOnDrop(Arc<AtomicBool>);
        impl Drop for StopOnDrop {
            fn drop(&mut self) {
                self.0.store(true, Ordering::Release);
            }
        }

        let pipeline = FramePipeline::start(
            quick_config(),
            move |_root: &Arc<Layer>| StopOnDrop(flag),
            |_, _| {},
        )
        .expect("start pipeline");
        // Nobody renders, so the notice ring fills and the simulation waits.
        std::thread::sleep(Duration::from_millis(20));
        drop(pipeline);
        assert!(stopped.load(Ordering::Acquire));
    }

    #[test]
    fn panicking_update_surfaces_as_stopped_then_panicked() {
        let mut pipeline = FramePipeline::start(
            quick_config(),
            |_root: &Arc<Layer>| (),
            |_, _| panic!("update failed"),
        )
        .expect("start pipeline");
        let mut backend = RecordingBackend::new();

        let error = pipeline
            .render_frame(&mut backend)
            .expect_err("no frame can complete");
        assert!(matches!(error, RuntimeError::SimulationStopped));
        assert!(matches!(
            pipeline.shutdown(),
            Err(RuntimeError::SimulationPanicked)
        ));
    }
}
