use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::signal::{SignalConnection, SignalRegistry};
use crate::{BufferIndices, FramePhase};

pub type DeferredAction = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSyncConfig {
    /// Render-action batches allowed to pile up before a lag warning is logged.
    pub pending_batch_warning: usize,
}

impl Default for FrameSyncConfig {
    fn default() -> Self {
        Self {
            pending_batch_warning: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationFrame {
    pub presentation_frame: u64,
    pub indices: BufferIndices,
    pub swapped: bool,
    pub executed_actions: usize,
}

struct RenderActionBatch {
    simulation_frame: u64,
    actions: Vec<DeferredAction>,
}

struct FrameState {
    indices: BufferIndices,
    fresh_simulation_frame: bool,
    simulation_frame: u64,
    presentation_frame: u64,
    pending_render_actions: Vec<DeferredAction>,
}

pub struct TripleBufferEnabler {
    config: FrameSyncConfig,
    state: Mutex<FrameState>,
    signals: SignalRegistry,
    render_batch_sender: Sender<RenderActionBatch>,
    render_batch_receiver: Receiver<RenderActionBatch>,
    simulation_action_sender: Sender<DeferredAction>,
    simulation_action_receiver: Receiver<DeferredAction>,
}

impl TripleBufferEnabler {
    pub fn new(config: FrameSyncConfig) -> Self {
        let (render_batch_sender, render_batch_receiver) = unbounded();
        let (simulation_action_sender, simulation_action_receiver) = unbounded();
        Self {
            config,
            state: Mutex::new(FrameState {
                indices: BufferIndices::INITIAL,
                fresh_simulation_frame: false,
                simulation_frame: 0,
                presentation_frame: 0,
                pending_render_actions: Vec::new(),
            }),
            signals: SignalRegistry::default(),
            render_batch_sender,
            render_batch_receiver,
            simulation_action_sender,
            simulation_action_receiver,
        }
    }

    pub fn config(&self) -> FrameSyncConfig {
        self.config
    }

    pub fn buffer_indices(&self) -> BufferIndices {
        self.lock_state().indices
    }

    pub fn current_simulation_id(&self) -> usize {
        self.buffer_indices().current_simulation()
    }

    pub fn last_simulation_id(&self) -> usize {
        self.buffer_indices().last_simulation()
    }

    pub fn present_id(&self) -> usize {
        self.buffer_indices().present()
    }

    pub fn simulation_frame(&self) -> u64 {
        self.lock_state().simulation_frame
    }

    pub fn presentation_frame(&self) -> u64 {
        self.lock_state().presentation_frame
    }

    pub fn pending_rendering_actions(&self) -> usize {
        self.lock_state().pending_render_actions.len()
    }

    /// Queue `action` for the render thread. It runs during the first
    /// presentation frame that shows the simulation frame it was scheduled in.
    pub fn schedule_rendering_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.lock_state()
            .pending_render_actions
            .push(Box::new(action));
    }

    /// Queue `action` for the simulation thread; it runs at the next
    /// simulation frame completion.
    pub fn schedule_simulation_action<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.simulation_action_sender
            .send(Box::new(action))
            .expect("simulation action receiver is owned by the enabler");
    }

    pub fn connect<F>(&self, phase: FramePhase, ordering: i32, callback: F) -> SignalConnection
    where
        F: Fn(&BufferIndices) + Send + Sync + 'static,
    {
        self.signals.connect(phase, ordering, Arc::new(callback))
    }

    pub fn disconnect(&self, connection: SignalConnection) -> bool {
        self.signals.disconnect(connection)
    }

    pub fn connection_count(&self, phase: FramePhase) -> usize {
        self.signals.connection_count(phase)
    }

    /// Simulation thread: finish the current simulation frame.
    ///
    /// Returns the number of the frame that completed.
    pub fn signal_complete_simulation_frame(&self) -> u64 {
        let (indices, completed_frame) = {
            let mut state = self.lock_state();
            state.indices.complete_simulation();
            state.fresh_simulation_frame = true;
            state.simulation_frame += 1;
            let actions = std::mem::take(&mut state.pending_render_actions);
            if !actions.is_empty() {
                self.render_batch_sender
                    .send(RenderActionBatch {
                        simulation_frame: state.simulation_frame,
                        actions,
                    })
                    .expect("render batch receiver is owned by the enabler");
            }
            (state.indices, state.simulation_frame)
        };

        let backlog = self.render_batch_receiver.len();
        if backlog > self.config.pending_batch_warning {
            tracing::warn!(
                backlog,
                completed_frame,
                "render thread is lagging behind simulation"
            );
        }

        let copied = self
            .signals
            .emit(FramePhase::CompleteSimulationFrame, &indices);
        let simulation_actions: Vec<DeferredAction> =
            self.simulation_action_receiver.try_iter().collect();
        let simulation_action_count = simulation_actions.len();
        for action in simulation_actions {
            action();
        }
        tracing::trace!(
            completed_frame,
            copied,
            simulation_action_count,
            "simulation frame complete"
        );
        completed_frame
    }

    /// Render thread: pick up the latest completed simulation frame and run
    /// the render actions published up to it.
    pub fn begin_presentation_frame(&self) -> PresentationFrame {
        let (indices, swapped, presentation_frame, batches) = {
            let mut state = self.lock_state();
            let swapped = state.fresh_simulation_frame;
            if swapped {
                state.indices.present_last_simulation();
                state.fresh_simulation_frame = false;
            }
            state.presentation_frame += 1;
            let batches: Vec<RenderActionBatch> = self.render_batch_receiver.try_iter().collect();
            (state.indices, swapped, state.presentation_frame, batches)
        };

        let mut executed_actions = 0;
        for batch in batches {
            tracing::trace!(
                simulation_frame = batch.simulation_frame,
                actions = batch.actions.len(),
                "running render actions"
            );
            for action in batch.actions {
                action();
                executed_actions += 1;
            }
        }
        self.signals.emit(FramePhase::PostUpdate, &indices);

        PresentationFrame {
            presentation_frame,
            indices,
            swapped,
            executed_actions,
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FrameState> {
        self.state
            .lock()
            .expect("triple buffer enabler state lock poisoned")
    }
}

impl Default for TripleBufferEnabler {
    fn default() -> Self {
        Self::new(FrameSyncConfig::default())
    }
}

impl std::fmt::Debug for TripleBufferEnabler {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        formatter
            .debug_struct("TripleBufferEnabler")
            .field("indices", &state.indices)
            .field("simulation_frame", &state.simulation_frame)
            .field("presentation_frame", &state.presentation_frame)
            .field("pending_render_actions", &state.pending_render_actions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::TripleBuffered;

    #[test]
    fn render_action_waits_for_simulation_completion() {
        let enabler = TripleBufferEnabler::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_action = Arc::clone(&ran);
        enabler.schedule_rendering_action(move || {
            ran_in_action.fetch_add(1, Ordering::SeqCst);
        });

        let early = enabler.begin_presentation_frame();
        assert!(!early.swapped);
        assert_eq!(early.executed_actions, 0);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        enabler.signal_complete_simulation_frame();
        let presented = enabler.begin_presentation_frame();
        assert!(presented.swapped);
        assert_eq!(presented.executed_actions, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        let repeat = enabler.begin_presentation_frame();
        assert!(!repeat.swapped);
        assert_eq!(repeat.executed_actions, 0);
    }

    #[test]
    fn render_actions_keep_fifo_order_across_frames() {
        let enabler = TripleBufferEnabler::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for frame in 0..3 {
            for step in 0..2 {
                let log = Arc::clone(&log);
                enabler.schedule_rendering_action(move || {
                    log.lock().expect("log lock").push((frame, step));
                });
            }
            enabler.signal_complete_simulation_frame();
        }
        enabler.begin_presentation_frame();
        assert_eq!(
            *log.lock().expect("log lock"),
            vec![(0, 0), (0, 1), (1, 0), (1, 1), (2, 0), (2, 1)]
        );
    }

    #[test]
    fn simulation_action_runs_at_completion() {
        let enabler = TripleBufferEnabler::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_in_action = Arc::clone(&ran);
        enabler.schedule_simulation_action(move || {
            ran_in_action.fetch_add(1, Ordering::SeqCst);
        });
        enabler.begin_presentation_frame();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        enabler.signal_complete_simulation_frame();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completion_signal_copies_state_forward() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let value = Arc::new(TripleBuffered::new(0u32));
        let value_for_signal = Arc::clone(&value);
        enabler.connect(
            FramePhase::CompleteSimulationFrame,
            0,
            move |indices: &BufferIndices| value_for_signal.advance(indices),
        );

        value.set_simulation_value(&enabler.buffer_indices(), 10);
        enabler.signal_complete_simulation_frame();
        assert_eq!(*value.simulation_value(&enabler.buffer_indices()), 10);

        value.update_simulation_value(&enabler.buffer_indices(), |v| *v += 1);
        let frame = enabler.begin_presentation_frame();
        assert_eq!(*value.render_value(&frame.indices), 10);
        assert_eq!(*value.simulation_value(&enabler.buffer_indices()), 11);
    }

    #[test]
    fn post_update_fires_after_render_actions() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for_signal = Arc::clone(&log);
        enabler.connect(FramePhase::PostUpdate, 0, move |_: &BufferIndices| {
            log_for_signal.lock().expect("log lock").push("post_update");
        });
        let log_for_action = Arc::clone(&log);
        enabler.schedule_rendering_action(move || {
            log_for_action.lock().expect("log lock").push("action");
        });
        enabler.signal_complete_simulation_frame();
        enabler.begin_presentation_frame();
        assert_eq!(*log.lock().expect("log lock"), vec!["action", "post_update"]);
    }

    #[test]
    fn presented_values_never_go_backwards_across_threads() {
        let enabler = Arc::new(TripleBufferEnabler::default());
        let counter = Arc::new(TripleBuffered::new(0u64));
        let counter_for_signal = Arc::clone(&counter);
        enabler.connect(
            FramePhase::CompleteSimulationFrame,
            0,
            move |indices: &BufferIndices| counter_for_signal.advance(indices),
        );

        std::thread::scope(|scope| {
            let simulation_enabler = Arc::clone(&enabler);
            let simulation_counter = Arc::clone(&counter);
            scope.spawn(move || {
                for _ in 0..500 {
                    let indices = simulation_enabler.buffer_indices();
                    simulation_counter.update_simulation_value(&indices, |value| *value += 1);
                    simulation_enabler.signal_complete_simulation_frame();
                }
            });

            let mut last_seen = 0;
            for _ in 0..500 {
                let frame = enabler.begin_presentation_frame();
                let presented = *counter.render_value(&frame.indices);
                assert!(presented >= last_seen, "{presented} < {last_seen}");
                last_seen = presented;
            }
        });

        let frame = enabler.begin_presentation_frame();
        assert_eq!(*counter.render_value(&frame.indices), 500);
    }
}
