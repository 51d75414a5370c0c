//! Turns frame requests into vsync-aligned begin-frame calls and forwards
//! rendered layer trees into the pipeline.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use compositor::{ISize, LayerTree};
use task_runner::TaskRunner;

use crate::frame_timing::{FrameTimingsRecorder, TimePoint};
use crate::pipeline::{LayerTreeItem, LayerTreePipeline, ProducerContinuation};
use crate::vsync_waiter::VsyncWaiter;

pub trait AnimatorDelegate: Send + Sync {
    fn on_animator_begin_frame(&self, frame_target_time: TimePoint, frame_number: u64);

    /// The pipeline went from empty to non-empty and needs a consumer.
    fn on_animator_draw(&self, pipeline: Arc<LayerTreePipeline>);

    fn on_animator_draw_last_layer_tree(&self, frame_timings_recorder: FrameTimingsRecorder);
}

struct AnimatorState {
    producer_continuation: Option<ProducerContinuation>,
    frame_timings_recorder: Option<FrameTimingsRecorder>,
    pending_frame_available: bool,
    paused: bool,
    regenerate_layer_tree: bool,
    frame_scheduled: bool,
    dimension_change_pending: bool,
    has_rendered: bool,
    last_layer_tree_size: ISize,
    frame_request_number: u64,
}

/// Lives on the UI context. All entry points must be called from there.
pub struct Animator {
    delegate: Weak<dyn AnimatorDelegate>,
    ui_task_runner: TaskRunner,
    waiter: Box<dyn VsyncWaiter>,
    pipeline: Arc<LayerTreePipeline>,
    state: Mutex<AnimatorState>,
    weak_self: Weak<Animator>,
}

impl Animator {
    pub fn new(
        delegate: Weak<dyn AnimatorDelegate>,
        ui_task_runner: TaskRunner,
        waiter: Box<dyn VsyncWaiter>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            delegate,
            ui_task_runner,
            waiter,
            pipeline: Arc::new(LayerTreePipeline::default()),
            state: Mutex::new(AnimatorState {
                producer_continuation: None,
                frame_timings_recorder: None,
                pending_frame_available: true,
                paused: true,
                regenerate_layer_tree: false,
                frame_scheduled: false,
                dimension_change_pending: false,
                has_rendered: false,
                last_layer_tree_size: ISize::default(),
                frame_request_number: 1,
            }),
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AnimatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pipeline(&self) -> &Arc<LayerTreePipeline> {
        &self.pipeline
    }

    pub fn vsync_waiter(&self) -> &dyn VsyncWaiter {
        self.waiter.as_ref()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn has_rendered(&self) -> bool {
        self.lock().has_rendered
    }

    pub fn frame_scheduled(&self) -> bool {
        self.lock().frame_scheduled
    }

    pub fn start(&self) {
        {
            let mut state = self.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
        }
        self.request_frame(true);
    }

    pub fn stop(&self) {
        self.lock().paused = true;
    }

    /// Lets one frame through while paused, so a resize is not lost.
    pub fn set_dimension_change_pending(&self) {
        self.lock().dimension_change_pending = true;
    }

    /// Asks for a vsync. Repeated requests before the vsync fires collapse
    /// into one.
    pub fn request_frame(&self, regenerate_layer_tree: bool) {
        {
            let mut state = self.lock();
            if regenerate_layer_tree {
                state.regenerate_layer_tree = true;
            }
            if state.paused && !state.dimension_change_pending {
                return;
            }
            if !state.pending_frame_available {
                return;
            }
            state.pending_frame_available = false;
            state.frame_scheduled = true;
        }
        let animator = self.weak_self.clone();
        self.ui_task_runner.post_task(move || {
            if let Some(animator) = animator.upgrade() {
                animator.await_vsync();
            }
        });
    }

    fn await_vsync(&self) {
        let animator = self.weak_self.clone();
        self.waiter.async_wait_for_vsync(Box::new(move |frame_timings_recorder| {
            let Some(animator) = animator.upgrade() else {
                return;
            };
            if animator.can_reuse_last_layer_tree() {
                animator.draw_last_layer_tree(frame_timings_recorder);
            } else {
                animator.begin_frame(frame_timings_recorder);
            }
        }));
    }

    fn can_reuse_last_layer_tree(&self) -> bool {
        !self.lock().regenerate_layer_tree
    }

    pub fn begin_frame(&self, mut frame_timings_recorder: FrameTimingsRecorder) {
        let (frame_target_time, frame_number) = {
            let mut state = self.lock();
            state.frame_request_number += 1;
            state.frame_scheduled = false;
            state.regenerate_layer_tree = false;
            state.pending_frame_available = true;
            frame_timings_recorder.record_build_start(TimePoint::now());
            let target = (
                frame_timings_recorder.vsync_target(),
                frame_timings_recorder.frame_number(),
            );
            state.frame_timings_recorder = Some(frame_timings_recorder);

            if state.producer_continuation.is_none() {
                // A begin frame that did not render leaves its slot for reuse.
                state.producer_continuation = self.pipeline.produce();
            }
            if state.producer_continuation.is_none() {
                drop(state);
                tracing::debug!("layer tree pipeline full, retrying at the next vsync");
                self.request_frame(true);
                return;
            }
            target
        };

        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_animator_begin_frame(frame_target_time, frame_number);
        }
    }

    pub fn render(&self, layer_tree: LayerTree) {
        let (continuation, frame_timings_recorder) = {
            let mut state = self.lock();
            state.has_rendered = true;
            let frame_size = layer_tree.frame_size();
            if state.dimension_change_pending && frame_size != state.last_layer_tree_size {
                state.dimension_change_pending = false;
            }
            state.last_layer_tree_size = frame_size;

            let mut frame_timings_recorder = state.frame_timings_recorder.take().unwrap_or_else(|| {
                // Rendering outside of a begin frame still needs plausible timings.
                let mut recorder = FrameTimingsRecorder::new();
                let placeholder = TimePoint::now();
                recorder.record_vsync(placeholder, placeholder);
                recorder.record_build_start(placeholder);
                recorder
            });
            frame_timings_recorder.record_build_end(TimePoint::now());
            (state.producer_continuation.take(), frame_timings_recorder)
        };

        let Some(continuation) = continuation else {
            tracing::debug!("no pending continuation to commit the layer tree to");
            return;
        };
        let result = continuation.complete(LayerTreeItem::new(layer_tree, frame_timings_recorder));
        if !result.success || !result.is_first_item {
            // Queued behind an item the rasterizer is already draining.
            return;
        }
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_animator_draw(Arc::clone(&self.pipeline));
        }
    }

    fn draw_last_layer_tree(&self, mut frame_timings_recorder: FrameTimingsRecorder) {
        {
            let mut state = self.lock();
            state.pending_frame_available = true;
            state.frame_scheduled = false;
        }
        let now = TimePoint::now();
        frame_timings_recorder.record_build_start(now);
        frame_timings_recorder.record_build_end(now);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_animator_draw_last_layer_tree(frame_timings_recorder);
        }
    }
}
