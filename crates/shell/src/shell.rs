//! The shell ties one platform view, one engine and one rasterizer together
//! across the four execution contexts.
//!
//! Components are created on, used on, and destroyed on their own context:
//! the platform view on platform, the engine and animator on UI, the
//! rasterizer on raster. Cross-context calls either post fire-and-forget
//! tasks or rendezvous through [`TaskRunner::post_sync`].
//!
//! [`TaskRunner::post_sync`]: task_runner::TaskRunner::post_sync

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use compositor::{
    DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME, ISize, LayerTree, Picture, RasterCache, RasterStatus,
};
use image::RgbaImage;
use serde::Deserialize;
use task_runner::{RasterThreadMerger, SyncSwitch};

use crate::animator::{Animator, AnimatorDelegate};
use crate::engine::{Application, Engine, EngineDelegate, RunConfiguration, RunStatus};
use crate::error::{ShellError, ShellResult};
use crate::frame_timing::{FrameTiming, FrameTimingPhase, FrameTimingsRecorder, TimePoint};
use crate::pipeline::LayerTreePipeline;
use crate::platform_message::{
    PlatformMessage, PlatformMessageHandler, RASTER_CONTROL_CHANNEL, SET_RESOURCE_CACHE_MAX_BYTES_METHOD,
};
use crate::platform_view::PlatformView;
use crate::process_context::ProcessContext;
use crate::rasterizer::{DiscardCallback, NextFrameCallback, Rasterizer, RasterizerDelegate, Screenshot, ScreenshotType};
use crate::settings::Settings;
use crate::task_runners::TaskRunners;
use crate::viewport_metrics::ViewportMetrics;

/// Frames whose timings are batched before they are reported.
pub const REPORT_TIMINGS_FRAME_BATCH: usize = 100;

/// Resource cache budget in units of the viewport area: roughly a dozen
/// full-screen RGBA layers.
const RESOURCE_CACHE_SCREENS: f64 = 12.0;
const BYTES_PER_PIXEL: f64 = 4.0;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resource_cache_bytes_for(metrics: &ViewportMetrics) -> usize {
    let bytes = metrics.physical_width * metrics.physical_height * RESOURCE_CACHE_SCREENS * BYTES_PER_PIXEL;
    // Saturating float to int conversion.
    bytes as usize
}

#[derive(Deserialize)]
struct RasterControlMessage {
    method: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Default)]
struct TimingsReport {
    unreported: Vec<i64>,
    first_frame_rasterized: bool,
    report_scheduled: bool,
}

impl TimingsReport {
    fn unreported_frame_count(&self) -> usize {
        self.unreported.len() / FrameTimingPhase::COUNT
    }
}

pub(crate) struct ShellInner {
    weak_self: Weak<ShellInner>,
    task_runners: TaskRunners,
    settings: Settings,
    process_context: Arc<ProcessContext>,
    platform_view: Mutex<Option<Box<dyn PlatformView>>>,
    engine: Mutex<Option<Engine>>,
    rasterizer: Mutex<Option<Rasterizer>>,
    raster_thread_merger: Arc<ArcSwapOption<RasterThreadMerger>>,
    platform_message_handler: Mutex<Option<Arc<dyn PlatformMessageHandler>>>,
    expected_frame_size: Mutex<ISize>,
    viewport_metrics: Mutex<ViewportMetrics>,
    waiting_for_first_frame: Mutex<bool>,
    first_frame_condition: Condvar,
    timings_report: Mutex<TimingsReport>,
    is_gpu_disabled: Arc<SyncSwitch>,
}

impl ShellInner {
    fn draw_on_raster(self: &Arc<Self>, pipeline: Arc<LayerTreePipeline>, discard: DiscardCallback) {
        let result = match lock(&self.rasterizer).as_mut() {
            Some(rasterizer) => rasterizer.draw(&pipeline, &discard),
            None => return,
        };
        tracing::trace!(status = ?result.status, more_available = result.more_available, "raster pass");
        let yielded = result.status == RasterStatus::Yielded;
        if result.more_available || yielded {
            // Reposting lands on whichever thread rasterizes now.
            let inner = Weak::clone(&self.weak_self);
            self.task_runners.raster.post_task(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.draw_on_raster(pipeline, discard);
                }
            });
        }
    }

    fn handle_raster_control_message(&self, message: PlatformMessage) {
        let request: RasterControlMessage = match serde_json::from_slice(message.data()) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "malformed raster control message");
                message.respond_empty();
                return;
            }
        };
        if request.method != SET_RESOURCE_CACHE_MAX_BYTES_METHOD {
            tracing::debug!(method = %request.method, "unknown raster control method");
            message.respond_empty();
            return;
        }
        let Some(max_bytes) = request.args.as_u64().and_then(|bytes| usize::try_from(bytes).ok()) else {
            tracing::warn!(args = %request.args, "resource cache size must be a non-negative integer");
            message.respond_empty();
            return;
        };

        let inner = Weak::clone(&self.weak_self);
        self.task_runners.raster.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(rasterizer) = lock(&inner.rasterizer).as_mut() {
                    rasterizer.set_resource_cache_max_bytes(max_bytes, true);
                }
            }
            message.respond(b"[true]".to_vec());
        });
    }

    fn report_timings(&self, report: &mut TimingsReport) {
        let timings = std::mem::take(&mut report.unreported);
        let inner = Weak::clone(&self.weak_self);
        self.task_runners.ui.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(engine) = lock(&inner.engine).as_ref() {
                    engine.report_timings(timings);
                }
            }
        });
    }
}

impl EngineDelegate for ShellInner {
    fn on_engine_handle_platform_message(&self, message: PlatformMessage) {
        if message.channel() == RASTER_CONTROL_CHANNEL {
            self.handle_raster_control_message(message);
            return;
        }
        let handler = lock(&self.platform_message_handler).clone();
        if let Some(handler) = handler {
            handler.handle_platform_message(message);
            return;
        }
        let inner = Weak::clone(&self.weak_self);
        self.task_runners.platform.post_task(move || {
            let Some(inner) = inner.upgrade() else {
                message.respond_empty();
                return;
            };
            match lock(&inner.platform_view).as_mut() {
                Some(platform_view) => platform_view.handle_platform_message(message),
                None => message.respond_empty(),
            }
        });
    }
}

impl AnimatorDelegate for ShellInner {
    fn on_animator_begin_frame(&self, frame_target_time: TimePoint, frame_number: u64) {
        if let Some(engine) = lock(&self.engine).as_mut() {
            engine.begin_frame(frame_target_time, frame_number);
        }
    }

    fn on_animator_draw(&self, pipeline: Arc<LayerTreePipeline>) {
        let weak_inner = Weak::clone(&self.weak_self);
        let discard: DiscardCallback = Arc::new(move |layer_tree: &LayerTree| {
            weak_inner.upgrade().is_some_and(|inner| {
                let expected_frame_size = *lock(&inner.expected_frame_size);
                !expected_frame_size.is_empty() && layer_tree.frame_size() != expected_frame_size
            })
        });

        let inner = Weak::clone(&self.weak_self);
        self.task_runners.raster.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                inner.draw_on_raster(pipeline, discard);
            }
        });

        let mut waiting = lock(&self.waiting_for_first_frame);
        if *waiting {
            *waiting = false;
            self.first_frame_condition.notify_all();
        }
    }

    fn on_animator_draw_last_layer_tree(&self, frame_timings_recorder: FrameTimingsRecorder) {
        let inner = Weak::clone(&self.weak_self);
        self.task_runners.raster.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(rasterizer) = lock(&inner.rasterizer).as_mut() {
                    rasterizer.draw_last_layer_tree(frame_timings_recorder);
                }
            }
        });
    }
}

impl RasterizerDelegate for ShellInner {
    fn on_frame_rasterized(&self, frame_timing: &FrameTiming) {
        if let Some(callback) = self.settings.frame_rasterized_callback.as_ref() {
            callback(frame_timing);
        }
        if self.settings.report_timings_callback.is_none() {
            return;
        }

        let mut report = lock(&self.timings_report);
        for phase in FrameTimingPhase::PHASES {
            report.unreported.push(frame_timing.get(phase).as_micros());
        }

        if !report.first_frame_rasterized || report.unreported_frame_count() >= REPORT_TIMINGS_FRAME_BATCH {
            report.first_frame_rasterized = true;
            self.report_timings(&mut report);
        } else if !report.report_scheduled {
            report.report_scheduled = true;
            let inner = Weak::clone(&self.weak_self);
            self.task_runners.raster.post_delayed_task(
                move || {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    let mut report = lock(&inner.timings_report);
                    report.report_scheduled = false;
                    if !report.unreported.is_empty() {
                        inner.report_timings(&mut report);
                    }
                },
                self.settings.frame_timings_report_interval,
            );
        }
    }
}

/// One running instance of the frame pipeline.
pub struct Shell {
    inner: Arc<ShellInner>,
}

impl Shell {
    /// Creates every component on its own context. Fails without leaving a
    /// partially constructed shell behind.
    #[tracing::instrument(skip_all, fields(label = %task_runners.label))]
    pub fn create(
        process_context: Arc<ProcessContext>,
        task_runners: TaskRunners,
        settings: Settings,
        platform_view: Box<dyn PlatformView>,
        application: Box<dyn Application>,
    ) -> ShellResult<Self> {
        let inner = Arc::new_cyclic(|weak_self| ShellInner {
            weak_self: Weak::clone(weak_self),
            task_runners: task_runners.clone(),
            settings,
            process_context: Arc::clone(&process_context),
            platform_view: Mutex::new(None),
            engine: Mutex::new(None),
            rasterizer: Mutex::new(None),
            raster_thread_merger: Arc::new(ArcSwapOption::empty()),
            platform_message_handler: Mutex::new(None),
            expected_frame_size: Mutex::new(ISize::default()),
            viewport_metrics: Mutex::new(ViewportMetrics::default()),
            waiting_for_first_frame: Mutex::new(true),
            first_frame_condition: Condvar::new(),
            timings_report: Mutex::new(TimingsReport::default()),
            is_gpu_disabled: Arc::new(SyncSwitch::new(false)),
        });

        let ui_task_runner = task_runners.ui.clone();
        let (platform_view, vsync_waiter, external_view_embedder, platform_message_handler) =
            task_runners.platform.post_sync(move || {
                let vsync_waiter = platform_view.create_vsync_waiter(ui_task_runner);
                let external_view_embedder = platform_view.create_external_view_embedder();
                let platform_message_handler = platform_view.platform_message_handler();
                (platform_view, vsync_waiter, external_view_embedder, platform_message_handler)
            })?;
        *lock(&inner.platform_view) = Some(platform_view);
        *lock(&inner.platform_message_handler) = platform_message_handler;

        let rasterizer_inner = Arc::clone(&inner);
        task_runners.raster.post_sync(move || {
            let delegate = Arc::downgrade(&rasterizer_inner);
            let delegate: Weak<dyn RasterizerDelegate> = delegate;
            let raster_cache = RasterCache::new(
                rasterizer_inner.settings.raster_cache_access_threshold,
                DEFAULT_PICTURE_CACHE_LIMIT_PER_FRAME,
            );
            let mut rasterizer = Rasterizer::new(
                delegate,
                rasterizer_inner.task_runners.clone(),
                Arc::clone(&rasterizer_inner.is_gpu_disabled),
                raster_cache,
                Arc::clone(&rasterizer_inner.raster_thread_merger),
            );
            rasterizer.set_external_view_embedder(external_view_embedder);
            *lock(&rasterizer_inner.rasterizer) = Some(rasterizer);
        })?;

        let engine_inner = Arc::clone(&inner);
        task_runners.ui.post_sync(move || {
            let weak_inner = Arc::downgrade(&engine_inner);
            let animator_delegate: Weak<dyn AnimatorDelegate> = weak_inner.clone();
            let animator = Animator::new(animator_delegate, engine_inner.task_runners.ui.clone(), vsync_waiter);
            let engine_delegate: Weak<dyn EngineDelegate> = weak_inner;
            let engine = Engine::new(engine_delegate, animator, application, &engine_inner.settings);
            *lock(&engine_inner.engine) = Some(engine);
        })?;

        process_context.shell_started();
        tracing::debug!(log_tag = %inner.settings.log_tag, "shell created");
        Ok(Self { inner })
    }

    pub fn task_runners(&self) -> &TaskRunners {
        &self.inner.task_runners
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn process_context(&self) -> &Arc<ProcessContext> {
        &self.inner.process_context
    }

    /// Runs `task` on the UI context with the engine.
    pub fn with_engine<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut Engine) -> R + Send + 'static,
    ) -> ShellResult<R> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_runners
            .ui
            .post_sync(move || lock(&inner.engine).as_mut().map(task))?
            .ok_or(ShellError::FailedPrecondition("engine is gone"))
    }

    /// Runs `task` on the raster context with the rasterizer.
    pub fn with_rasterizer<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut Rasterizer) -> R + Send + 'static,
    ) -> ShellResult<R> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_runners
            .raster
            .post_sync(move || lock(&inner.rasterizer).as_mut().map(task))?
            .ok_or(ShellError::FailedPrecondition("rasterizer is gone"))
    }

    /// Runs `task` on the platform context with the platform view.
    pub fn with_platform_view<R: Send + 'static>(
        &self,
        task: impl FnOnce(&mut dyn PlatformView) -> R + Send + 'static,
    ) -> ShellResult<R> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .task_runners
            .platform
            .post_sync(move || {
                lock(&inner.platform_view)
                    .as_deref_mut()
                    .map(|platform_view| task(platform_view))
            })?
            .ok_or(ShellError::FailedPrecondition("platform view is gone"))
    }

    pub fn run_engine(&self, configuration: RunConfiguration) -> ShellResult<RunStatus> {
        self.with_engine(move |engine| engine.run(configuration))
    }

    /// The platform view became visible. Returns once the rasterizer owns the
    /// new surface.
    #[tracing::instrument(skip_all)]
    pub fn notify_created(&self) -> ShellResult<()> {
        let surface = self
            .with_platform_view(|platform_view| platform_view.create_rendering_surface())?
            .ok_or(ShellError::ComponentCreation("rendering surface"))?;

        let precompile_cache = self.inner.settings.cache_sksl.then(|| self.inner.process_context.persistent_cache());
        self.with_rasterizer(move |rasterizer| {
            rasterizer.enable_thread_merger_if_needed();
            rasterizer.setup(surface);
            if let Some(persistent_cache) = precompile_cache {
                let sksls = persistent_cache.load_sksls();
                tracing::debug!(count = sksls.len(), "warmed up cached shaders");
            }
        })?;

        self.with_engine(|engine| engine.on_output_surface_created())
    }

    /// The platform view went away. In-flight raster work finishes first; a
    /// thread merge in effect is ended before this returns.
    #[tracing::instrument(skip_all)]
    pub fn notify_destroyed(&self) -> ShellResult<()> {
        // Nothing may merge the threads while the surface is being released.
        if let Some(raster_thread_merger) = self.inner.raster_thread_merger.load_full() {
            raster_thread_merger.disable();
        }

        if let Err(error) = self.with_engine(|engine| engine.on_output_surface_destroyed()) {
            if let Some(raster_thread_merger) = self.inner.raster_thread_merger.load_full() {
                raster_thread_merger.enable();
            }
            return Err(error);
        }
        self.with_rasterizer(|rasterizer| {
            rasterizer.enable_thread_merger_if_needed();
            rasterizer.teardown();
        })
    }

    /// Invalid metrics (any of ratio, width or height not positive) are
    /// ignored and the previous ones stay in effect.
    pub fn set_viewport_metrics(&self, metrics: ViewportMetrics) {
        if !metrics.is_valid() {
            tracing::debug!(?metrics, "ignoring invalid viewport metrics");
            return;
        }
        *lock(&self.inner.viewport_metrics) = metrics;

        let max_bytes = resource_cache_bytes_for(&metrics);
        let inner = Arc::downgrade(&self.inner);
        self.inner.task_runners.raster.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(rasterizer) = lock(&inner.rasterizer).as_mut() {
                    rasterizer.set_resource_cache_max_bytes(max_bytes, false);
                }
            }
        });

        let inner = Arc::downgrade(&self.inner);
        self.inner.task_runners.ui.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(engine) = lock(&inner.engine).as_mut() {
                    engine.set_viewport_metrics(metrics);
                }
            }
        });

        *lock(&self.inner.expected_frame_size) = metrics.frame_size();
    }

    /// Last valid metrics the platform reported.
    pub fn viewport_metrics(&self) -> ViewportMetrics {
        *lock(&self.inner.viewport_metrics)
    }

    /// Forwards a platform message to the engine.
    pub fn dispatch_platform_message(&self, message: PlatformMessage) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.task_runners.ui.post_task(move || {
            let Some(inner) = inner.upgrade() else {
                message.respond_empty();
                return;
            };
            match lock(&inner.engine).as_mut() {
                Some(engine) => engine.dispatch_platform_message(message),
                None => message.respond_empty(),
            }
        });
    }

    /// Blocks until the first frame was handed to the rasterizer.
    pub fn wait_for_first_frame(&self, timeout: Duration) -> ShellResult<()> {
        let task_runners = &self.inner.task_runners;
        if task_runners.ui.runs_tasks_on_current_thread() || task_runners.raster.runs_tasks_on_current_thread() {
            return Err(ShellError::FailedPrecondition(
                "waiting for the first frame from the ui or raster context",
            ));
        }
        let waiting = lock(&self.inner.waiting_for_first_frame);
        let (waiting, _) = self
            .inner
            .first_frame_condition
            .wait_timeout_while(waiting, timeout, |waiting| *waiting)
            .unwrap_or_else(PoisonError::into_inner);
        if *waiting {
            return Err(ShellError::DeadlineExceeded("first frame"));
        }
        Ok(())
    }

    pub fn screenshot(&self, screenshot_type: ScreenshotType, base64_encode: bool) -> ShellResult<Screenshot> {
        self.with_rasterizer(move |rasterizer| rasterizer.screenshot_last_layer_tree(screenshot_type, base64_encode))
    }

    pub fn make_raster_snapshot(&self, picture: Arc<Picture>, size: ISize) -> ShellResult<Option<RgbaImage>> {
        self.with_rasterizer(move |rasterizer| rasterizer.make_raster_snapshot(&picture, size))
    }

    /// While unavailable, frames reaching the rasterizer are discarded.
    pub fn set_gpu_available(&self, available: bool) {
        self.inner.is_gpu_disabled.set_switch_value(!available);
    }

    pub fn is_gpu_disabled(&self) -> bool {
        self.inner.is_gpu_disabled.value()
    }

    /// Runs `callback` on the raster context after the next frame is submitted.
    pub fn set_next_frame_callback(&self, callback: NextFrameCallback) {
        let inner = Arc::downgrade(&self.inner);
        self.inner.task_runners.raster.post_task(move || {
            if let Some(inner) = inner.upgrade() {
                if let Some(rasterizer) = lock(&inner.rasterizer).as_mut() {
                    rasterizer.set_next_frame_callback(callback);
                }
            }
        });
    }

    /// The merger created for an embedder that merges threads, if any.
    pub fn raster_thread_merger(&self) -> Option<Arc<RasterThreadMerger>> {
        self.inner.raster_thread_merger.load_full()
    }
}

impl Drop for Shell {
    fn drop(&mut self) {
        let task_runners = self.inner.task_runners.clone();

        let inner = Arc::clone(&self.inner);
        if let Err(error) = task_runners.ui.post_sync(move || {
            let engine = lock(&inner.engine).take();
            drop(engine);
        }) {
            tracing::warn!(%error, "engine was not destroyed on the ui context");
        }

        let inner = Arc::clone(&self.inner);
        if let Err(error) = task_runners.raster.post_sync(move || {
            let rasterizer = lock(&inner.rasterizer).take();
            if let Some(mut rasterizer) = rasterizer {
                rasterizer.enable_thread_merger_if_needed();
                rasterizer.teardown();
                rasterizer.teardown_external_view_embedder();
            }
        }) {
            tracing::warn!(%error, "rasterizer was not destroyed on the raster context");
        }

        let inner = Arc::clone(&self.inner);
        if let Err(error) = task_runners.platform.post_sync(move || {
            let platform_view = lock(&inner.platform_view).take();
            drop(platform_view);
            lock(&inner.platform_message_handler).take();
        }) {
            tracing::warn!(%error, "platform view was not destroyed on the platform context");
        }

        self.inner.process_context.shell_stopped();
    }
}
