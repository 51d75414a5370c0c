//! Raster-context half of the shell.
//!
//! The rasterizer drains the layer tree pipeline, draws each tree onto the
//! surface through the compositor context, and coordinates with the external
//! view embedder. An embedder that needs the platform thread asks for a
//! resubmission after preroll. The tree is then pushed back to the front of
//! the pipeline and drawn again once the threads are merged.

use std::io::Cursor;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use compositor::{
    Canvas, CompositorContext, ExternalViewEmbedder, ISize, LayerTree, Matrix, Picture, RasterCache,
    RasterStatus, Surface,
};
use image::{ImageFormat, RgbaImage};
use task_runner::{RasterThreadMerger, RasterThreadStatus, SyncSwitch};

use crate::frame_timing::{FrameTiming, FrameTimingsRecorder, TimePoint};
use crate::pipeline::{LayerTreeItem, LayerTreePipeline, PipelineConsumeResult};
use crate::task_runners::TaskRunners;

/// Decides whether a layer tree is stale and must not reach the surface.
pub type DiscardCallback = Arc<dyn Fn(&LayerTree) -> bool + Send + Sync>;

pub type NextFrameCallback = Box<dyn FnOnce() + Send>;

pub trait RasterizerDelegate: Send + Sync {
    fn on_frame_rasterized(&self, frame_timing: &FrameTiming);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenshotType {
    /// Raw RGBA8 pixels, row-major.
    UncompressedImage,
    /// PNG.
    CompressedImage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Screenshot {
    /// `None` when nothing has been drawn yet.
    pub data: Option<Vec<u8>>,
    pub frame_size: ISize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawResult {
    pub status: RasterStatus,
    /// The pipeline still holds items and the caller should draw again.
    pub more_available: bool,
}

fn should_resubmit_frame(raster_status: RasterStatus) -> bool {
    matches!(raster_status, RasterStatus::Resubmit | RasterStatus::SkipAndRetry)
}

pub struct Rasterizer {
    delegate: Weak<dyn RasterizerDelegate>,
    task_runners: TaskRunners,
    is_gpu_disabled: Arc<SyncSwitch>,
    surface: Option<Box<dyn Surface>>,
    compositor_context: CompositorContext,
    last_layer_tree: Option<LayerTree>,
    resubmitted_item: Option<LayerTreeItem>,
    external_view_embedder: Option<Arc<dyn ExternalViewEmbedder>>,
    raster_thread_merger: Option<Arc<RasterThreadMerger>>,
    published_merger: Arc<ArcSwapOption<RasterThreadMerger>>,
    max_cache_bytes: Option<usize>,
    user_override_resource_cache_bytes: bool,
    next_frame_callback: Option<NextFrameCallback>,
}

impl Rasterizer {
    pub fn new(
        delegate: Weak<dyn RasterizerDelegate>,
        task_runners: TaskRunners,
        is_gpu_disabled: Arc<SyncSwitch>,
        raster_cache: RasterCache,
        published_merger: Arc<ArcSwapOption<RasterThreadMerger>>,
    ) -> Self {
        Self {
            delegate,
            task_runners,
            is_gpu_disabled,
            surface: None,
            compositor_context: CompositorContext::new(raster_cache),
            last_layer_tree: None,
            resubmitted_item: None,
            external_view_embedder: None,
            raster_thread_merger: None,
            published_merger,
            max_cache_bytes: None,
            user_override_resource_cache_bytes: false,
            next_frame_callback: None,
        }
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn compositor_context(&self) -> &CompositorContext {
        &self.compositor_context
    }

    pub fn last_layer_tree(&self) -> Option<&LayerTree> {
        self.last_layer_tree.as_ref()
    }

    pub fn raster_thread_merger(&self) -> Option<Arc<RasterThreadMerger>> {
        self.raster_thread_merger.clone()
    }

    pub fn set_external_view_embedder(&mut self, embedder: Option<Arc<dyn ExternalViewEmbedder>>) {
        self.external_view_embedder = embedder;
    }

    #[tracing::instrument(skip_all)]
    pub fn setup(&mut self, surface: Box<dyn Surface>) {
        self.surface = Some(surface);
        if let Some(max_cache_bytes) = self.max_cache_bytes {
            self.set_resource_cache_max_bytes(max_cache_bytes, self.user_override_resource_cache_bytes);
        }
        self.compositor_context.on_gr_context_created();

        let needs_merger = self
            .external_view_embedder
            .as_ref()
            .is_some_and(|embedder| embedder.supports_dynamic_thread_merging());
        if needs_merger && self.raster_thread_merger.is_none() {
            let platform = &self.task_runners.platform;
            let raster = &self.task_runners.raster;
            let merger = Arc::new(RasterThreadMerger::new(
                platform.queue_id(),
                raster.queue_id(),
                Arc::clone(raster.task_queues()),
            ));
            self.published_merger.store(Some(Arc::clone(&merger)));
            self.raster_thread_merger = Some(merger);
            tracing::debug!("created raster thread merger for the external view embedder");
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn teardown(&mut self) {
        if self.surface.is_some() {
            self.compositor_context.on_gr_context_destroyed();
        }
        self.surface = None;
        self.last_layer_tree = None;
        self.resubmitted_item = None;

        if let Some(merger) = self.raster_thread_merger.as_ref() {
            if merger.is_merged() {
                debug_assert!(merger.is_enabled(), "tearing down with a disabled merger");
                merger.unmerge_now();
            }
        }
    }

    pub fn enable_thread_merger_if_needed(&self) {
        if let Some(merger) = self.raster_thread_merger.as_ref() {
            merger.enable();
        }
    }

    pub fn disable_thread_merger_if_needed(&self) {
        if let Some(merger) = self.raster_thread_merger.as_ref() {
            merger.disable();
        }
    }

    pub fn teardown_external_view_embedder(&self) {
        if let Some(embedder) = self.external_view_embedder.as_ref() {
            embedder.teardown();
        }
    }

    pub fn set_next_frame_callback(&mut self, callback: NextFrameCallback) {
        self.next_frame_callback = Some(callback);
    }

    /// Draws the next pipeline item. Trees for which `discard` holds are
    /// dropped without touching the surface.
    pub fn draw(&mut self, pipeline: &Arc<LayerTreePipeline>, discard: &DiscardCallback) -> DrawResult {
        if let Some(merger) = self.raster_thread_merger.as_ref() {
            if !merger.is_on_rasterizing_thread() {
                return DrawResult {
                    status: RasterStatus::Yielded,
                    more_available: false,
                };
            }
        }

        let mut raster_status = RasterStatus::Failed;
        let mut consume_result = pipeline.consume(|item| {
            raster_status = if discard(&item.layer_tree) {
                RasterStatus::Discarded
            } else {
                self.do_draw(item, discard)
            };
        });
        if consume_result == PipelineConsumeResult::NoneAvailable {
            return DrawResult {
                status: RasterStatus::Failed,
                more_available: false,
            };
        }

        let should_resubmit = should_resubmit_frame(raster_status);
        if should_resubmit {
            if let Some(item) = self.resubmitted_item.take() {
                let requeued = pipeline
                    .produce_if_empty()
                    .is_some_and(|continuation| continuation.complete(item).success);
                if requeued {
                    consume_result = PipelineConsumeResult::MoreAvailable;
                }
            }
        } else if raster_status == RasterStatus::EnqueuePipeline {
            consume_result = PipelineConsumeResult::MoreAvailable;
        }

        if self.surface.is_some() {
            if let Some(embedder) = self.external_view_embedder.as_ref() {
                embedder.end_frame(should_resubmit, self.raster_thread_merger.clone());
            }
        }

        DrawResult {
            status: raster_status,
            more_available: consume_result == PipelineConsumeResult::MoreAvailable,
        }
    }

    fn do_draw(&mut self, item: LayerTreeItem, discard: &DiscardCallback) -> RasterStatus {
        let LayerTreeItem {
            mut layer_tree,
            mut frame_timings_recorder,
        } = item;
        if self.surface.is_none() {
            return RasterStatus::Failed;
        }

        frame_timings_recorder.record_raster_start(TimePoint::now());
        let raster_status = self.draw_to_surface(&frame_timings_recorder, &mut layer_tree, Some(discard));
        match raster_status {
            RasterStatus::Success => {
                self.last_layer_tree = Some(layer_tree);
                let frame_timing = frame_timings_recorder.record_raster_end();
                if let Some(delegate) = self.delegate.upgrade() {
                    delegate.on_frame_rasterized(&frame_timing);
                }
            }
            RasterStatus::Resubmit | RasterStatus::SkipAndRetry => {
                self.resubmitted_item = Some(LayerTreeItem::new(layer_tree, frame_timings_recorder));
                return raster_status;
            }
            RasterStatus::Discarded => return raster_status,
            _ => {}
        }

        // The lease counts frames that reached the surface while merged.
        if let Some(merger) = self.raster_thread_merger.as_ref() {
            if merger.decrement_lease() == RasterThreadStatus::UnmergedNow {
                return RasterStatus::EnqueuePipeline;
            }
        }
        raster_status
    }

    fn draw_to_surface(
        &mut self,
        frame_timings_recorder: &FrameTimingsRecorder,
        layer_tree: &mut LayerTree,
        discard: Option<&DiscardCallback>,
    ) -> RasterStatus {
        let is_gpu_disabled = Arc::clone(&self.is_gpu_disabled);
        is_gpu_disabled.execute(
            || RasterStatus::Discarded,
            || self.draw_to_surface_unsafe(frame_timings_recorder, layer_tree, discard),
        )
    }

    fn draw_to_surface_unsafe(
        &mut self,
        frame_timings_recorder: &FrameTimingsRecorder,
        layer_tree: &mut LayerTree,
        discard: Option<&DiscardCallback>,
    ) -> RasterStatus {
        self.compositor_context
            .ui_time_mut()
            .set_lap_time(frame_timings_recorder.build_duration());

        let embedder = self.external_view_embedder.clone();
        if let Some(embedder) = embedder.as_ref() {
            embedder.begin_frame(
                layer_tree.frame_size(),
                layer_tree.device_pixel_ratio(),
                self.raster_thread_merger.as_ref(),
            );
        }

        let Some(surface) = self.surface.as_mut() else {
            return RasterStatus::Failed;
        };
        let root_surface_transformation = surface.root_transformation();
        let Some(mut frame) = surface.acquire_frame(layer_tree.frame_size()) else {
            tracing::warn!(frame_size = ?layer_tree.frame_size(), "surface could not provide a frame");
            return RasterStatus::Failed;
        };

        let raster_status = self
            .compositor_context
            .acquire_frame(
                Some(frame.canvas_mut()),
                root_surface_transformation,
                true,
                embedder.as_deref(),
                self.raster_thread_merger.as_ref(),
            )
            .raster(layer_tree, false);
        if matches!(
            raster_status,
            RasterStatus::Failed | RasterStatus::SkipAndRetry | RasterStatus::Resubmit
        ) {
            return raster_status;
        }

        // The view may have been resized while this tree was in flight.
        if discard.is_some_and(|discard| discard(layer_tree)) {
            return RasterStatus::Discarded;
        }

        let embedder_submits = self
            .raster_thread_merger
            .as_ref()
            .is_none_or(|merger| merger.is_merged());
        match embedder.as_ref() {
            Some(embedder) if embedder_submits => embedder.submit_frame(frame),
            _ => {
                frame.submit();
            }
        }

        if let Some(callback) = self.next_frame_callback.take() {
            callback();
        }
        raster_status
    }

    /// Redraws the last successfully drawn tree, e.g. when the animator could
    /// reuse it. Returns whether there was anything to draw.
    pub fn draw_last_layer_tree(&mut self, frame_timings_recorder: FrameTimingsRecorder) -> bool {
        if self.surface.is_none() {
            return false;
        }
        let Some(mut layer_tree) = self.last_layer_tree.take() else {
            return false;
        };
        let raster_status = self.draw_to_surface(&frame_timings_recorder, &mut layer_tree, None);
        self.last_layer_tree = Some(layer_tree);

        if let Some(embedder) = self.external_view_embedder.as_ref() {
            embedder.end_frame(
                should_resubmit_frame(raster_status),
                self.raster_thread_merger.clone(),
            );
        }
        true
    }

    /// Sets the resource cache ceiling of the surface context. Once a user
    /// supplied value was set, values derived from the viewport are ignored.
    pub fn set_resource_cache_max_bytes(&mut self, max_bytes: usize, from_user: bool) {
        self.user_override_resource_cache_bytes |= from_user;
        if !from_user && self.user_override_resource_cache_bytes {
            return;
        }
        self.max_cache_bytes = Some(max_bytes);
        if let Some(context) = self.surface.as_mut().and_then(|surface| surface.context_mut()) {
            context.set_resource_cache_limit(max_bytes);
        }
    }

    pub fn resource_cache_max_bytes(&self) -> Option<usize> {
        self.surface
            .as_ref()
            .and_then(|surface| surface.context())
            .map(|context| context.resource_cache_limit())
    }

    /// Re-renders the last tree off screen, bypassing the raster cache.
    pub fn screenshot_last_layer_tree(&mut self, screenshot_type: ScreenshotType, base64_encode: bool) -> Screenshot {
        let Some(layer_tree) = self.last_layer_tree.as_mut() else {
            tracing::error!("last layer tree was empty when screenshotting");
            return Screenshot::default();
        };
        let frame_size = layer_tree.frame_size();
        let mut canvas = Canvas::new(frame_size);
        self.compositor_context
            .acquire_frame(Some(&mut canvas), Matrix::IDENTITY, false, None, None)
            .raster(layer_tree, true);

        let data = match screenshot_type {
            ScreenshotType::UncompressedImage => Some(canvas.into_image().into_raw()),
            ScreenshotType::CompressedImage => encode_png(&canvas.into_image()),
        };
        let Some(data) = data else {
            return Screenshot::default();
        };
        let data = if base64_encode {
            BASE64.encode(data).into_bytes()
        } else {
            data
        };
        Screenshot {
            data: Some(data),
            frame_size,
        }
    }

    /// Renders `picture` into a fresh image of `size`.
    pub fn make_raster_snapshot(&self, picture: &Picture, size: ISize) -> Option<RgbaImage> {
        if size.is_empty() {
            return None;
        }
        let mut canvas = Canvas::new(size);
        picture.playback(&mut canvas);
        Some(canvas.into_image())
    }
}

fn encode_png(image: &RgbaImage) -> Option<Vec<u8>> {
    let mut encoded = Cursor::new(Vec::new());
    match image.write_to(&mut encoded, ImageFormat::Png) {
        Ok(()) => Some(encoded.into_inner()),
        Err(error) => {
            tracing::error!(%error, "screenshot png encoding failed");
            None
        }
    }
}
