use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use task_runner::RasterThreadMerger;

use crate::canvas::Canvas;
use crate::geometry::Matrix;
use crate::layer_tree::LayerTree;
use crate::picture::Color;
use crate::raster_cache::RasterCache;
use crate::view_embedder::{ExternalViewEmbedder, PostPrerollResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterStatus {
    /// Frame was drawn and submitted.
    Success,
    /// Frame must be drawn again immediately, e.g. after a thread merge.
    Resubmit,
    /// Frame was skipped and will be retried on the next pass.
    SkipAndRetry,
    /// Frame was drawn and the pipeline must be pumped again.
    EnqueuePipeline,
    Failed,
    /// Layer tree was not drawn because it no longer matches the target.
    Discarded,
    /// Not on the thread that currently rasterizes.
    Yielded,
}

const MAX_STOPWATCH_SAMPLES: usize = 120;

/// Rolling record of the most recent lap durations.
#[derive(Debug, Default)]
pub struct Stopwatch {
    laps: VecDeque<Duration>,
    started_at: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        let Some(started_at) = self.started_at.take() else {
            return;
        };
        if self.laps.len() == MAX_STOPWATCH_SAMPLES {
            self.laps.pop_front();
        }
        self.laps.push_back(started_at.elapsed());
    }

    pub fn set_lap_time(&mut self, lap: Duration) {
        if self.laps.len() == MAX_STOPWATCH_SAMPLES {
            self.laps.pop_front();
        }
        self.laps.push_back(lap);
    }

    pub fn last_lap(&self) -> Option<Duration> {
        self.laps.back().copied()
    }

    pub fn lap_count(&self) -> usize {
        self.laps.len()
    }

    pub fn average_lap(&self) -> Option<Duration> {
        let count = u32::try_from(self.laps.len()).ok().filter(|count| *count > 0)?;
        Some(self.laps.iter().sum::<Duration>() / count)
    }
}

/// Raster-side state that outlives individual frames.
#[derive(Default)]
pub struct CompositorContext {
    raster_cache: RasterCache,
    raster_time: Stopwatch,
    ui_time: Stopwatch,
    frame_count: u64,
}

impl CompositorContext {
    pub fn new(raster_cache: RasterCache) -> Self {
        Self {
            raster_cache,
            raster_time: Stopwatch::default(),
            ui_time: Stopwatch::default(),
            frame_count: 0,
        }
    }

    pub fn acquire_frame<'a>(
        &'a mut self,
        canvas: Option<&'a mut Canvas>,
        root_surface_transformation: Matrix,
        instrumentation_enabled: bool,
        view_embedder: Option<&'a dyn ExternalViewEmbedder>,
        raster_thread_merger: Option<&'a Arc<RasterThreadMerger>>,
    ) -> ScopedFrame<'a> {
        if instrumentation_enabled {
            self.frame_count += 1;
            self.raster_time.start();
        }
        ScopedFrame {
            context: self,
            canvas,
            root_surface_transformation,
            instrumentation_enabled,
            view_embedder,
            raster_thread_merger,
            used_raster_cache: false,
        }
    }

    pub fn raster_cache(&self) -> &RasterCache {
        &self.raster_cache
    }

    pub fn raster_cache_mut(&mut self) -> &mut RasterCache {
        &mut self.raster_cache
    }

    pub fn raster_time(&self) -> &Stopwatch {
        &self.raster_time
    }

    pub fn ui_time(&self) -> &Stopwatch {
        &self.ui_time
    }

    pub fn ui_time_mut(&mut self) -> &mut Stopwatch {
        &mut self.ui_time
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn on_gr_context_created(&mut self) {
        self.raster_cache.clear();
    }

    pub fn on_gr_context_destroyed(&mut self) {
        self.raster_cache.clear();
    }
}

/// One frame in flight. Dropping it ends the frame; frames that went through
/// the raster cache also sweep it.
pub struct ScopedFrame<'a> {
    context: &'a mut CompositorContext,
    canvas: Option<&'a mut Canvas>,
    root_surface_transformation: Matrix,
    instrumentation_enabled: bool,
    view_embedder: Option<&'a dyn ExternalViewEmbedder>,
    raster_thread_merger: Option<&'a Arc<RasterThreadMerger>>,
    used_raster_cache: bool,
}

impl ScopedFrame<'_> {
    pub fn root_surface_transformation(&self) -> Matrix {
        self.root_surface_transformation
    }

    pub fn raster(&mut self, layer_tree: &mut LayerTree, ignore_raster_cache: bool) -> RasterStatus {
        self.used_raster_cache |= !ignore_raster_cache;
        let raster_cache = (!ignore_raster_cache).then_some(&mut self.context.raster_cache);
        layer_tree.preroll(raster_cache, &self.root_surface_transformation);

        if let (Some(view_embedder), Some(raster_thread_merger)) =
            (self.view_embedder, self.raster_thread_merger)
        {
            match view_embedder.post_preroll_action(raster_thread_merger) {
                PostPrerollResult::Success => {}
                PostPrerollResult::ResubmitFrame => return RasterStatus::Resubmit,
                PostPrerollResult::SkipAndRetryFrame => return RasterStatus::SkipAndRetry,
            }
        }

        if let Some(canvas) = self.canvas.as_deref_mut() {
            canvas.clear(Color::TRANSPARENT);
            canvas.set_matrix(self.root_surface_transformation);
            let raster_cache = (!ignore_raster_cache).then_some(&self.context.raster_cache);
            layer_tree.paint(canvas, raster_cache);
        }
        RasterStatus::Success
    }
}

impl Drop for ScopedFrame<'_> {
    fn drop(&mut self) {
        if self.used_raster_cache {
            self.context.raster_cache.sweep_after_frame();
        }
        if self.instrumentation_enabled {
            self.context.raster_time.stop();
        }
    }
}
