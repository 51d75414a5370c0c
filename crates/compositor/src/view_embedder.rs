//! Hooks for compositing native platform views with the rasterized scene.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use task_runner::RasterThreadMerger;

use crate::geometry::ISize;
use crate::surface::SurfaceFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostPrerollResult {
    Success,
    ResubmitFrame,
    SkipAndRetryFrame,
}

/// Participates in every frame the rasterizer draws.
///
/// `begin_frame` precedes preroll, `post_preroll_action` runs after preroll and
/// may request a resubmission (typically after merging threads), `submit_frame`
/// replaces the plain surface submission, and `end_frame` is called exactly once
/// per rasterizer draw pass while a surface is attached.
pub trait ExternalViewEmbedder: Send + Sync {
    fn begin_frame(
        &self,
        frame_size: ISize,
        device_pixel_ratio: f32,
        raster_thread_merger: Option<&Arc<RasterThreadMerger>>,
    );

    fn post_preroll_action(&self, _raster_thread_merger: &Arc<RasterThreadMerger>) -> PostPrerollResult {
        PostPrerollResult::Success
    }

    fn submit_frame(&self, mut frame: SurfaceFrame) {
        frame.submit();
    }

    fn end_frame(
        &self,
        _should_resubmit_frame: bool,
        _raster_thread_merger: Option<Arc<RasterThreadMerger>>,
    ) {
    }

    fn cancel_frame(&self) {}

    /// Whether the rasterizer should own a merger for this embedder.
    fn supports_dynamic_thread_merging(&self) -> bool {
        false
    }

    fn teardown(&self) {}
}

pub type EndFrameCallback = Box<dyn Fn(bool, Option<Arc<RasterThreadMerger>>) + Send + Sync>;

/// Embedder whose frame end is delegated to a callback, with observable
/// submission state. Platforms drive their thread merging policy from the
/// callback; the post-preroll answer can be swapped at any time.
pub struct CallbackViewEmbedder {
    end_frame_callback: EndFrameCallback,
    post_preroll_result: Mutex<PostPrerollResult>,
    supports_thread_merging: bool,
    submitted_frame_count: AtomicUsize,
    last_submitted_frame_size: Mutex<ISize>,
}

impl CallbackViewEmbedder {
    pub fn new(
        end_frame_callback: EndFrameCallback,
        post_preroll_result: PostPrerollResult,
        supports_thread_merging: bool,
    ) -> Self {
        Self {
            end_frame_callback,
            post_preroll_result: Mutex::new(post_preroll_result),
            supports_thread_merging,
            submitted_frame_count: AtomicUsize::new(0),
            last_submitted_frame_size: Mutex::new(ISize::default()),
        }
    }

    pub fn update_post_preroll_result(&self, post_preroll_result: PostPrerollResult) {
        *self
            .post_preroll_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = post_preroll_result;
    }

    pub fn submitted_frame_count(&self) -> usize {
        self.submitted_frame_count.load(Ordering::Acquire)
    }

    pub fn last_submitted_frame_size(&self) -> ISize {
        *self
            .last_submitted_frame_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExternalViewEmbedder for CallbackViewEmbedder {
    fn begin_frame(
        &self,
        _frame_size: ISize,
        _device_pixel_ratio: f32,
        _raster_thread_merger: Option<&Arc<RasterThreadMerger>>,
    ) {
    }

    fn post_preroll_action(&self, _raster_thread_merger: &Arc<RasterThreadMerger>) -> PostPrerollResult {
        *self
            .post_preroll_result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn submit_frame(&self, mut frame: SurfaceFrame) {
        *self
            .last_submitted_frame_size
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = frame.size();
        self.submitted_frame_count.fetch_add(1, Ordering::AcqRel);
        frame.submit();
    }

    fn end_frame(
        &self,
        should_resubmit_frame: bool,
        raster_thread_merger: Option<Arc<RasterThreadMerger>>,
    ) {
        (self.end_frame_callback)(should_resubmit_frame, raster_thread_merger);
    }

    fn supports_dynamic_thread_merging(&self) -> bool {
        self.supports_thread_merging
    }
}
