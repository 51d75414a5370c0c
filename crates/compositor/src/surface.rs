//! Render targets handed to the rasterizer.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::RgbaImage;

use crate::canvas::Canvas;
use crate::geometry::{ISize, Matrix};

const MIB: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuBackend {
    Software,
    OpenGl,
    Vulkan,
    Metal,
}

impl GpuBackend {
    /// Resource cache budget a fresh context of this backend starts with.
    pub fn default_resource_cache_max_bytes(self) -> usize {
        match self {
            GpuBackend::Vulkan => 512 * MIB,
            GpuBackend::Software | GpuBackend::OpenGl | GpuBackend::Metal => 24 * MIB,
        }
    }
}

impl fmt::Display for GpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GpuBackend::Software => "software",
            GpuBackend::OpenGl => "gl",
            GpuBackend::Vulkan => "vulkan",
            GpuBackend::Metal => "metal",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownGpuBackend(pub String);

impl fmt::Display for UnknownGpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown gpu backend `{}`", self.0)
    }
}

impl std::error::Error for UnknownGpuBackend {}

impl FromStr for GpuBackend {
    type Err = UnknownGpuBackend;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "software" => Ok(GpuBackend::Software),
            "gl" | "opengl" => Ok(GpuBackend::OpenGl),
            "vulkan" => Ok(GpuBackend::Vulkan),
            "metal" => Ok(GpuBackend::Metal),
            _ => Err(UnknownGpuBackend(value.to_owned())),
        }
    }
}

/// Graphics context state owned by a surface.
#[derive(Debug, Clone)]
pub struct GpuContext {
    backend: GpuBackend,
    resource_cache_limit: usize,
}

impl GpuContext {
    pub fn new(backend: GpuBackend) -> Self {
        Self {
            backend,
            resource_cache_limit: backend.default_resource_cache_max_bytes(),
        }
    }

    pub fn backend(&self) -> GpuBackend {
        self.backend
    }

    pub fn resource_cache_limit(&self) -> usize {
        self.resource_cache_limit
    }

    pub fn set_resource_cache_limit(&mut self, max_bytes: usize) {
        self.resource_cache_limit = max_bytes;
    }
}

pub type SubmitCallback = Box<dyn FnOnce(&Canvas) -> bool + Send>;

/// A canvas acquired from a surface for exactly one frame.
pub struct SurfaceFrame {
    canvas: Canvas,
    submitted: bool,
    submit_callback: Option<SubmitCallback>,
}

impl SurfaceFrame {
    pub fn new(canvas: Canvas, submit_callback: SubmitCallback) -> Self {
        Self {
            canvas,
            submitted: false,
            submit_callback: Some(submit_callback),
        }
    }

    pub fn size(&self) -> ISize {
        self.canvas.size()
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted
    }

    /// Presents the frame. A frame is submitted at most once.
    pub fn submit(&mut self) -> bool {
        if self.submitted {
            return false;
        }
        let Some(submit_callback) = self.submit_callback.take() else {
            return false;
        };
        self.submitted = submit_callback(&self.canvas);
        self.submitted
    }
}

pub trait Surface: Send {
    fn is_valid(&self) -> bool;

    fn acquire_frame(&mut self, size: ISize) -> Option<SurfaceFrame>;

    fn root_transformation(&self) -> Matrix {
        Matrix::IDENTITY
    }

    fn context(&self) -> Option<&GpuContext>;

    fn context_mut(&mut self) -> Option<&mut GpuContext>;
}

/// Shared view of what a [`SoftwareSurface`] has presented.
#[derive(Clone, Default)]
pub struct PresentedFrames {
    last_frame: Arc<Mutex<Option<RgbaImage>>>,
    count: Arc<AtomicUsize>,
}

impl PresentedFrames {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn last_frame(&self) -> Option<RgbaImage> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn present(&self, canvas: &Canvas) {
        *self.last_frame.lock().unwrap_or_else(PoisonError::into_inner) = Some(canvas.image().clone());
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

/// CPU surface; `backend` only selects the context's resource cache defaults.
pub struct SoftwareSurface {
    context: GpuContext,
    presented: PresentedFrames,
}

impl SoftwareSurface {
    pub fn new(backend: GpuBackend) -> Self {
        Self::with_presented_frames(backend, PresentedFrames::default())
    }

    /// A surface that reports into an existing [`PresentedFrames`], so one view
    /// can be observed across surface re-creation.
    pub fn with_presented_frames(backend: GpuBackend, presented: PresentedFrames) -> Self {
        Self {
            context: GpuContext::new(backend),
            presented,
        }
    }

    pub fn presented_frames(&self) -> PresentedFrames {
        self.presented.clone()
    }
}

impl Surface for SoftwareSurface {
    fn is_valid(&self) -> bool {
        true
    }

    fn acquire_frame(&mut self, size: ISize) -> Option<SurfaceFrame> {
        if size.is_empty() {
            tracing::warn!(?size, "refusing to acquire an empty surface frame");
            return None;
        }
        let presented = self.presented.clone();
        Some(SurfaceFrame::new(
            Canvas::new(size),
            Box::new(move |canvas| {
                presented.present(canvas);
                true
            }),
        ))
    }

    fn context(&self) -> Option<&GpuContext> {
        Some(&self.context)
    }

    fn context_mut(&mut self) -> Option<&mut GpuContext> {
        Some(&mut self.context)
    }
}
