use std::sync::Arc;

use compositor::{ExternalViewEmbedder, GpuBackend, PresentedFrames, SoftwareSurface, Surface};
use task_runner::TaskRunner;

use crate::platform_message::{PlatformMessage, PlatformMessageHandler};
use crate::vsync_waiter::{VsyncWaiter, VsyncWaiterFallback};

/// Platform side of a shell. Lives on the platform context.
pub trait PlatformView: Send {
    /// Surface handed to the rasterizer when the view becomes visible.
    fn create_rendering_surface(&mut self) -> Option<Box<dyn Surface>>;

    fn create_external_view_embedder(&self) -> Option<Arc<dyn ExternalViewEmbedder>> {
        None
    }

    fn create_vsync_waiter(&self, ui_task_runner: TaskRunner) -> Box<dyn VsyncWaiter> {
        Box::new(VsyncWaiterFallback::new(ui_task_runner))
    }

    /// Handler that receives engine messages directly on the UI context,
    /// bypassing the hop to the platform context.
    fn platform_message_handler(&self) -> Option<Arc<dyn PlatformMessageHandler>> {
        None
    }

    fn handle_platform_message(&mut self, message: PlatformMessage) {
        tracing::debug!(channel = message.channel(), "unhandled platform message");
        message.respond_empty();
    }
}

pub type VsyncWaiterFactory = Box<dyn Fn(TaskRunner) -> Box<dyn VsyncWaiter> + Send>;

/// Platform view rendering into software surfaces.
pub struct SoftwarePlatformView {
    backend: GpuBackend,
    presented_frames: PresentedFrames,
    external_view_embedder: Option<Arc<dyn ExternalViewEmbedder>>,
    platform_message_handler: Option<Arc<dyn PlatformMessageHandler>>,
    vsync_waiter_factory: Option<VsyncWaiterFactory>,
}

impl SoftwarePlatformView {
    pub fn new(backend: GpuBackend) -> Self {
        Self {
            backend,
            presented_frames: PresentedFrames::default(),
            external_view_embedder: None,
            platform_message_handler: None,
            vsync_waiter_factory: None,
        }
    }

    pub fn with_external_view_embedder(mut self, embedder: Arc<dyn ExternalViewEmbedder>) -> Self {
        self.external_view_embedder = Some(embedder);
        self
    }

    pub fn with_platform_message_handler(mut self, handler: Arc<dyn PlatformMessageHandler>) -> Self {
        self.platform_message_handler = Some(handler);
        self
    }

    pub fn with_vsync_waiter_factory(mut self, factory: VsyncWaiterFactory) -> Self {
        self.vsync_waiter_factory = Some(factory);
        self
    }

    /// Frames presented by every surface this view creates.
    pub fn presented_frames(&self) -> PresentedFrames {
        self.presented_frames.clone()
    }
}

impl PlatformView for SoftwarePlatformView {
    fn create_rendering_surface(&mut self) -> Option<Box<dyn Surface>> {
        Some(Box::new(SoftwareSurface::with_presented_frames(
            self.backend,
            self.presented_frames.clone(),
        )))
    }

    fn create_external_view_embedder(&self) -> Option<Arc<dyn ExternalViewEmbedder>> {
        self.external_view_embedder.clone()
    }

    fn create_vsync_waiter(&self, ui_task_runner: TaskRunner) -> Box<dyn VsyncWaiter> {
        match self.vsync_waiter_factory.as_ref() {
            Some(factory) => factory(ui_task_runner),
            None => Box::new(VsyncWaiterFallback::new(ui_task_runner)),
        }
    }

    fn platform_message_handler(&self) -> Option<Arc<dyn PlatformMessageHandler>> {
        self.platform_message_handler.clone()
    }
}
