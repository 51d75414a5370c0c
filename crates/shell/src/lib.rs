//! Frame pipeline shell.
//!
//! A [`Shell`] owns a platform view, an engine and a rasterizer, each living
//! on its own execution context. Frames flow from the vsync-driven
//! [`Animator`] on the UI context, through the [`LayerTreePipeline`], to the
//! [`Rasterizer`] on the raster context. When an external view embedder
//! needs the platform thread, the raster queue is merged into the platform
//! queue for a lease of frames.

mod animator;
mod engine;
mod error;
mod frame_timing;
mod pipeline;
mod platform_message;
mod platform_view;
mod process_context;
mod rasterizer;
mod service_protocol;
mod settings;
mod shell;
mod task_runners;
mod viewport_metrics;
mod vsync_waiter;

#[cfg(test)]
mod tests;

pub use animator::{Animator, AnimatorDelegate};
pub use engine::{
    Application, DEFAULT_ENTRYPOINT, Engine, EngineDelegate, FrameContext, RunConfiguration, RunStatus,
};
pub use error::{ShellError, ShellResult};
pub use frame_timing::{FrameTiming, FrameTimingPhase, FrameTimingsRecorder, TimePoint};
pub use pipeline::{
    LayerTreeItem, LayerTreePipeline, PIPELINE_DEPTH, PipelineConsumeResult, PipelineProduceResult,
    ProducerContinuation,
};
pub use platform_message::{
    LIFECYCLE_CHANNEL, PlatformMessage, PlatformMessageHandler, PlatformMessageResponse, RASTER_CONTROL_CHANNEL,
    SET_RESOURCE_CACHE_MAX_BYTES_METHOD,
};
pub use platform_view::{PlatformView, SoftwarePlatformView, VsyncWaiterFactory};
pub use process_context::ProcessContext;
pub use rasterizer::{
    DiscardCallback, DrawResult, NextFrameCallback, Rasterizer, RasterizerDelegate, Screenshot, ScreenshotType,
};
pub use service_protocol::{
    ASSET_DIRECTORY_PARAM, ESTIMATE_RASTER_CACHE_MEMORY_METHOD, FLUSH_UI_THREAD_TASKS_METHOD,
    GET_DISPLAY_REFRESH_RATE_METHOD, GET_SKSLS_METHOD, SCREENSHOT_METHOD, SERVICE_PROTOCOL_METHODS,
    SET_ASSET_BUNDLE_PATH_METHOD, ServiceProtocolResponse, error_json,
};
pub use settings::{
    FrameRasterizedCallback, MetricsChangedCallback, ReportTimingsCallback, Settings, SettingsArgs,
    default_frame_timings_report_interval,
};
pub use shell::{REPORT_TIMINGS_FRAME_BATCH, Shell};
pub use task_runners::TaskRunners;
pub use viewport_metrics::ViewportMetrics;
pub use vsync_waiter::{DEFAULT_FRAME_INTERVAL, VsyncCallback, VsyncWaiter, VsyncWaiterFallback};
