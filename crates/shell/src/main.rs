use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use assets::AssetManager;
use clap::Parser;
use compositor::{Color, ISize, LayerTree, Matrix, PictureLayer, PictureRecorder, Point, Rect, TransformLayer};
use shell::{
    Application, ESTIMATE_RASTER_CACHE_MEMORY_METHOD, FrameContext, FrameTiming, FrameTimingPhase, ProcessContext,
    RunConfiguration, RunStatus, ScreenshotType, SettingsArgs, Shell, SoftwarePlatformView, TaskRunners,
};
use task_runner::{TaskQueues, Thread, ThreadHost, ThreadHostType};
use tracing_subscriber::EnvFilter;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const SQUARE_SIZE: f32 = 64.0;

/// Slides a square across a static backdrop, one step per frame.
struct SweepApplication {
    frames: usize,
    built: usize,
    backdrop: Option<Arc<compositor::Picture>>,
}

impl SweepApplication {
    fn new(frames: usize) -> Self {
        Self {
            frames,
            built: 0,
            backdrop: None,
        }
    }

    fn backdrop(&mut self, size: ISize) -> Arc<compositor::Picture> {
        let bounds = Rect::from_size(size);
        let stale = self
            .backdrop
            .as_ref()
            .is_none_or(|backdrop| backdrop.cull_rect() != bounds);
        if stale {
            let mut recorder = PictureRecorder::begin_recording(bounds);
            recorder.draw_rect(bounds, Color::from_argb(0xFF, 0x20, 0x24, 0x30));
            let stripe_height = bounds.height() / 8.0;
            for stripe in (0..8).step_by(2) {
                let top = stripe as f32 * stripe_height;
                recorder.draw_rect(
                    Rect::from_xywh(0.0, top, bounds.width(), stripe_height),
                    Color::from_argb(0xFF, 0x30, 0x36, 0x48),
                );
            }
            self.backdrop = Some(recorder.finish_recording_as_picture());
        }
        self.backdrop.clone().unwrap_or_else(|| compositor::Picture::placeholder(bounds))
    }
}

impl Application for SweepApplication {
    fn launch(&mut self, entrypoint: &str, initial_route: Option<&str>, asset_manager: &Arc<AssetManager>) -> bool {
        tracing::info!(
            entrypoint,
            initial_route,
            asset_resolvers = asset_manager.resolver_count(),
            "application launched"
        );
        true
    }

    fn begin_frame(&mut self, frame: &mut FrameContext<'_>) -> Option<LayerTree> {
        let frame_size = frame.viewport_metrics.frame_size();
        if frame_size.is_empty() {
            return None;
        }
        let backdrop = self.backdrop(frame_size);

        let travel = (frame_size.width as f32 - SQUARE_SIZE).max(0.0);
        let progress = self.built as f32 / self.frames.max(1) as f32;
        let mut square = PictureRecorder::begin_recording(Rect::from_wh(SQUARE_SIZE, SQUARE_SIZE));
        square.draw_rect(Rect::from_wh(SQUARE_SIZE, SQUARE_SIZE), Color::from_argb(0xFF, 0xF0, 0x90, 0x20));
        let mut moving = TransformLayer::new(Matrix::translate(travel * progress, 0.0));
        moving.add(PictureLayer::new(
            Point::new(0.0, (frame_size.height as f32 - SQUARE_SIZE) / 2.0),
            square.finish_recording_as_picture(),
            false,
            true,
        ));

        let mut root = TransformLayer::new(Matrix::IDENTITY);
        root.add(PictureLayer::new(Point::new(0.0, 0.0), backdrop, true, false));
        root.add(moving);
        let mut layer_tree = LayerTree::new(frame_size, frame.viewport_metrics.device_pixel_ratio as f32);
        layer_tree.set_root_layer(root);

        self.built += 1;
        if self.built < self.frames {
            frame.schedule_frame();
        }
        Some(layer_tree)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = SettingsArgs::parse();
    let (timings, timing_events) = crossbeam_channel::unbounded::<FrameTiming>();
    let mut settings = args.to_settings();
    settings.frame_rasterized_callback = Some(Arc::new(move |timing: &FrameTiming| {
        let _ = timings.send(*timing);
    }));
    settings.report_timings_callback = Some(Arc::new(|batch: &[i64]| {
        tracing::debug!(frames = batch.len() / FrameTimingPhase::COUNT, "frame timings reported");
    }));

    let task_queues = Arc::new(TaskQueues::new());
    let thread_host =
        ThreadHost::new(&task_queues, &settings.log_tag, ThreadHostType::all()).context("spawn shell threads")?;
    let task_runners = TaskRunners::try_new(
        settings.log_tag.clone(),
        thread_host.platform_thread.as_ref().map(Thread::task_runner),
        thread_host.ui_thread.as_ref().map(Thread::task_runner),
        thread_host.raster_thread.as_ref().map(Thread::task_runner),
        thread_host.io_thread.as_ref().map(Thread::task_runner),
    )?;
    let process_context = ProcessContext::from_settings(Arc::clone(&task_queues), &settings);

    let run_configuration = RunConfiguration::infer_from_settings(&settings);
    let platform_view = SoftwarePlatformView::new(settings.gpu_backend);
    let shell = Shell::create(
        process_context,
        task_runners,
        settings,
        Box::new(platform_view),
        Box::new(SweepApplication::new(args.frames)),
    )?;

    let run_status = shell.run_engine(run_configuration)?;
    if run_status != RunStatus::Success {
        bail!("engine did not start: {run_status:?}");
    }
    shell.notify_created()?;
    shell.set_viewport_metrics(args.viewport_metrics());

    for frame in 0..args.frames {
        let timing = timing_events
            .recv_timeout(FRAME_TIMEOUT)
            .with_context(|| format!("frame {frame} was not rasterized in time"))?;
        let raster_micros =
            timing.get(FrameTimingPhase::RasterFinish).as_micros() - timing.get(FrameTimingPhase::RasterStart).as_micros();
        tracing::debug!(frame, raster_micros, "frame rasterized");
    }

    let estimate = shell.handle_service_protocol_message(ESTIMATE_RASTER_CACHE_MEMORY_METHOD, &HashMap::new())?;
    tracing::info!(estimate = %estimate.to_json()?, "raster cache");

    if let Some(path) = args.screenshot.as_ref() {
        let screenshot = shell.screenshot(ScreenshotType::CompressedImage, false)?;
        let data = screenshot.data.context("no frame to screenshot")?;
        std::fs::write(path, data).with_context(|| format!("write screenshot to {}", path.display()))?;
        tracing::info!(path = %path.display(), frame_size = ?screenshot.frame_size, "screenshot written");
    }

    shell.notify_destroyed()?;
    drop(shell);
    drop(thread_host);
    Ok(())
}
