//! UI-context half of the shell: owns the application, its viewport metrics
//! and assets, and drives the animator.

use std::path::Path;
use std::sync::{Arc, Weak};

use assets::{AssetManager, DirectoryAssetBundle};
use compositor::LayerTree;

use crate::animator::Animator;
use crate::frame_timing::TimePoint;
use crate::platform_message::{LIFECYCLE_CHANNEL, PlatformMessage};
use crate::settings::{MetricsChangedCallback, ReportTimingsCallback, Settings};
use crate::viewport_metrics::ViewportMetrics;

pub const DEFAULT_ENTRYPOINT: &str = "main";

pub trait EngineDelegate: Send + Sync {
    /// A message the application sent towards the platform.
    fn on_engine_handle_platform_message(&self, message: PlatformMessage);
}

/// Per-frame view the application builds its scene against.
pub struct FrameContext<'a> {
    pub frame_target_time: TimePoint,
    pub frame_number: u64,
    pub viewport_metrics: &'a ViewportMetrics,
    pub asset_manager: Option<&'a Arc<AssetManager>>,
    schedule_frame: bool,
    outgoing_messages: Vec<PlatformMessage>,
}

impl FrameContext<'_> {
    /// Requests another frame after this one, e.g. to keep an animation going.
    pub fn schedule_frame(&mut self) {
        self.schedule_frame = true;
    }

    pub fn send_platform_message(&mut self, message: PlatformMessage) {
        self.outgoing_messages.push(message);
    }
}

/// The code that produces scenes. Runs on the UI context only.
pub trait Application: Send {
    fn launch(
        &mut self,
        _entrypoint: &str,
        _initial_route: Option<&str>,
        _asset_manager: &Arc<AssetManager>,
    ) -> bool {
        true
    }

    /// Builds the scene for one frame. `None` renders nothing this frame.
    fn begin_frame(&mut self, frame: &mut FrameContext<'_>) -> Option<LayerTree>;

    fn on_viewport_metrics_changed(&mut self, _metrics: &ViewportMetrics) {}

    fn on_lifecycle_state_changed(&mut self, _state: &str) {}

    fn on_platform_message(&mut self, message: PlatformMessage) {
        message.respond_empty();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    FailureAlreadyRunning,
    Failure,
}

#[derive(Clone)]
pub struct RunConfiguration {
    entrypoint: String,
    initial_route: Option<String>,
    asset_manager: Arc<AssetManager>,
}

impl RunConfiguration {
    pub fn new(entrypoint: impl Into<String>, asset_manager: Arc<AssetManager>) -> Self {
        Self {
            entrypoint: entrypoint.into(),
            initial_route: None,
            asset_manager,
        }
    }

    pub fn with_initial_route(mut self, initial_route: impl Into<String>) -> Self {
        self.initial_route = Some(initial_route.into());
        self
    }

    /// Default entrypoint over the settings' asset directory, if any.
    pub fn infer_from_settings(settings: &Settings) -> Self {
        let asset_manager = Arc::new(AssetManager::new());
        if let Some(assets_path) = settings.assets_path.as_deref() {
            push_directory_bundle(&asset_manager, assets_path);
        }
        Self::new(DEFAULT_ENTRYPOINT, asset_manager)
    }

    pub fn entrypoint(&self) -> &str {
        &self.entrypoint
    }

    pub fn initial_route(&self) -> Option<&str> {
        self.initial_route.as_deref()
    }

    pub fn asset_manager(&self) -> &Arc<AssetManager> {
        &self.asset_manager
    }

    pub fn is_valid(&self) -> bool {
        !self.entrypoint.is_empty()
    }
}

fn push_directory_bundle(asset_manager: &AssetManager, path: &Path) {
    if !asset_manager.push_back(Box::new(DirectoryAssetBundle::new(path, true))) {
        tracing::warn!(path = %path.display(), "asset directory is not usable");
    }
}

pub struct Engine {
    delegate: Weak<dyn EngineDelegate>,
    application: Box<dyn Application>,
    animator: Arc<Animator>,
    viewport_metrics: ViewportMetrics,
    asset_manager: Option<Arc<AssetManager>>,
    metrics_changed_callback: Option<MetricsChangedCallback>,
    report_timings_callback: Option<ReportTimingsCallback>,
    running: bool,
    have_surface: bool,
    activity_running: bool,
}

impl Engine {
    pub fn new(
        delegate: Weak<dyn EngineDelegate>,
        animator: Arc<Animator>,
        application: Box<dyn Application>,
        settings: &Settings,
    ) -> Self {
        Self {
            delegate,
            application,
            animator,
            viewport_metrics: ViewportMetrics::default(),
            asset_manager: None,
            metrics_changed_callback: settings.metrics_changed_callback.clone(),
            report_timings_callback: settings.report_timings_callback.clone(),
            running: false,
            have_surface: false,
            activity_running: true,
        }
    }

    pub fn animator(&self) -> Arc<Animator> {
        Arc::clone(&self.animator)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    #[tracing::instrument(skip_all, fields(entrypoint = configuration.entrypoint()))]
    pub fn run(&mut self, configuration: RunConfiguration) -> RunStatus {
        if !configuration.is_valid() {
            tracing::error!("engine run configuration was invalid");
            return RunStatus::Failure;
        }
        if self.running {
            return RunStatus::FailureAlreadyRunning;
        }
        let RunConfiguration {
            entrypoint,
            initial_route,
            asset_manager,
        } = configuration;
        self.update_asset_manager(Arc::clone(&asset_manager));
        if !self
            .application
            .launch(&entrypoint, initial_route.as_deref(), &asset_manager)
        {
            tracing::error!("application failed to launch");
            return RunStatus::Failure;
        }
        self.running = true;
        self.start_animator_if_possible();
        RunStatus::Success
    }

    pub fn viewport_metrics(&self) -> ViewportMetrics {
        self.viewport_metrics
    }

    pub fn set_viewport_metrics(&mut self, metrics: ViewportMetrics) {
        let dimensions_changed = self.viewport_metrics.dimensions_differ(&metrics);
        self.viewport_metrics = metrics;
        self.application.on_viewport_metrics_changed(&metrics);
        if let Some(callback) = self.metrics_changed_callback.as_ref() {
            callback(&metrics);
        }
        if dimensions_changed {
            self.animator.set_dimension_change_pending();
        }
        if self.have_surface {
            self.schedule_frame(true);
        }
    }

    /// Lets the application build the frame and renders what it produced.
    pub fn begin_frame(&mut self, frame_target_time: TimePoint, frame_number: u64) {
        let mut frame = FrameContext {
            frame_target_time,
            frame_number,
            viewport_metrics: &self.viewport_metrics,
            asset_manager: self.asset_manager.as_ref(),
            schedule_frame: false,
            outgoing_messages: Vec::new(),
        };
        let layer_tree = self.application.begin_frame(&mut frame);
        let FrameContext {
            schedule_frame,
            outgoing_messages,
            ..
        } = frame;

        for message in outgoing_messages {
            self.handle_platform_message(message);
        }
        if let Some(layer_tree) = layer_tree {
            self.render(layer_tree);
        }
        if schedule_frame {
            self.schedule_frame(true);
        }
    }

    pub fn render(&mut self, layer_tree: LayerTree) {
        if layer_tree.frame_size().is_empty() || layer_tree.device_pixel_ratio() <= 0.0 {
            tracing::debug!(frame_size = ?layer_tree.frame_size(), "dropping layer tree without a drawable size");
            return;
        }
        self.animator.render(layer_tree);
    }

    pub fn schedule_frame(&self, regenerate_layer_tree: bool) {
        self.animator.request_frame(regenerate_layer_tree);
    }

    pub fn on_output_surface_created(&mut self) {
        self.have_surface = true;
        self.start_animator_if_possible();
        self.schedule_frame(true);
    }

    pub fn on_output_surface_destroyed(&mut self) {
        self.have_surface = false;
        self.animator.stop();
    }

    fn start_animator_if_possible(&self) {
        if self.activity_running && self.have_surface {
            self.animator.start();
        }
    }

    /// A message from the platform to the application.
    pub fn dispatch_platform_message(&mut self, message: PlatformMessage) {
        if message.channel() == LIFECYCLE_CHANNEL {
            let state = String::from_utf8_lossy(message.data()).into_owned();
            self.handle_lifecycle_state(&state);
        }
        self.application.on_platform_message(message);
    }

    fn handle_lifecycle_state(&mut self, state: &str) {
        match state {
            "paused" | "detached" => {
                self.activity_running = false;
                self.animator.stop();
            }
            "resumed" | "inactive" => {
                self.activity_running = true;
                self.start_animator_if_possible();
            }
            other => tracing::debug!(state = other, "unknown lifecycle state"),
        }
        if state == "resumed" && self.have_surface {
            self.schedule_frame(true);
        }
        self.application.on_lifecycle_state_changed(state);
    }

    /// A message from the application to the platform.
    pub fn handle_platform_message(&self, message: PlatformMessage) {
        match self.delegate.upgrade() {
            Some(delegate) => delegate.on_engine_handle_platform_message(message),
            None => message.respond_empty(),
        }
    }

    pub fn report_timings(&self, timings: Vec<i64>) {
        if let Some(callback) = self.report_timings_callback.as_ref() {
            callback(&timings);
        }
    }

    pub fn needs_report_timings(&self) -> bool {
        self.report_timings_callback.is_some()
    }

    pub fn asset_manager(&self) -> Option<Arc<AssetManager>> {
        self.asset_manager.clone()
    }

    /// Returns `false` when `asset_manager` is already in use.
    pub fn update_asset_manager(&mut self, asset_manager: Arc<AssetManager>) -> bool {
        if self
            .asset_manager
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &asset_manager))
        {
            return false;
        }
        self.asset_manager = Some(asset_manager);
        true
    }
}
