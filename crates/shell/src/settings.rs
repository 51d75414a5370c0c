use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use compositor::{DEFAULT_ACCESS_THRESHOLD, GpuBackend};

use crate::frame_timing::FrameTiming;
use crate::viewport_metrics::ViewportMetrics;

pub type FrameRasterizedCallback = Arc<dyn Fn(&FrameTiming) + Send + Sync>;
pub type ReportTimingsCallback = Arc<dyn Fn(&[i64]) + Send + Sync>;
pub type MetricsChangedCallback = Arc<dyn Fn(&ViewportMetrics) + Send + Sync>;

/// Frame timings are flushed at least this often, so the last frames of an
/// animation are not held back until the next one starts.
pub fn default_frame_timings_report_interval() -> Duration {
    if cfg!(debug_assertions) {
        Duration::from_millis(100)
    } else {
        Duration::from_secs(1)
    }
}

#[derive(Clone)]
pub struct Settings {
    pub assets_path: Option<PathBuf>,
    pub cache_directory: Option<PathBuf>,
    pub cache_sksl: bool,
    pub persistent_cache_read_only: bool,
    pub raster_cache_access_threshold: usize,
    pub gpu_backend: GpuBackend,
    pub log_tag: String,
    pub frame_timings_report_interval: Duration,
    /// Invoked on the raster context for every frame that reached the surface.
    pub frame_rasterized_callback: Option<FrameRasterizedCallback>,
    /// Invoked on the UI context with batches of flattened frame timings.
    pub report_timings_callback: Option<ReportTimingsCallback>,
    /// Invoked on the UI context whenever the engine accepts new metrics.
    pub metrics_changed_callback: Option<MetricsChangedCallback>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            assets_path: None,
            cache_directory: None,
            cache_sksl: false,
            persistent_cache_read_only: false,
            raster_cache_access_threshold: DEFAULT_ACCESS_THRESHOLD,
            gpu_backend: GpuBackend::Software,
            log_tag: "shell".to_owned(),
            frame_timings_report_interval: default_frame_timings_report_interval(),
            frame_rasterized_callback: None,
            report_timings_callback: None,
            metrics_changed_callback: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("assets_path", &self.assets_path)
            .field("cache_directory", &self.cache_directory)
            .field("cache_sksl", &self.cache_sksl)
            .field("persistent_cache_read_only", &self.persistent_cache_read_only)
            .field("raster_cache_access_threshold", &self.raster_cache_access_threshold)
            .field("gpu_backend", &self.gpu_backend)
            .field("log_tag", &self.log_tag)
            .field("frame_timings_report_interval", &self.frame_timings_report_interval)
            .field("frame_rasterized_callback", &self.frame_rasterized_callback.is_some())
            .field("report_timings_callback", &self.report_timings_callback.is_some())
            .field("metrics_changed_callback", &self.metrics_changed_callback.is_some())
            .finish()
    }
}

/// Command line flags that map onto [`Settings`].
#[derive(Debug, Clone, Parser)]
#[command(name = "shell", about = "Runs the frame pipeline against a software surface")]
pub struct SettingsArgs {
    /// Directory served as the asset bundle.
    #[arg(long)]
    pub assets_path: Option<PathBuf>,
    /// Base directory of the persistent shader cache.
    #[arg(long)]
    pub cache_directory: Option<PathBuf>,
    #[arg(long)]
    pub cache_sksl: bool,
    #[arg(long)]
    pub read_only_cache: bool,
    /// Prepares a picture needs before it is rasterized into the cache; 0 disables picture caching.
    #[arg(long, default_value_t = DEFAULT_ACCESS_THRESHOLD)]
    pub raster_cache_access_threshold: usize,
    /// software, gl, vulkan or metal.
    #[arg(long, default_value = "software")]
    pub gpu_backend: GpuBackend,
    #[arg(long, default_value = "shell")]
    pub log_tag: String,
    /// Maximum delay before pending frame timings are reported, in milliseconds.
    #[arg(long)]
    pub frame_timings_report_interval_ms: Option<u64>,
    /// Number of frames the demo renders.
    #[arg(long, default_value_t = 60)]
    pub frames: usize,
    /// Where the demo writes its final screenshot.
    #[arg(long)]
    pub screenshot: Option<PathBuf>,
    #[arg(long, default_value_t = 640.0)]
    pub width: f64,
    #[arg(long, default_value_t = 480.0)]
    pub height: f64,
    #[arg(long, default_value_t = 1.0)]
    pub device_pixel_ratio: f64,
}

impl SettingsArgs {
    pub fn to_settings(&self) -> Settings {
        Settings {
            assets_path: self.assets_path.clone(),
            cache_directory: self.cache_directory.clone(),
            cache_sksl: self.cache_sksl,
            persistent_cache_read_only: self.read_only_cache,
            raster_cache_access_threshold: self.raster_cache_access_threshold,
            gpu_backend: self.gpu_backend,
            log_tag: self.log_tag.clone(),
            frame_timings_report_interval: self
                .frame_timings_report_interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(default_frame_timings_report_interval),
            ..Settings::default()
        }
    }

    pub fn viewport_metrics(&self) -> ViewportMetrics {
        ViewportMetrics::new(self.device_pixel_ratio, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_maps_onto_settings() {
        let args = SettingsArgs::try_parse_from([
            "shell",
            "--cache-directory",
            "/tmp/cache",
            "--cache-sksl",
            "--gpu-backend",
            "vulkan",
            "--raster-cache-access-threshold",
            "0",
            "--frame-timings-report-interval-ms",
            "250",
        ])
        .expect("parse args");
        let settings = args.to_settings();

        assert_eq!(settings.cache_directory, Some(PathBuf::from("/tmp/cache")));
        assert!(settings.cache_sksl);
        assert!(!settings.persistent_cache_read_only);
        assert_eq!(settings.gpu_backend, GpuBackend::Vulkan);
        assert_eq!(settings.raster_cache_access_threshold, 0);
        assert_eq!(settings.frame_timings_report_interval, Duration::from_millis(250));
        assert_eq!(args.frames, 60);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(SettingsArgs::try_parse_from(["shell", "--gpu-backend", "directx"]).is_err());
    }
}
