//! Per-frame phase timestamps.
//!
//! Monotonic phases are microseconds since a process-wide origin. The raster
//! finish wall time is microseconds since the Unix epoch.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static CLOCK_ORIGIN: OnceLock<Instant> = OnceLock::new();
static NEXT_FRAME_NUMBER: AtomicU64 = AtomicU64::new(1);

fn clock_origin() -> Instant {
    *CLOCK_ORIGIN.get_or_init(Instant::now)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimePoint(i64);

impl TimePoint {
    pub fn now() -> Self {
        Self::from_instant(Instant::now())
    }

    pub fn from_instant(instant: Instant) -> Self {
        let origin = clock_origin();
        let micros = if instant >= origin {
            i64::try_from(instant.duration_since(origin).as_micros()).unwrap_or(i64::MAX)
        } else {
            -i64::try_from(origin.duration_since(instant).as_micros()).unwrap_or(i64::MAX)
        };
        Self(micros)
    }

    pub fn wall_clock_now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| i64::try_from(since_epoch.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self(micros)
    }

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let micros = i64::try_from(duration.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameTimingPhase {
    VsyncStart,
    BuildStart,
    BuildFinish,
    RasterStart,
    RasterFinish,
    RasterFinishWallTime,
}

impl FrameTimingPhase {
    pub const COUNT: usize = 6;

    /// Phases in the order they happen.
    pub const PHASES: [FrameTimingPhase; Self::COUNT] = [
        FrameTimingPhase::VsyncStart,
        FrameTimingPhase::BuildStart,
        FrameTimingPhase::BuildFinish,
        FrameTimingPhase::RasterStart,
        FrameTimingPhase::RasterFinish,
        FrameTimingPhase::RasterFinishWallTime,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTiming {
    frame_number: u64,
    timestamps: [TimePoint; FrameTimingPhase::COUNT],
}

impl FrameTiming {
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn get(&self, phase: FrameTimingPhase) -> TimePoint {
        self.timestamps[phase.index()]
    }

    pub fn set(&mut self, phase: FrameTimingPhase, time: TimePoint) {
        self.timestamps[phase.index()] = time;
    }
}

/// Collects the phases of one frame as it moves from vsync to raster.
#[derive(Debug)]
pub struct FrameTimingsRecorder {
    timing: FrameTiming,
    vsync_target: TimePoint,
    raster_started: bool,
}

impl Default for FrameTimingsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameTimingsRecorder {
    pub fn new() -> Self {
        Self {
            timing: FrameTiming {
                frame_number: NEXT_FRAME_NUMBER.fetch_add(1, Ordering::Relaxed),
                ..FrameTiming::default()
            },
            vsync_target: TimePoint::default(),
            raster_started: false,
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.timing.frame_number
    }

    pub fn record_vsync(&mut self, vsync_start: TimePoint, vsync_target: TimePoint) {
        self.timing.set(FrameTimingPhase::VsyncStart, vsync_start);
        self.vsync_target = vsync_target;
    }

    pub fn record_build_start(&mut self, time: TimePoint) {
        self.timing.set(FrameTimingPhase::BuildStart, time);
    }

    pub fn record_build_end(&mut self, time: TimePoint) {
        self.timing.set(FrameTimingPhase::BuildFinish, time);
    }

    pub fn record_raster_start(&mut self, time: TimePoint) {
        self.timing.set(FrameTimingPhase::RasterStart, time);
        self.raster_started = true;
    }

    /// Stamps the raster finish phases and returns the completed timing.
    pub fn record_raster_end(&mut self) -> FrameTiming {
        debug_assert!(self.raster_started, "raster end recorded before raster start");
        self.timing.set(FrameTimingPhase::RasterFinish, TimePoint::now());
        self.timing
            .set(FrameTimingPhase::RasterFinishWallTime, TimePoint::wall_clock_now());
        self.timing
    }

    pub fn vsync_start(&self) -> TimePoint {
        self.timing.get(FrameTimingPhase::VsyncStart)
    }

    pub fn vsync_target(&self) -> TimePoint {
        self.vsync_target
    }

    pub fn build_start(&self) -> TimePoint {
        self.timing.get(FrameTimingPhase::BuildStart)
    }

    pub fn build_duration(&self) -> Duration {
        let start = self.timing.get(FrameTimingPhase::BuildStart).as_micros();
        let end = self.timing.get(FrameTimingPhase::BuildFinish).as_micros();
        Duration::from_micros(u64::try_from(end - start).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorder_fills_phases_in_order() {
        let begin = TimePoint::now();
        let mut recorder = FrameTimingsRecorder::new();
        recorder.record_vsync(TimePoint::now(), TimePoint::now().saturating_add(Duration::from_millis(16)));
        recorder.record_build_start(TimePoint::now());
        recorder.record_build_end(TimePoint::now());
        recorder.record_raster_start(TimePoint::now());
        let timing = recorder.record_raster_end();
        let end = TimePoint::now();

        let mut last = begin;
        for phase in FrameTimingPhase::PHASES {
            if phase == FrameTimingPhase::RasterFinishWallTime {
                continue;
            }
            let time = timing.get(phase);
            assert!(time >= last, "{phase:?} went backwards");
            assert!(time <= end);
            last = time;
        }
        assert!(timing.get(FrameTimingPhase::RasterFinishWallTime).as_micros() > end.as_micros());
    }

    #[test]
    fn frame_numbers_are_unique() {
        let first = FrameTimingsRecorder::new();
        let second = FrameTimingsRecorder::new();
        assert_ne!(first.frame_number(), second.frame_number());
    }
}
