use std::time::{Duration, Instant};

use task_runner::TaskRunner;

use crate::frame_timing::{FrameTimingsRecorder, TimePoint};

pub type VsyncCallback = Box<dyn FnOnce(FrameTimingsRecorder) + Send>;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

/// Delivers the next vsync to a callback on the UI context.
pub trait VsyncWaiter: Send + Sync {
    fn async_wait_for_vsync(&self, callback: VsyncCallback);

    fn refresh_rate(&self) -> f64 {
        1.0 / DEFAULT_FRAME_INTERVAL.as_secs_f64()
    }
}

/// Timer-driven vsync snapped to a fixed interval grid.
pub struct VsyncWaiterFallback {
    ui_task_runner: TaskRunner,
    phase: Instant,
    interval: Duration,
}

impl VsyncWaiterFallback {
    pub fn new(ui_task_runner: TaskRunner) -> Self {
        Self::with_interval(ui_task_runner, DEFAULT_FRAME_INTERVAL)
    }

    pub fn with_interval(ui_task_runner: TaskRunner, interval: Duration) -> Self {
        Self {
            ui_task_runner,
            phase: Instant::now(),
            interval,
        }
    }

    fn next_tick(&self, now: Instant) -> Instant {
        let interval_nanos = self.interval.as_nanos().max(1);
        let since_phase = now.duration_since(self.phase).as_nanos();
        let remainder = since_phase % interval_nanos;
        let until_tick = u64::try_from(interval_nanos - remainder).unwrap_or(0);
        now + Duration::from_nanos(until_tick)
    }
}

impl VsyncWaiter for VsyncWaiterFallback {
    fn async_wait_for_vsync(&self, callback: VsyncCallback) {
        let frame_start = self.next_tick(Instant::now());
        let frame_target = frame_start + self.interval;
        self.ui_task_runner.post_task_for_time(
            move || {
                let mut recorder = FrameTimingsRecorder::new();
                recorder.record_vsync(TimePoint::from_instant(frame_start), TimePoint::from_instant(frame_target));
                callback(recorder);
            },
            frame_start,
        );
    }

    fn refresh_rate(&self) -> f64 {
        1.0 / self.interval.as_secs_f64()
    }
}
