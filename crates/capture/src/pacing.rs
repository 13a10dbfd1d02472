use std::time::{Duration, Instant};

/// Fixed-cadence frame pacing.
///
/// Ticks are scheduled on a grid (`next += interval`) so small overruns do
/// not accumulate drift. When a tick is missed by more than a full interval
/// the grid is re-anchored at the current time instead of bursting to catch up.
pub struct FramePacer {
    interval: Duration,
    next_tick: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: f64) -> Self {
        let fps = if fps.is_finite() && fps > 0.0 { fps } else { 30.0 };
        Self {
            interval: Duration::from_secs_f64(1.0 / fps),
            next_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to sleep before the tick due at or after `now`, advancing
    /// the schedule.
    pub fn delay(&mut self, now: Instant) -> Duration {
        let target = self.next_tick.unwrap_or(now);
        if target > now {
            self.next_tick = Some(target + self.interval);
            return target - now;
        }
        let late = now - target;
        self.next_tick = Some(if late > self.interval {
            tracing::trace!(late = ?late, "Frame budget overrun, re-anchoring cadence");
            now + self.interval
        } else {
            target + self.interval
        });
        Duration::ZERO
    }

    pub fn wait(&mut self) {
        let delay = self.delay(Instant::now());
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}
