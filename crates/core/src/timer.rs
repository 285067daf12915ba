//! High-resolution timer for frame timing.

use std::time::{Duration, Instant};

/// High-resolution timer for measuring elapsed and per-frame time.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    last_delta: Duration,
    ticks: u64,
}

impl Timer {
    /// Create a new timer, starting from now.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            last_delta: Duration::ZERO,
            ticks: 0,
        }
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Advance the timer by one frame and return the time since the last tick.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        self.last_delta = now - self.last_tick;
        self.last_tick = now;
        self.ticks += 1;
        self.last_delta
    }

    /// Delta of the most recent [`tick`](Self::tick), in seconds.
    pub fn delta_secs(&self) -> f32 {
        self.last_delta.as_secs_f32()
    }

    /// Number of ticks since creation or the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
        self.last_delta = Duration::ZERO;
        self.ticks = 0;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_counts_and_records_delta() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert_eq!(timer.ticks(), 1);
        assert!((timer.delta_secs() - delta.as_secs_f32()).abs() < f32::EPSILON);
    }

    #[test]
    fn test_reset_clears_ticks() {
        let mut timer = Timer::new();
        timer.tick();
        timer.tick();
        timer.reset();
        assert_eq!(timer.ticks(), 0);
        assert_eq!(timer.delta_secs(), 0.0);
    }
}
