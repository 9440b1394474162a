//! Rate limiting for high-frequency local input.
//!
//! [`SampleLimiter`] combines a leading-edge throttle (the first sample in
//! a window fires at once) with a trailing-edge debounce (the last sample
//! suppressed inside a window fires once the window has passed). Callers
//! pass the current [`Instant`] so behaviour is deterministic under test.

use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct SampleLimiter {
    interval: Duration,
    last_fire: Option<Instant>,
    pending: bool,
}

impl SampleLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fire: None,
            pending: false,
        }
    }

    /// Limiter allowing at most `hz` samples per second.
    pub fn from_hz(hz: f64) -> Self {
        let hz = if hz.is_finite() && hz > 0.0 { hz } else { 1.0 };
        Self::new(Duration::from_secs_f64(1.0 / hz))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn window_open(&self, now: Instant) -> bool {
        match self.last_fire {
            Some(last) => now.saturating_duration_since(last) < self.interval,
            None => false,
        }
    }

    /// Offer a sample. Returns `true` if the caller should act on it now;
    /// otherwise it is remembered for the trailing edge.
    pub fn sample(&mut self, now: Instant) -> bool {
        if self.window_open(now) {
            self.pending = true;
            return false;
        }
        self.last_fire = Some(now);
        self.pending = false;
        true
    }

    /// Trailing edge: `true` once if a suppressed sample is now due.
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.pending || self.window_open(now) {
            return false;
        }
        self.pending = false;
        self.last_fire = Some(now);
        true
    }

    /// Take the pending sample regardless of timing.
    pub fn flush(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn reset(&mut self) {
        self.last_fire = None;
        self.pending = false;
    }
}
