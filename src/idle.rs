//! Idle sampling.
//!
//! Reports the tick of the last user input, whether a screensaver is running,
//! and the current tick. Ticks are free-running 32-bit millisecond counters.

pub mod x11;

use std::time::Instant;

use thiserror::Error;

use crate::domain::IdleSample;
use crate::domain::Tick;

pub use x11::X11IdleSampler;

/// Source of idle samples.
pub trait IdleSampler {
    /// Take a fresh sample from the host.
    fn sample(&mut self) -> Result<IdleSample, IdleSampleError>;

    /// Current tick, on the same counter as [`IdleSample::now_tick`].
    fn now_tick(&self) -> Tick;
}

/// Errors that can occur while sampling idle state.
#[derive(Error, Debug)]
pub enum IdleSampleError {
    #[error("Display connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Screensaver extension not available: {0}")]
    ExtensionMissing(String),

    #[error("Idle query failed: {0}")]
    QueryFailed(String),
}

/// Free-running millisecond counter.
///
/// Counts from an arbitrary offset and wraps at `u32::MAX`, like the host
/// tick counters the engine is written against.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    epoch: Instant,
    offset: Tick,
}

impl TickClock {
    /// Start a clock at tick 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Start a clock at the given tick.
    pub fn starting_at(offset: Tick) -> Self {
        Self {
            epoch: Instant::now(),
            offset,
        }
    }

    /// Current tick.
    #[allow(clippy::cast_possible_truncation)]
    pub fn now(&self) -> Tick {
        // Truncation is the wraparound.
        let elapsed = self.epoch.elapsed().as_millis() as u32;
        self.offset.wrapping_add(elapsed)
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::elapsed_ticks;

    #[test]
    fn test_tick_clock_starts_near_offset() {
        let clock = TickClock::starting_at(1_000);
        let now = clock.now();
        assert!(elapsed_ticks(1_000, now) < 1_000);
    }

    #[test]
    fn test_tick_clock_wraps() {
        let clock = TickClock::starting_at(Tick::MAX);
        std::thread::sleep(std::time::Duration::from_millis(5));
        let now = clock.now();
        // Past the boundary, so numerically small again.
        assert!(now < 1_000);
        assert!(elapsed_ticks(Tick::MAX, now) >= 5);
    }

    #[test]
    fn test_tick_clock_is_monotonic() {
        let clock = TickClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
