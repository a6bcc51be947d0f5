//! Deterministic time system
//!
//! Fixed tick rate; scripts see the tick length as their frame delta.

use std::time::Duration;

/// Default simulation tick rate (60 Hz = 16.666ms per tick)
pub const TICK_RATE_HZ: u32 = 60;

/// Simulation time tracker
pub struct SimulationTime {
    tick_duration: Duration,
    tick_count: u64,
    accumulated_time: Duration,
}

impl SimulationTime {
    pub fn new() -> Self {
        Self::with_tick_rate(TICK_RATE_HZ)
    }

    /// A tick rate of zero is clamped to 1 Hz.
    pub fn with_tick_rate(hz: u32) -> Self {
        Self {
            tick_duration: Duration::from_secs(1) / hz.max(1),
            tick_count: 0,
            accumulated_time: Duration::ZERO,
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Frame delta handed to `onUpdate`, in seconds.
    pub fn delta_seconds(&self) -> f32 {
        self.tick_duration.as_secs_f32()
    }

    pub fn advance_tick(&mut self) {
        self.tick_count += 1;
        self.accumulated_time += self.tick_duration;
    }

    pub fn total_time(&self) -> Duration {
        self.accumulated_time
    }
}

impl Default for SimulationTime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_by_fixed_ticks() {
        let mut time = SimulationTime::with_tick_rate(50);
        time.advance_tick();
        time.advance_tick();
        assert_eq!(time.tick_count(), 2);
        assert_eq!(time.total_time(), Duration::from_millis(40));
        assert!((time.delta_seconds() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn zero_rate_is_clamped() {
        let time = SimulationTime::with_tick_rate(0);
        assert_eq!(time.delta_seconds(), 1.0);
    }
}
