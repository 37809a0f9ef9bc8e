//! Time utilities for the tick simulation

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// One fixed-interval simulation step
pub type Tick = u64;

/// Default simulation rate
pub const DEFAULT_TICK_RATE: u32 = 60; // 60 ticks per second
/// Default snapshot broadcast rate
pub const DEFAULT_SNAPSHOT_RATE: u32 = 20; // 20 snapshots per second

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Convert a wall duration into whole ticks at `tick_rate`, rounding to nearest
pub fn ticks_for(duration: Duration, tick_rate: u32) -> u64 {
    let micros = duration.as_micros();
    ((micros * u128::from(tick_rate) + 500_000) / 1_000_000) as u64
}

/// Duration of a single tick at `tick_rate`
pub fn tick_interval(tick_rate: u32) -> Duration {
    Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)))
}

/// Monotonic simulation tick counter.
///
/// The host loop owns scheduling and calls [`TickClock::advance`] exactly once
/// per fixed step; nothing here reads the wall clock.
#[derive(Debug, Clone)]
pub struct TickClock {
    tick: Tick,
    tick_rate: u32,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            tick_rate: tick_rate.max(1),
        }
    }

    /// Clock already positioned at `tick` (clients joining a running session)
    pub fn starting_at(tick_rate: u32, tick: Tick) -> Self {
        Self {
            tick,
            tick_rate: tick_rate.max(1),
        }
    }

    pub fn current(&self) -> Tick {
        self.tick
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Advance one step and return the new tick
    pub fn advance(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }

    /// Wall duration of one tick
    pub fn tick_interval(&self) -> Duration {
        tick_interval(self.tick_rate)
    }

    /// Seconds per tick, for integration
    pub fn tick_delta(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn ticks_for(&self, duration: Duration) -> u64 {
        ticks_for(duration, self.tick_rate)
    }

    /// Timer expiring `duration` from the current tick
    pub fn create_timer(&self, duration: Duration) -> Timer {
        Timer::at(self.tick + self.ticks_for(duration))
    }

    /// Timer expiring `ticks` from the current tick
    pub fn timer_in_ticks(&self, ticks: u64) -> Timer {
        Timer::at(self.tick + ticks)
    }

    pub fn remaining(&self, timer: &Timer) -> Option<Duration> {
        timer.remaining(self.tick, self.tick_rate)
    }

    /// Back to tick zero (session teardown)
    pub fn reset(&mut self) {
        self.tick = 0;
    }
}

/// A countdown keyed to a target tick.
///
/// [`Timer::NONE`] is inert: it reports expired so nothing ever blocks on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    target: Option<Tick>,
}

impl Timer {
    pub const NONE: Timer = Timer { target: None };

    pub fn at(target: Tick) -> Self {
        Self {
            target: Some(target),
        }
    }

    pub fn target_tick(&self) -> Option<Tick> {
        self.target
    }

    /// True when the timer was set (it may already be expired)
    pub fn is_set(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_expired(&self, current: Tick) -> bool {
        match self.target {
            Some(target) => current >= target,
            None => true,
        }
    }

    /// Whole ticks left, `None` once expired or inert
    pub fn remaining_ticks(&self, current: Tick) -> Option<u64> {
        match self.target {
            Some(target) if current < target => Some(target - current),
            _ => None,
        }
    }

    pub fn remaining(&self, current: Tick, tick_rate: u32) -> Option<Duration> {
        self.remaining_ticks(current)
            .map(|ticks| Duration::from_micros(ticks * 1_000_000 / u64::from(tick_rate.max(1))))
    }
}

/// A simple wall-clock stopwatch for measuring tick cost
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic_and_returns_new_tick() {
        let mut clock = TickClock::new(60);
        assert_eq!(clock.current(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current(), 2);
    }

    #[test]
    fn timer_targets_duration_in_ticks() {
        let mut clock = TickClock::new(60);
        clock.advance();
        let timer = clock.create_timer(Duration::from_secs(15));
        assert_eq!(timer.target_tick(), Some(901));
        assert!(!timer.is_expired(900));
        assert!(timer.is_expired(901));
        assert!(timer.is_expired(5000));
    }

    #[test]
    fn inert_timer_reads_as_expired() {
        assert!(Timer::NONE.is_expired(0));
        assert!(!Timer::NONE.is_set());
        assert_eq!(Timer::NONE.remaining(0, 60), None);
        assert_eq!(Timer::default(), Timer::NONE);
    }

    #[test]
    fn remaining_scales_by_tick_interval() {
        let timer = Timer::at(120);
        assert_eq!(timer.remaining_ticks(60), Some(60));
        assert_eq!(timer.remaining(60, 50), Some(Duration::from_millis(1200)));
        assert_eq!(timer.remaining(120, 60), None);
    }

    #[test]
    fn ticks_for_rounds_to_nearest() {
        assert_eq!(ticks_for(Duration::from_secs(120), 60), 7200);
        assert_eq!(ticks_for(Duration::from_millis(25), 60), 2);
        assert_eq!(ticks_for(Duration::ZERO, 60), 0);
    }
}
