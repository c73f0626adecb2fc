//! Tick Clock
//!
//! All waiting in the handshake (engagement accumulation, the protection
//! window) is tick counting. The clock hands out one `TickContext` per frame.

use serde::{Serialize, Deserialize};

/// Timing information for a single tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickContext {
    /// Monotonic tick number
    pub tick: u64,
    /// Seconds since the clock started
    pub now: f64,
    /// Frame interval in seconds
    pub dt: f32,
}

/// Fixed-rate tick clock.
#[derive(Clone, Debug)]
pub struct TickClock {
    tick: u64,
    tick_rate: u32,
    dt: f32,
    start: f64,
}

impl TickClock {
    /// Create a clock running at `tick_rate` Hz, starting at t = 0.
    pub fn new(tick_rate: u32) -> Self {
        Self::starting_at(tick_rate, 0.0)
    }

    /// Create a clock whose tick 0 is at `start` seconds.
    pub fn starting_at(tick_rate: u32, start: f64) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick: 0,
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            start,
        }
    }

    /// Context for the current tick.
    pub fn context(&self) -> TickContext {
        TickContext {
            tick: self.tick,
            now: self.now(),
            dt: self.dt,
        }
    }

    /// Advance one tick and return the new context.
    pub fn advance(&mut self) -> TickContext {
        self.tick += 1;
        self.context()
    }

    /// Skip ahead by `seconds`, rounded up to whole ticks.
    pub fn skip_seconds(&mut self, seconds: f64) {
        self.tick += self.ticks_for(seconds);
    }

    /// Current time in seconds.
    ///
    /// Derived from the tick count rather than accumulated, so it never drifts.
    pub fn now(&self) -> f64 {
        self.start + self.tick as f64 / self.tick_rate as f64
    }

    /// Current tick number.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Frame interval in seconds.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Number of whole ticks covering `seconds`.
    pub fn ticks_for(&self, seconds: f64) -> u64 {
        // Absorb representation error so 0.1 s at 60 Hz is 6 ticks, not 7
        (seconds * self.tick_rate as f64 - 1e-9).ceil().max(0.0) as u64
    }
}
