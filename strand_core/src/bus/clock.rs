//! Bus clock: wall time or reproducible virtual time
//!
//! The whole runtime measures time against this clock. In virtual mode
//! every tick advances time by a fixed step, which makes peripheral
//! latencies, retry delays and timer behavior exactly reproducible in
//! tests.

use std::time::{Duration, Instant};

/// Clock driving the stack tick loop.
#[derive(Debug)]
pub struct BusClock {
    mode: ClockMode,
    tick: u64,
}

#[derive(Debug)]
enum ClockMode {
    /// Monotonic wall time measured from clock creation.
    Wall { start: Instant },
    /// Virtual time advanced by a fixed step per tick.
    Virtual { now_ns: u64, step_ns: u64 },
}

impl BusClock {
    /// Wall-time clock (production default).
    pub fn wall() -> Self {
        Self {
            mode: ClockMode::Wall {
                start: Instant::now(),
            },
            tick: 0,
        }
    }

    /// Virtual clock advancing `step` per tick.
    pub fn virtual_time(step: Duration) -> Self {
        Self {
            mode: ClockMode::Virtual {
                now_ns: 0,
                step_ns: step.as_nanos() as u64,
            },
            tick: 0,
        }
    }

    /// Current time in nanoseconds since clock start.
    pub fn now_ns(&self) -> u64 {
        match &self.mode {
            ClockMode::Wall { start } => start.elapsed().as_nanos() as u64,
            ClockMode::Virtual { now_ns, .. } => *now_ns,
        }
    }

    /// Current time as a [`Duration`] since clock start.
    pub fn now(&self) -> Duration {
        Duration::from_nanos(self.now_ns())
    }

    /// Current tick number.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance to the next tick, returning the new tick number.
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        if let ClockMode::Virtual { now_ns, step_ns } = &mut self.mode {
            *now_ns += *step_ns;
        }
        self.tick
    }
}
