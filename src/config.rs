//! Runtime configuration — fixed at initialization
//!
//! Table capacity, per-thread stack size, tick period and preemption mode.
//! Nothing here can change once a runtime is running.
//!
//! Author: Moroya Sakamoto

use core::time::Duration;

use crate::error::{Error, Result};

/// Default number of thread slots, bootstrap included
pub const DEFAULT_CAPACITY: usize = 10;

/// Default stack size of each green thread (4 MiB)
pub const DEFAULT_STACK_SIZE: usize = 0x40_0000;

/// Smallest stack accepted
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Default tick period
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Source of preemption ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preemption {
    /// No ticks; threads switch only at explicit suspension points
    Disabled,
    /// Ticks are delivered synchronously when the scheduler idles
    /// or when [`crate::tick`] is called
    Simulated,
    /// `SIGALRM` from a per-thread interval timer (Linux)
    Signal,
}

impl Preemption {
    /// Does this mode deliver ticks at all?
    pub fn is_enabled(self) -> bool {
        self != Preemption::Disabled
    }
}

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of thread slots, bootstrap thread included
    pub capacity: usize,
    /// Stack size of each created thread in bytes
    pub stack_size: usize,
    /// Time between two ticks
    pub tick_period: Duration,
    /// Tick source
    pub preemption: Preemption,
}

impl Config {
    /// Defaults: 10 slots, 4 MiB stacks, 10 ms ticks, signal preemption
    /// when compiled in
    pub const fn new() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stack_size: DEFAULT_STACK_SIZE,
            tick_period: DEFAULT_TICK_PERIOD,
            preemption: default_preemption(),
        }
    }

    /// Purely cooperative scheduling
    pub const fn cooperative() -> Self {
        Self::new().with_preemption(Preemption::Disabled)
    }

    /// Configuration for testing (simulated ticks, small stacks)
    pub const fn testing() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stack_size: 256 * 1024,
            tick_period: Duration::from_millis(1),
            preemption: Preemption::Simulated,
        }
    }

    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub const fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub const fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub const fn with_preemption(mut self, preemption: Preemption) -> Self {
        self.preemption = preemption;
        self
    }

    /// Reject configurations the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("capacity must hold the bootstrap thread"));
        }
        if self.stack_size < MIN_STACK_SIZE {
            return Err(Error::InvalidConfig("stack size below MIN_STACK_SIZE"));
        }
        if self.preemption.is_enabled() && self.tick_period.is_zero() {
            return Err(Error::InvalidConfig("tick period must be non-zero"));
        }
        if self.preemption == Preemption::Signal && !cfg!(all(feature = "signal", target_os = "linux")) {
            return Err(Error::PreemptionUnavailable);
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

const fn default_preemption() -> Preemption {
    if cfg!(all(feature = "signal", target_os = "linux")) {
        Preemption::Signal
    } else {
        Preemption::Disabled
    }
}
