//! Tick source — clock, signal timer and tick-masking critical sections
//!
//! Ticks come from a per-thread POSIX interval timer delivering `SIGALRM`
//! (Linux, `signal` feature) or are simulated in software. The scheduler
//! state is shared with the tick handler, so cooperative code touches it
//! only inside a [`CriticalSection`], which blocks the tick signal on the
//! calling OS thread.
//!
//! Author: Moroya Sakamoto

pub use signal::{unblock_ticks, CriticalSection, ErrnoGuard, SignalTimer};

/// Tick clock
///
/// Counts delivered ticks. Size: 16 bytes
#[derive(Debug, Clone, Default)]
pub struct TickClock {
    /// Ticks delivered
    ticks: u64,
    /// Expirations the signal timer reported as missed
    overruns: u64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            overruns: 0,
        }
    }

    /// Count one tick
    pub fn advance(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
    }

    /// Ticks delivered so far
    pub fn now(&self) -> u64 {
        self.ticks
    }

    pub fn record_overruns(&mut self, missed: u32) {
        self.overruns += u64::from(missed);
    }

    /// Missed expirations reported by the timer
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

#[cfg(all(feature = "signal", target_os = "linux"))]
mod signal {
    use core::time::Duration;
    use std::os::raw::c_int;
    use std::sync::OnceLock;

    use nix::sys::signal::{
        self, SaFlags, SigAction, SigEvent, SigHandler, SigSet, SigevNotify, SigmaskHow, Signal,
    };
    use nix::sys::time::TimeSpec;
    use nix::sys::timer::{Expiration, Timer, TimerSetTimeFlags};
    use nix::time::ClockId;
    use nix::unistd::gettid;

    use crate::error::Result;

    /// Signal carrying ticks
    pub const TICK_SIGNAL: Signal = Signal::SIGALRM;

    /// Process-wide handler installation, done once
    static HANDLER: OnceLock<nix::Result<()>> = OnceLock::new();

    fn tick_set() -> SigSet {
        let mut set = SigSet::empty();
        set.add(TICK_SIGNAL);
        set
    }

    fn install_handler(handler: extern "C" fn(c_int)) -> Result<()> {
        let result = HANDLER.get_or_init(|| {
            let action = SigAction::new(
                SigHandler::Handler(handler),
                SaFlags::SA_RESTART,
                SigSet::empty(),
            );
            // SAFETY: the handler only touches the runtime of the OS thread
            // it interrupts and returns at once on threads without one.
            unsafe { signal::sigaction(TICK_SIGNAL, &action) }.map(drop)
        });
        Ok((*result)?)
    }

    /// Interval timer delivering [`TICK_SIGNAL`] to the OS thread that
    /// created it. Deleted on drop.
    pub struct SignalTimer {
        timer: Timer,
    }

    impl SignalTimer {
        /// Install `handler` (first use in the process) and start ticking
        /// every `period` on the calling OS thread
        pub fn start(period: Duration, handler: extern "C" fn(c_int)) -> Result<Self> {
            install_handler(handler)?;
            let event = SigEvent::new(SigevNotify::SigevThreadId {
                signal: TICK_SIGNAL,
                thread_id: gettid().as_raw(),
                si_value: 0,
            });
            let mut timer = Timer::new(ClockId::CLOCK_MONOTONIC, event)?;
            timer.set(
                Expiration::Interval(TimeSpec::from(period)),
                TimerSetTimeFlags::empty(),
            )?;
            Ok(Self { timer })
        }

        /// Acknowledge a tick. The interval timer re-arms itself; what
        /// is left to collect is the number of expirations missed.
        pub fn rearm(&self) -> u32 {
            self.timer.overruns().max(0) as u32
        }
    }

    /// Let ticks through on this OS thread
    pub fn unblock_ticks() {
        // Cannot fail for a valid signal set.
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_UNBLOCK, Some(&tick_set()), None);
    }

    fn block_ticks() {
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&tick_set()), None);
    }

    /// Region with ticks blocked; restores the previous mask on drop
    pub struct CriticalSection {
        saved: Option<SigSet>,
    }

    impl CriticalSection {
        /// Block ticks when `mask_ticks` is set
        pub fn enter(mask_ticks: bool) -> Self {
            if !mask_ticks {
                return Self { saved: None };
            }
            let mut old = SigSet::empty();
            match signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&tick_set()), Some(&mut old)) {
                Ok(()) => Self { saved: Some(old) },
                Err(_) => Self { saved: None },
            }
        }

        /// Sleep for `period` with ticks let through, then block them again
        pub fn relax(&self, period: Duration) {
            if self.saved.is_some() {
                unblock_ticks();
                std::thread::sleep(period);
                block_ticks();
            } else {
                std::thread::sleep(period);
            }
        }
    }

    impl Drop for CriticalSection {
        fn drop(&mut self) {
            if let Some(old) = self.saved.take() {
                let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&old), None);
            }
        }
    }

    /// Keeps `errno` of the interrupted code intact across a tick handler,
    /// which may run other threads' system calls before it returns
    pub struct ErrnoGuard(c_int);

    impl ErrnoGuard {
        pub fn save() -> Self {
            // SAFETY: __errno_location returns this OS thread's errno slot.
            Self(unsafe { *nix::libc::__errno_location() })
        }
    }

    impl Drop for ErrnoGuard {
        fn drop(&mut self) {
            // SAFETY: as in `save`.
            unsafe { *nix::libc::__errno_location() = self.0 }
        }
    }
}

#[cfg(not(all(feature = "signal", target_os = "linux")))]
mod signal {
    use core::time::Duration;
    use std::os::raw::c_int;

    use crate::error::{Error, Result};

    /// Placeholder on builds without signal preemption
    pub struct SignalTimer {
        _private: (),
    }

    impl SignalTimer {
        pub fn start(_period: Duration, _handler: extern "C" fn(c_int)) -> Result<Self> {
            Err(Error::PreemptionUnavailable)
        }

        pub fn rearm(&self) -> u32 {
            0
        }
    }

    pub fn unblock_ticks() {}

    /// Nothing asynchronous to mask
    pub struct CriticalSection {
        _private: (),
    }

    impl CriticalSection {
        pub fn enter(_mask_ticks: bool) -> Self {
            Self { _private: () }
        }

        pub fn relax(&self, period: Duration) {
            std::thread::sleep(period);
        }
    }

    pub struct ErrnoGuard;

    impl ErrnoGuard {
        pub fn save() -> Self {
            ErrnoGuard
        }
    }
}
