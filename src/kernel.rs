//! Kernel — green-thread runtime state machine
//!
//! Combines scheduler + tick clock + tick source into the single state of
//! one runtime. Every operation that may switch threads takes the kernel
//! as a raw pointer: the flow that calls it is suspended mid-call and
//! other flows use the kernel in the meantime, so no reference to it may
//! live across a switch.
//!
//! Locking discipline: table accesses from cooperative code run inside a
//! [`CriticalSection`] (ticks masked); the tick handler runs with its own
//! signal blocked by the OS. Every switch therefore happens with ticks
//! masked, and every resumed flow restores the mask it saved.
//!
//! Author: Moroya Sakamoto

use core::ptr;
use std::cell::Cell;
use std::os::raw::c_int;
use std::panic;
use std::process;

use crate::config::{Config, Preemption};
use crate::context::{self, Context};
use crate::error::{Error, Result};
use crate::scheduler::{Scan, Scheduler};
use crate::snapshot::Snapshot;
use crate::stack::Stack;
use crate::thread::{Argument, Priority, ThreadFn, ThreadId, ThreadState};
use crate::timer::{self, CriticalSection, ErrnoGuard, SignalTimer, TickClock};

thread_local! {
    /// Kernel of the runtime installed on this OS thread
    static KERNEL: Cell<*mut Kernel> = const { Cell::new(ptr::null_mut()) };
}

/// Kernel installed on the calling OS thread, null if none
pub fn installed() -> *mut Kernel {
    KERNEL.with(|k| k.get())
}

/// Result of a yield
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YieldStatus {
    /// Another thread ran; the caller has been dispatched again
    Switched,
    /// No other thread exists
    Empty,
    /// Nothing Ready; the count of Blocked and Suspended threads
    NotReady(usize),
}

impl YieldStatus {
    /// Integer form: `1` switched, `0` empty, minus the waiting count
    pub fn code(self) -> isize {
        match self {
            YieldStatus::Switched => 1,
            YieldStatus::Empty => 0,
            YieldStatus::NotReady(n) => -(n as isize),
        }
    }

    pub fn switched(self) -> bool {
        self == YieldStatus::Switched
    }
}

/// Green-thread kernel
pub struct Kernel {
    /// Thread table and cursor
    pub scheduler: Scheduler,
    /// Delivered ticks
    pub clock: TickClock,
    config: Config,
    /// Armed signal timer (signal preemption only)
    timer: Option<SignalTimer>,
}

impl Kernel {
    /// Fresh kernel: bootstrap thread Running, every other slot Unused
    pub fn new(config: Config) -> Self {
        Self {
            scheduler: Scheduler::new(config.capacity),
            clock: TickClock::new(),
            timer: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn masks_ticks(&self) -> bool {
        self.config.preemption == Preemption::Signal
    }

    /// Enter a region where the tick handler cannot run
    pub fn critical(&self) -> CriticalSection {
        CriticalSection::enter(self.masks_ticks())
    }

    /// Register `this` as the calling OS thread's kernel and arm the
    /// tick source.
    ///
    /// # Safety
    ///
    /// `this` must point to a kernel that outlives its registration,
    /// i.e. until [`Kernel::uninstall`].
    pub unsafe fn install(this: *mut Kernel) -> Result<()> {
        if !installed().is_null() {
            return Err(Error::AlreadyInitialized);
        }
        let kernel = unsafe { &mut *this };
        let _cs = kernel.critical();
        KERNEL.with(|k| k.set(this));
        if kernel.config.preemption == Preemption::Signal {
            match SignalTimer::start(kernel.config.tick_period, on_tick_signal) {
                Ok(timer) => kernel.timer = Some(timer),
                Err(err) => {
                    KERNEL.with(|k| k.set(ptr::null_mut()));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Stop the tick source and unregister.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn uninstall(this: *mut Kernel) {
        let kernel = unsafe { &mut *this };
        let _cs = kernel.critical();
        kernel.timer = None;
        KERNEL.with(|k| k.set(ptr::null_mut()));
    }

    /// Bind `entry` to the first Unused slot. The thread starts Ready.
    pub fn create(
        &mut self,
        entry: ThreadFn,
        name: &str,
        argument: Option<Argument>,
        priority: u32,
    ) -> Result<ThreadId> {
        let priority = Priority::new(priority).ok_or(Error::InvalidPriority)?;
        let idx = self.scheduler.claim_slot()?;
        let stack_size = self.config.stack_size;
        let slot = self.scheduler.slot_mut(idx);

        // An exited thread leaves its stack behind for the next occupant
        let mut stack = match slot.stack.take() {
            Some(stack) if stack.size() == stack_size => stack,
            _ => Stack::new(stack_size)?,
        };
        let context = Context::prime(&mut stack, thread_start);
        slot.bind(name, Some(entry), argument, priority, context);
        slot.stack = Some(stack);

        log::debug!("created thread {idx} {name:?} (priority {})", priority.get());
        Ok(ThreadId::new(idx))
    }

    /// Dispatch the next Ready thread. Ticks must be masked.
    unsafe fn switch_next(this: *mut Kernel) -> YieldStatus {
        let (old, new) = {
            let kernel = unsafe { &mut *this };
            match kernel.scheduler.scan() {
                Scan::Exhausted { not_ready: 0 } => return YieldStatus::Empty,
                Scan::Exhausted { not_ready } => return YieldStatus::NotReady(not_ready),
                Scan::Ready(next) => kernel.scheduler.dispatch(next),
            }
        };
        // SAFETY: both contexts live in the fixed thread table; `new` was
        // saved by a switch or primed on the slot's stack.
        unsafe { context::switch(old, new) };
        YieldStatus::Switched
    }

    /// Yield to the next Ready thread.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn yield_now(this: *mut Kernel) -> YieldStatus {
        let _cs = unsafe { (*this).critical() };
        unsafe { Self::switch_next(this) }
    }

    /// One tick: acknowledge the source, charge the current thread, sweep
    /// the delay timers, preempt on an expired quantum. Ticks must be
    /// masked.
    unsafe fn on_tick(this: *mut Kernel) {
        let preempt = {
            let kernel = unsafe { &mut *this };
            if let Some(timer) = &kernel.timer {
                kernel.clock.record_overruns(timer.rearm());
            }
            kernel.clock.advance();
            let expired = kernel.scheduler.charge_tick();
            kernel.scheduler.sweep();
            expired
        };
        if preempt {
            unsafe { Self::switch_next(this) };
        }
    }

    /// Deliver one tick from the calling thread.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn tick(this: *mut Kernel) {
        let _cs = unsafe { (*this).critical() };
        unsafe { Self::on_tick(this) }
    }

    /// Wait one tick period for a delay timer to wake someone. Called with
    /// ticks masked when the current thread cannot run and nothing is
    /// Ready.
    unsafe fn idle_wait(this: *mut Kernel, cs: &CriticalSection) {
        let (preemption, period) = {
            let kernel = unsafe { &*this };
            if kernel.scheduler.blocked_count() == 0 {
                panic!(
                    "thread {} would wait forever: no thread is Ready or Blocked",
                    kernel.scheduler.current_id()
                );
            }
            (kernel.config.preemption, kernel.config.tick_period)
        };
        match preemption {
            Preemption::Simulated => unsafe { Self::on_tick(this) },
            Preemption::Signal => cs.relax(period),
            Preemption::Disabled => {
                panic!("every thread waits on a delay timer but no tick source is configured")
            }
        }
    }

    /// Give up the CPU until the current thread is dispatched again
    unsafe fn wait_dispatched(this: *mut Kernel, cs: &CriticalSection) {
        loop {
            {
                let kernel = unsafe { &mut *this };
                match kernel.scheduler.current().state() {
                    ThreadState::Running => return,
                    // Woken while idling as the cursor
                    ThreadState::Ready => {
                        kernel.scheduler.reclaim_current();
                        return;
                    }
                    _ => {}
                }
            }
            if !unsafe { Self::switch_next(this) }.switched() {
                unsafe { Self::idle_wait(this, cs) };
            }
        }
    }

    /// Block the current thread for `ticks` ticks.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn delay(this: *mut Kernel, ticks: u32) {
        let cs = unsafe { (*this).critical() };
        unsafe {
            (*this).scheduler.block_current(ticks);
            Self::wait_dispatched(this, &cs);
        }
    }

    /// Suspend `tid`; when that is the caller, wait for a resume.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn suspend(this: *mut Kernel, tid: ThreadId) -> Result<()> {
        let cs = unsafe { (*this).critical() };
        let own = unsafe { (*this).scheduler.suspend(tid)? };
        log::debug!("suspended thread {tid}");
        if own {
            unsafe { Self::wait_dispatched(this, &cs) };
        }
        Ok(())
    }

    /// Make `tid` Ready
    pub fn resume(&mut self, tid: ThreadId) -> Result<()> {
        let _cs = self.critical();
        self.scheduler.resume(tid)?;
        log::debug!("resumed thread {tid}");
        Ok(())
    }

    /// Retire the current thread and switch away for good. Does nothing
    /// on the bootstrap thread, the only case in which it returns.
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn exit_current(this: *mut Kernel) {
        let cs = unsafe { (*this).critical() };
        let tid = {
            let kernel = unsafe { &mut *this };
            let tid = kernel.scheduler.current_id();
            if tid == ThreadId::BOOTSTRAP {
                return;
            }
            kernel.scheduler.retire_current();
            tid
        };
        log::debug!("thread {tid} exited");
        loop {
            if unsafe { Self::switch_next(this) }.switched() {
                panic!("exited thread {tid} was dispatched again");
            }
            unsafe { Self::idle_wait(this, &cs) };
        }
    }

    /// Dispatch until no thread is left.
    ///
    /// With ticks enabled, idles one tick period between dispatches.
    /// Returns early when every remaining thread waits for something no
    /// tick can bring (a resume, or a timer without a tick source).
    ///
    /// # Safety
    ///
    /// `this` must be the installed kernel.
    pub unsafe fn run(this: *mut Kernel) {
        let cs = unsafe { (*this).critical() };
        loop {
            let status = unsafe { Self::switch_next(this) };
            let (preemption, period, blocked) = {
                let kernel = unsafe { &*this };
                (
                    kernel.config.preemption,
                    kernel.config.tick_period,
                    kernel.scheduler.blocked_count(),
                )
            };
            match status {
                YieldStatus::Empty => return,
                YieldStatus::NotReady(waiting) if !preemption.is_enabled() || blocked == 0 => {
                    log::warn!("scheduler stopped: {waiting} thread(s) wait with nothing to wake them");
                    return;
                }
                _ => {}
            }
            match preemption {
                Preemption::Simulated => unsafe { Self::on_tick(this) },
                Preemption::Signal => cs.relax(period),
                Preemption::Disabled => {}
            }
        }
    }

    pub fn current_id(&self) -> ThreadId {
        self.scheduler.current_id()
    }

    pub fn current_name(&self) -> String {
        let _cs = self.critical();
        self.scheduler.current().name().unwrap_or_default().to_owned()
    }

    pub fn current_argument(&self) -> Option<Argument> {
        let _cs = self.critical();
        self.scheduler.current().argument
    }

    pub fn snapshot(&self) -> Snapshot {
        let _cs = self.critical();
        Snapshot::capture(&self.scheduler, &self.clock)
    }
}

/// First code a new thread runs: run its entry, then exit.
extern "C" fn thread_start() -> ! {
    let this = installed();
    assert!(!this.is_null(), "green thread started without a runtime");

    // SAFETY: dispatched with ticks masked, so nothing else touches the
    // kernel until they are let through below.
    let (entry, tid, masked) = unsafe {
        let kernel = &*this;
        (kernel.scheduler.current().entry, kernel.current_id(), kernel.masks_ticks())
    };
    if masked {
        timer::unblock_ticks();
    }

    if let Some(entry) = entry {
        // Unwinding cannot cross the switch boundary
        if panic::catch_unwind(entry).is_err() {
            log::error!("thread {tid} panicked, aborting");
            process::abort();
        }
    }

    // SAFETY: the kernel outlives every thread it dispatches.
    unsafe { Kernel::exit_current(this) };
    unreachable!("exit returned on thread {tid}");
}

/// `SIGALRM` handler
extern "C" fn on_tick_signal(_signal: c_int) {
    let this = installed();
    if this.is_null() {
        return;
    }
    let _errno = ErrnoGuard::save();
    // SAFETY: the OS blocks this signal while the handler runs and
    // cooperative code masks it around every kernel access, so the
    // handler is the only flow using the kernel.
    unsafe { Kernel::on_tick(this) }
}
