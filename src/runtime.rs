//! Runtime — public entry point
//!
//! [`Runtime::initialize`] installs a kernel on the calling OS thread,
//! which becomes the bootstrap green thread. The free functions of this
//! module act on that kernel from any green thread of the runtime.
//!
//! Author: Moroya Sakamoto

use core::marker::PhantomData;
use core::ptr::NonNull;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::kernel::{self, Kernel, YieldStatus};
use crate::snapshot::Snapshot;
use crate::thread::{Argument, ThreadFn, ThreadId};

/// Owner of the runtime installed on the current OS thread
///
/// Dropping it stops the tick source and frees the thread table and every
/// stack. Threads that have not exited by then never run again.
pub struct Runtime {
    kernel: NonNull<Kernel>,
    /// Tied to the OS thread it was installed on
    _local: PhantomData<*mut ()>,
}

impl Runtime {
    /// Install a runtime on the calling OS thread
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        if !kernel::installed().is_null() {
            return Err(Error::AlreadyInitialized);
        }
        let kernel = Box::into_raw(Box::new(Kernel::new(config)));
        // SAFETY: freshly boxed, freed only by `Drop` after uninstall.
        if let Err(err) = unsafe { Kernel::install(kernel) } {
            drop(unsafe { Box::from_raw(kernel) });
            return Err(err);
        }
        let config = unsafe { (*kernel).config() };
        log::info!(
            "green-thread runtime up: {} slots, {} KiB stacks, preemption {:?} every {:?}",
            config.capacity,
            config.stack_size / 1024,
            config.preemption,
            config.tick_period
        );
        Ok(Self {
            // SAFETY: Box::into_raw never returns null.
            kernel: unsafe { NonNull::new_unchecked(kernel) },
            _local: PhantomData,
        })
    }

    /// Configuration the runtime was initialized with
    pub fn config(&self) -> &Config {
        // SAFETY: the kernel lives as long as `self`.
        unsafe { self.kernel.as_ref() }.config()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        let this = self.kernel.as_ptr();
        // SAFETY: installed by `initialize`, still alive.
        let current = unsafe { (*this).current_id() };
        if current != ThreadId::BOOTSTRAP {
            // Freeing the table would free the stack we are running on
            log::error!("runtime dropped from green thread {current}; leaking it");
            return;
        }
        unsafe {
            Kernel::uninstall(this);
            drop(Box::from_raw(this));
        }
        log::info!("green-thread runtime down");
    }
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime").field("config", self.config()).finish()
    }
}

fn kernel() -> *mut Kernel {
    let this = kernel::installed();
    assert!(!this.is_null(), "no green-thread runtime is initialized on this thread");
    this
}

fn try_kernel() -> Result<*mut Kernel> {
    let this = kernel::installed();
    if this.is_null() {
        Err(Error::NotInitialized)
    } else {
        Ok(this)
    }
}

/// Create a thread running `entry`. It starts Ready and runs on its first
/// dispatch; returning from `entry` exits the thread.
///
/// `priority` is the quantum in ticks: a priority-k thread is preempted on
/// every k-th tick it spends running.
pub fn create(
    entry: ThreadFn,
    name: &str,
    argument: Option<Argument>,
    priority: u32,
) -> Result<ThreadId> {
    let this = try_kernel()?;
    // SAFETY: installed kernel; no switch happens while the reference lives.
    let kernel = unsafe { &mut *this };
    let _cs = kernel.critical();
    kernel.create(entry, name, argument, priority)
}

/// Create a thread with no argument and priority 1
pub fn spawn(entry: ThreadFn, name: &str) -> Result<ThreadId> {
    create(entry, name, None, 1)
}

/// Let the next Ready thread run
pub fn yield_now() -> YieldStatus {
    // SAFETY: installed kernel.
    unsafe { Kernel::yield_now(kernel()) }
}

/// Dispatch threads until none is left (or none can ever run again)
pub fn run_scheduler() {
    // SAFETY: installed kernel.
    unsafe { Kernel::run(kernel()) }
}

/// End the calling green thread. Never returns, except on the bootstrap
/// thread where it does nothing.
pub fn exit_current() {
    // SAFETY: installed kernel.
    unsafe { Kernel::exit_current(kernel()) }
}

/// Block the calling thread for `ticks` ticks
pub fn delay(ticks: u32) {
    // SAFETY: installed kernel.
    unsafe { Kernel::delay(kernel(), ticks) }
}

/// Suspend `tid` until [`resume`]. Suspending yourself yields.
pub fn suspend(tid: ThreadId) -> Result<()> {
    let this = try_kernel()?;
    // SAFETY: installed kernel.
    unsafe { Kernel::suspend(this, tid) }
}

/// Make `tid` Ready again
pub fn resume(tid: ThreadId) -> Result<()> {
    let this = try_kernel()?;
    // SAFETY: installed kernel; `resume` never switches.
    unsafe { &mut *this }.resume(tid)
}

/// Deliver one tick from the calling thread
pub fn tick() {
    // SAFETY: installed kernel.
    unsafe { Kernel::tick(kernel()) }
}

/// Ticks delivered so far
pub fn ticks() -> u64 {
    let this = kernel();
    // SAFETY: installed kernel; read under a critical section.
    let kernel = unsafe { &*this };
    let _cs = kernel.critical();
    kernel.clock.now()
}

pub fn current_id() -> ThreadId {
    // SAFETY: installed kernel.
    unsafe { &*kernel() }.current_id()
}

pub fn current_name() -> String {
    // SAFETY: installed kernel.
    unsafe { &*kernel() }.current_name()
}

/// Argument given to the calling thread at creation
pub fn current_argument() -> Option<Argument> {
    // SAFETY: installed kernel.
    unsafe { &*kernel() }.current_argument()
}

/// Report on every thread the runtime has held
pub fn snapshot() -> Snapshot {
    // SAFETY: installed kernel.
    unsafe { &*kernel() }.snapshot()
}
