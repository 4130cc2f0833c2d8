//! gthr — Minimal green-thread runtime
//!
//! Many user-space threads multiplexed onto one OS thread:
//! - Fixed thread table, slot index = thread id
//! - Round-robin dispatch with per-thread quantum (priority = ticks)
//! - Tick-driven preemption: `SIGALRM` interval timer, or simulated ticks
//! - Tick-based delays, suspend/resume, thread table snapshots
//!
//! ```no_run
//! use gthr::{Config, Runtime};
//!
//! fn worker() {
//!     for _ in 0..3 {
//!         println!("{} at tick {}", gthr::current_name(), gthr::ticks());
//!         gthr::delay(1);
//!     }
//! }
//!
//! let _rt = Runtime::initialize(Config::testing()).unwrap();
//! gthr::spawn(worker, "a").unwrap();
//! gthr::spawn(worker, "b").unwrap();
//! gthr::run_scheduler();
//! ```
//!
//! Author: Moroya Sakamoto

pub mod config;
pub mod context;
pub mod error;
pub mod kernel;
pub mod runtime;
pub mod scheduler;
pub mod snapshot;
pub mod stack;
pub mod thread;
pub mod timer;

pub use config::{Config, Preemption};
pub use error::{Error, Result};
pub use kernel::YieldStatus;
pub use runtime::{
    create, current_argument, current_id, current_name, delay, exit_current, resume,
    run_scheduler, snapshot, spawn, suspend, tick, ticks, yield_now, Runtime,
};
pub use snapshot::{Snapshot, ThreadInfo};
pub use thread::{Argument, Priority, ThreadFn, ThreadId, ThreadState};
