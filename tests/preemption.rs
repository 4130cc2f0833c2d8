//! Signal-driven preemption on a real interval timer
//!
//! Green threads here never allocate or print: they can be interrupted
//! at any instruction.

#![cfg(all(target_os = "linux", feature = "signal"))]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use gthr::{Config, Preemption, Runtime, ThreadId, ThreadState};

fn signal_config() -> Config {
    Config::new()
        .with_capacity(4)
        .with_stack_size(256 * 1024)
        .with_tick_period(Duration::from_millis(1))
        .with_preemption(Preemption::Signal)
}

static RELEASED: AtomicBool = AtomicBool::new(false);

/// Spins until `releaser` runs, which only a tick can arrange
fn spinner() {
    while !RELEASED.load(Ordering::SeqCst) {
        std::hint::spin_loop();
    }
}

fn releaser() {
    RELEASED.store(true, Ordering::SeqCst);
}

#[test]
fn test_tick_preempts_busy_thread() {
    let _rt = Runtime::initialize(signal_config()).unwrap();
    let spin = gthr::spawn(spinner, "spinner").unwrap();
    gthr::spawn(releaser, "releaser").unwrap();

    gthr::run_scheduler();

    assert!(RELEASED.load(Ordering::SeqCst));
    let snap = gthr::snapshot();
    let spin = snap.get(spin).unwrap();
    assert_eq!(spin.state, ThreadState::Unused);
    assert!(spin.ticks >= 1);
    assert!(gthr::ticks() >= 1);
}

static DELAY_START: AtomicU64 = AtomicU64::new(u64::MAX);
static DELAY_END: AtomicU64 = AtomicU64::new(u64::MAX);

fn sleeper() {
    DELAY_START.store(gthr::ticks(), Ordering::SeqCst);
    gthr::delay(3);
    DELAY_END.store(gthr::ticks(), Ordering::SeqCst);
}

#[test]
fn test_delay_on_signal_ticks() {
    let _rt = Runtime::initialize(signal_config()).unwrap();
    gthr::spawn(sleeper, "sleeper").unwrap();

    gthr::run_scheduler();

    let start = DELAY_START.load(Ordering::SeqCst);
    let end = DELAY_END.load(Ordering::SeqCst);
    assert_ne!(end, u64::MAX);
    assert!(end - start >= 3);
}

static SPIN_A: AtomicU64 = AtomicU64::new(0);
static SPIN_B: AtomicU64 = AtomicU64::new(0);

/// Neither spinner finishes before both have counted to 1000
fn spin_a() {
    loop {
        let mine = SPIN_A.fetch_add(1, Ordering::SeqCst) + 1;
        if mine >= 1000 && SPIN_B.load(Ordering::SeqCst) >= 1000 {
            break;
        }
    }
}

fn spin_b() {
    loop {
        let mine = SPIN_B.fetch_add(1, Ordering::SeqCst) + 1;
        if mine >= 1000 && SPIN_A.load(Ordering::SeqCst) >= 1000 {
            break;
        }
    }
}

#[test]
fn test_busy_threads_share_cpu() {
    let _rt = Runtime::initialize(signal_config()).unwrap();
    gthr::spawn(spin_a, "a").unwrap();
    gthr::spawn(spin_b, "b").unwrap();

    gthr::run_scheduler();

    assert!(SPIN_A.load(Ordering::SeqCst) >= 1000);
    assert!(SPIN_B.load(Ordering::SeqCst) >= 1000);
    assert_eq!(gthr::current_id(), ThreadId::BOOTSTRAP);
}
