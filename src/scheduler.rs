//! Round-robin scheduler over a fixed thread table
//!
//! Owns the table and the cursor. Everything here is bookkeeping: which
//! slot runs next, which timers expire, which thread used up its
//! quantum. The actual switch lives in the kernel.
//!
//! Author: Moroya Sakamoto

use crate::context::Context;
use crate::error::{Error, Result};
use crate::thread::{Priority, ThreadControlBlock, ThreadId, ThreadState};

/// Name of the bootstrap thread
pub const BOOTSTRAP_NAME: &str = "main";

/// Outcome of the dispatch scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// First Ready slot after the cursor
    Ready(usize),
    /// Back at the cursor without a Ready slot; `not_ready` counts the
    /// Blocked and Suspended slots seen, the cursor's own included
    Exhausted { not_ready: usize },
}

/// Round-robin scheduler
///
/// Fixed table, sized once: slots never move, so saved contexts keep
/// their addresses for the lifetime of the scheduler.
pub struct Scheduler {
    /// Thread table
    threads: Vec<ThreadControlBlock>,
    /// Index of the executing thread
    current: usize,
    /// Total context switches
    context_switches: u64,
}

impl Scheduler {
    /// Table of `capacity` slots with the bootstrap thread Running in slot 0
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "thread table needs room for the bootstrap thread");
        let mut threads: Vec<ThreadControlBlock> = (0..capacity)
            .map(|i| ThreadControlBlock::empty(ThreadId::new(i)))
            .collect();
        threads[0].bind(BOOTSTRAP_NAME, None, None, Priority::NORMAL, Context::empty());
        threads[0].state = ThreadState::Running;
        Self {
            threads,
            current: 0,
            context_switches: 0,
        }
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.threads.len()
    }

    /// Dispatches performed since the table was created
    pub fn context_switches(&self) -> u64 {
        self.context_switches
    }

    /// First Unused slot
    pub fn claim_slot(&self) -> Result<usize> {
        self.threads
            .iter()
            .position(|t| t.state == ThreadState::Unused)
            .ok_or(Error::CapacityExceeded {
                capacity: self.threads.len(),
            })
    }

    pub fn slot(&self, idx: usize) -> &ThreadControlBlock {
        &self.threads[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut ThreadControlBlock {
        &mut self.threads[idx]
    }

    /// All slots in tid order
    pub fn threads(&self) -> &[ThreadControlBlock] {
        &self.threads
    }

    /// The executing thread
    pub fn current(&self) -> &ThreadControlBlock {
        &self.threads[self.current]
    }

    pub fn current_id(&self) -> ThreadId {
        ThreadId::new(self.current)
    }

    /// Scan circularly from the slot after the cursor for a Ready slot
    pub fn scan(&self) -> Scan {
        let n = self.threads.len();
        let mut not_ready = usize::from(self.current().state.is_waiting());
        let mut idx = self.current;
        loop {
            idx = (idx + 1) % n;
            if idx == self.current {
                return Scan::Exhausted { not_ready };
            }
            match self.threads[idx].state {
                ThreadState::Ready => return Scan::Ready(idx),
                state if state.is_waiting() => not_ready += 1,
                _ => {}
            }
        }
    }

    /// Make `next` the running thread
    ///
    /// Demotes the current thread to Ready if it was Running and moves the
    /// cursor. Returns the (old, new) contexts for the switch.
    pub fn dispatch(&mut self, next: usize) -> (*mut Context, *const Context) {
        assert_eq!(
            self.threads[next].state,
            ThreadState::Ready,
            "dispatch of thread {next} which is not Ready"
        );
        self.check_cursor();

        let prev = self.current;
        if self.threads[prev].state == ThreadState::Running {
            self.threads[prev].state = ThreadState::Ready;
        }
        self.threads[next].state = ThreadState::Running;
        self.current = next;
        self.context_switches += 1;

        let old = &mut self.threads[prev].context as *mut Context;
        let new = &self.threads[next].context as *const Context;
        (old, new)
    }

    /// The cursor must be the only Running slot, if any slot is Running
    fn check_cursor(&self) {
        for (idx, thread) in self.threads.iter().enumerate() {
            if thread.state == ThreadState::Running && idx != self.current {
                panic!(
                    "scheduler cursor at {} but thread {idx} is Running",
                    self.current
                );
            }
        }
    }

    /// Count one tick against the current thread.
    /// Returns true when its quantum expired.
    pub fn charge_tick(&mut self) -> bool {
        let current = &mut self.threads[self.current];
        current.ticks += 1;
        current.priority.quantum_expired(current.ticks)
    }

    /// Timer sweep: count down every running delay timer and wake the
    /// Blocked threads whose timer is zero.
    pub fn sweep(&mut self) {
        for thread in self.threads.iter_mut() {
            if thread.timer > 0 {
                thread.timer -= 1;
            }
            if thread.timer == 0 && thread.state == ThreadState::Blocked {
                thread.state = ThreadState::Ready;
            }
        }
    }

    /// Block the current thread for `ticks` ticks
    pub fn block_current(&mut self, ticks: u32) {
        let current = &mut self.threads[self.current];
        current.state = ThreadState::Blocked;
        current.timer = ticks;
    }

    /// Mark the current thread as exited
    pub fn retire_current(&mut self) {
        let current = &mut self.threads[self.current];
        current.state = ThreadState::Unused;
        current.timer = 0;
        current.entry = None;
        current.argument = None;
    }

    /// Current thread was made Ready while it was still the cursor:
    /// take the CPU back without a switch.
    pub fn reclaim_current(&mut self) {
        self.check_cursor();
        self.threads[self.current].state = ThreadState::Running;
    }

    /// Index of a live thread
    pub fn live_slot(&self, tid: ThreadId) -> Result<usize> {
        match self.threads.get(tid.index()) {
            Some(thread) if thread.is_live() => Ok(tid.index()),
            _ => Err(Error::InvalidId(tid)),
        }
    }

    /// Suspend a thread.
    /// Returns true when it was the current thread, which must then yield.
    pub fn suspend(&mut self, tid: ThreadId) -> Result<bool> {
        let idx = self.live_slot(tid)?;
        self.threads[idx].state = ThreadState::Suspended;
        Ok(idx == self.current)
    }

    /// Make a thread Ready, whatever it was waiting for.
    /// The current Running thread is left alone.
    pub fn resume(&mut self, tid: ThreadId) -> Result<()> {
        let idx = self.live_slot(tid)?;
        let thread = &mut self.threads[idx];
        if idx == self.current && thread.state == ThreadState::Running {
            return Ok(());
        }
        thread.state = ThreadState::Ready;
        thread.timer = 0;
        Ok(())
    }

    /// Number of threads bound to a slot, bootstrap included
    pub fn live_count(&self) -> usize {
        self.threads.iter().filter(|t| t.is_live()).count()
    }

    /// Number of threads waiting on a delay timer
    pub fn blocked_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.state == ThreadState::Blocked)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_thread() {}

    fn with_threads(capacity: usize, count: usize) -> Scheduler {
        let mut sched = Scheduler::new(capacity);
        for i in 0..count {
            let idx = sched.claim_slot().unwrap();
            let name = format!("t{i}");
            sched
                .slot_mut(idx)
                .bind(&name, Some(dummy_thread), None, Priority::NORMAL, Context::empty());
        }
        sched
    }

    #[test]
    fn test_scheduler_bootstrap() {
        let sched = Scheduler::new(4);
        assert_eq!(sched.capacity(), 4);
        assert_eq!(sched.live_count(), 1);
        assert_eq!(sched.current_id(), ThreadId::BOOTSTRAP);
        assert_eq!(sched.current().state(), ThreadState::Running);
        assert_eq!(sched.current().name(), Some(BOOTSTRAP_NAME));
    }

    #[test]
    fn test_claim_until_full() {
        let mut sched = with_threads(4, 3);
        assert!(matches!(
            sched.claim_slot(),
            Err(Error::CapacityExceeded { capacity: 4 })
        ));

        // Exited slots are handed out again
        sched.dispatch(2);
        sched.retire_current();
        assert_eq!(sched.claim_slot().unwrap(), 2);
    }

    #[test]
    fn test_empty_table_scan() {
        let sched = Scheduler::new(4);
        assert_eq!(sched.scan(), Scan::Exhausted { not_ready: 0 });
    }

    #[test]
    fn test_round_robin_order() {
        let mut sched = with_threads(5, 3);
        let mut order = Vec::new();
        for _ in 0..8 {
            match sched.scan() {
                Scan::Ready(next) => {
                    sched.dispatch(next);
                    order.push(next);
                }
                Scan::Exhausted { .. } => panic!("nothing to dispatch"),
            }
        }
        assert_eq!(order, vec![1, 2, 3, 0, 1, 2, 3, 0]);
        assert_eq!(sched.context_switches(), 8);
    }

    #[test]
    fn test_scan_counts_waiting_slots() {
        let mut sched = with_threads(5, 3);
        sched.suspend(ThreadId::new(1)).unwrap();
        sched.slot_mut(3).state = ThreadState::Blocked;
        assert_eq!(sched.scan(), Scan::Ready(2));

        sched.suspend(ThreadId::new(2)).unwrap();
        assert_eq!(sched.scan(), Scan::Exhausted { not_ready: 3 });
    }

    #[test]
    fn test_scan_counts_waiting_cursor() {
        let mut sched = with_threads(3, 1);
        sched.dispatch(1);
        sched.block_current(2);
        // Bootstrap is Ready (demoted by the dispatch)
        assert_eq!(sched.scan(), Scan::Ready(0));
        sched.slot_mut(0).state = ThreadState::Suspended;
        assert_eq!(sched.scan(), Scan::Exhausted { not_ready: 2 });
    }

    #[test]
    fn test_dispatch_keeps_waiting_state() {
        let mut sched = with_threads(3, 1);
        sched.suspend(ThreadId::BOOTSTRAP).unwrap();
        sched.dispatch(1);
        assert_eq!(sched.slot(0).state(), ThreadState::Suspended);
        assert_eq!(sched.slot(1).state(), ThreadState::Running);
        assert_eq!(sched.current_id(), ThreadId::new(1));
    }

    #[test]
    #[should_panic(expected = "is Running")]
    fn test_cursor_mismatch_is_fatal() {
        let mut sched = with_threads(3, 2);
        sched.slot_mut(2).state = ThreadState::Running;
        sched.slot_mut(1).state = ThreadState::Ready;
        sched.dispatch(1);
    }

    #[test]
    fn test_sweep_wakes_expired() {
        let mut sched = with_threads(4, 2);
        sched.dispatch(1);
        sched.block_current(2);
        sched.dispatch(2);
        sched.block_current(0);

        sched.sweep();
        assert_eq!(sched.slot(1).state(), ThreadState::Blocked);
        assert_eq!(sched.slot(1).timer(), 1);
        // A zero delay wakes on the first sweep
        assert_eq!(sched.slot(2).state(), ThreadState::Ready);

        sched.sweep();
        assert_eq!(sched.slot(1).state(), ThreadState::Ready);
        assert_eq!(sched.slot(1).timer(), 0);
    }

    #[test]
    fn test_sweep_ignores_suspended() {
        let mut sched = with_threads(3, 1);
        sched.suspend(ThreadId::new(1)).unwrap();
        for _ in 0..10 {
            sched.sweep();
        }
        assert_eq!(sched.slot(1).state(), ThreadState::Suspended);
    }

    #[test]
    fn test_charge_tick_priority() {
        let mut sched = Scheduler::new(2);
        let idx = sched.claim_slot().unwrap();
        let prio = Priority::new(3).unwrap();
        sched
            .slot_mut(idx)
            .bind("slow", Some(dummy_thread), None, prio, Context::empty());
        sched.dispatch(idx);

        let expired: Vec<bool> = (0..6).map(|_| sched.charge_tick()).collect();
        assert_eq!(expired, vec![false, false, true, false, false, true]);
        assert_eq!(sched.current().ticks(), 6);
    }

    #[test]
    fn test_suspend_resume() {
        let mut sched = with_threads(3, 1);
        assert!(!sched.suspend(ThreadId::new(1)).unwrap());
        assert_eq!(sched.slot(1).state(), ThreadState::Suspended);
        sched.resume(ThreadId::new(1)).unwrap();
        assert_eq!(sched.slot(1).state(), ThreadState::Ready);

        // Suspending yourself asks for a yield
        assert!(sched.suspend(ThreadId::BOOTSTRAP).unwrap());
    }

    #[test]
    fn test_resume_blocked_clears_timer() {
        let mut sched = with_threads(3, 1);
        sched.dispatch(1);
        sched.block_current(5);
        sched.dispatch(0);
        sched.resume(ThreadId::new(1)).unwrap();
        assert_eq!(sched.slot(1).state(), ThreadState::Ready);
        assert_eq!(sched.slot(1).timer(), 0);
    }

    #[test]
    fn test_resume_running_is_noop() {
        let mut sched = with_threads(3, 1);
        sched.resume(ThreadId::BOOTSTRAP).unwrap();
        assert_eq!(sched.current().state(), ThreadState::Running);
    }

    #[test]
    fn test_invalid_ids() {
        let mut sched = with_threads(3, 1);
        assert!(matches!(
            sched.suspend(ThreadId::new(2)),
            Err(Error::InvalidId(_))
        ));
        assert!(matches!(
            sched.resume(ThreadId::new(99)),
            Err(Error::InvalidId(_))
        ));
    }

    #[test]
    fn test_reclaim_current() {
        let mut sched = with_threads(3, 1);
        sched.dispatch(1);
        sched.block_current(1);
        sched.sweep();
        assert_eq!(sched.current().state(), ThreadState::Ready);
        sched.reclaim_current();
        assert_eq!(sched.current().state(), ThreadState::Running);
    }
}
