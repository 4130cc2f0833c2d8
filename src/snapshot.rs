//! Thread table report
//!
//! Author: Moroya Sakamoto

use core::fmt;

use crate::scheduler::Scheduler;
use crate::thread::{ThreadId, ThreadState};
use crate::timer::TickClock;

/// One row of the report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub tid: ThreadId,
    pub name: String,
    pub ticks: u64,
    pub priority: u32,
    pub state: ThreadState,
}

/// Copy of the thread table, taken at one instant
///
/// Lists every slot that has ever held a thread, plus the runtime-wide
/// counters. May be stale as soon as it is taken.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Ticks delivered
    pub ticks: u64,
    /// Timer expirations missed while a tick was pending
    pub overruns: u64,
    /// Dispatches performed
    pub context_switches: u64,
    /// Slots in the thread table
    pub capacity: usize,
    pub threads: Vec<ThreadInfo>,
}

impl Snapshot {
    pub fn capture(scheduler: &Scheduler, clock: &TickClock) -> Self {
        let threads = scheduler
            .threads()
            .iter()
            .filter_map(|t| {
                t.name().map(|name| ThreadInfo {
                    tid: t.tid(),
                    name: name.to_owned(),
                    ticks: t.ticks(),
                    priority: t.priority().get(),
                    state: t.state(),
                })
            })
            .collect();
        Self {
            ticks: clock.now(),
            overruns: clock.overruns(),
            context_switches: scheduler.context_switches(),
            capacity: scheduler.capacity(),
            threads,
        }
    }

    /// Rows of threads bound to a slot right now
    pub fn live(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.state != ThreadState::Unused)
            .count()
    }

    /// Row of a thread, if it was ever named
    pub fn get(&self, tid: ThreadId) -> Option<&ThreadInfo> {
        self.threads.iter().find(|t| t.tid == tid)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "threads {}/{}  ticks {}  switches {}  overruns {}",
            self.live(),
            self.capacity,
            self.ticks,
            self.context_switches,
            self.overruns
        )?;
        writeln!(f, "{:>4} {:<16} {:>10} {:>5} {}", "TID", "NAME", "TICKS", "PRIO", "STATE")?;
        for t in &self.threads {
            writeln!(
                f,
                "{:>4} {:<16} {:>10} {:>5} {}",
                t.tid, t.name, t.ticks, t.priority, t.state
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::thread::Priority;

    fn dummy_thread() {}

    #[test]
    fn test_capture_skips_never_used_slots() {
        let mut sched = Scheduler::new(4);
        sched.slot_mut(2).bind(
            "worker",
            Some(dummy_thread),
            None,
            Priority::new(5).unwrap(),
            Context::empty(),
        );
        let snap = Snapshot::capture(&sched, &TickClock::new());
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.capacity, 4);
        assert!(snap.get(ThreadId::new(1)).is_none());

        let worker = snap.get(ThreadId::new(2)).unwrap();
        assert_eq!(worker.name, "worker");
        assert_eq!(worker.priority, 5);
        assert_eq!(worker.state, ThreadState::Ready);
    }

    #[test]
    fn test_exited_threads_stay_listed() {
        let mut sched = Scheduler::new(3);
        sched
            .slot_mut(1)
            .bind("done", Some(dummy_thread), None, Priority::NORMAL, Context::empty());
        sched.dispatch(1);
        sched.retire_current();
        let snap = Snapshot::capture(&sched, &TickClock::new());
        assert_eq!(snap.get(ThreadId::new(1)).unwrap().state, ThreadState::Unused);
        assert_eq!(snap.live(), 1);
        assert_eq!(snap.context_switches, 1);
    }

    #[test]
    fn test_report_format() {
        let sched = Scheduler::new(2);
        let mut clock = TickClock::new();
        clock.advance();
        clock.record_overruns(2);
        let report = Snapshot::capture(&sched, &clock).to_string();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "threads 1/2  ticks 1  switches 0  overruns 2");
        assert_eq!(
            lines[1],
            " TID NAME                  TICKS  PRIO STATE"
        );
        assert_eq!(
            lines[2],
            "   0 main                      0     1 Running"
        );
    }
}
