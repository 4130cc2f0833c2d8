//! Thread control block — one slot of the thread table
//!
//! Each slot carries the lifecycle state, the saved context, the
//! scheduling metadata (priority, tick counter, delay timer) and the
//! stack of the thread bound to it.
//!
//! Author: Moroya Sakamoto

use core::any::Any;
use core::fmt;
use core::num::NonZeroU32;

use crate::context::Context;
use crate::stack::Stack;

/// Entry function of a green thread
pub type ThreadFn = fn();

/// Opaque caller-owned argument handed to a thread
pub type Argument = &'static dyn Any;

/// Thread id — always equal to the slot index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The bootstrap thread, slot 0
    pub const BOOTSTRAP: ThreadId = ThreadId(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Slot index in the thread table
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Scheduling weight (quantum length in ticks)
///
/// Priority k is preempted every k-th tick it spends running:
/// a larger value means a longer quantum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(NonZeroU32);

impl Priority {
    /// One tick per quantum
    pub const NORMAL: Priority = match NonZeroU32::new(1) {
        Some(p) => Priority(p),
        None => unreachable!(),
    };

    /// `None` for 0
    pub const fn new(weight: u32) -> Option<Self> {
        match NonZeroU32::new(weight) {
            Some(p) => Some(Priority(p)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Has a thread that ran `ticks` ticks used up its quantum?
    pub fn quantum_expired(self, ticks: u64) -> bool {
        ticks % u64::from(self.0.get()) == 0
    }
}

/// Thread lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Slot is not bound to a thread
    Unused,
    /// Thread is executing
    Running,
    /// Thread is waiting for dispatch
    Ready,
    /// Thread is waiting for its delay timer
    Blocked,
    /// Thread is waiting for an explicit resume
    Suspended,
}

impl ThreadState {
    /// Counted as "not ready" by the dispatch scan
    pub fn is_waiting(self) -> bool {
        matches!(self, ThreadState::Blocked | ThreadState::Suspended)
    }

    /// Human-readable label
    pub fn label(self) -> &'static str {
        match self {
            ThreadState::Unused => "Unused",
            ThreadState::Running => "Running",
            ThreadState::Ready => "Ready",
            ThreadState::Blocked => "Blocked",
            ThreadState::Suspended => "Suspended",
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// Thread control block
pub struct ThreadControlBlock {
    /// Thread id (slot index)
    pub(crate) tid: ThreadId,
    /// Display name, `None` until the slot first holds a thread
    pub(crate) name: Option<String>,
    /// Lifecycle state
    pub(crate) state: ThreadState,
    /// Saved machine context
    pub(crate) context: Context,
    /// Quantum weight
    pub(crate) priority: Priority,
    /// Ticks received while current
    pub(crate) ticks: u64,
    /// Delay countdown, meaningful while Blocked
    pub(crate) timer: u32,
    /// Caller-owned argument
    pub(crate) argument: Option<Argument>,
    /// Entry function, `None` for the bootstrap thread
    pub(crate) entry: Option<ThreadFn>,
    /// Stack memory, retained after exit for reuse by the slot
    pub(crate) stack: Option<Stack>,
}

impl ThreadControlBlock {
    /// Never-used slot
    pub fn empty(tid: ThreadId) -> Self {
        Self {
            tid,
            name: None,
            state: ThreadState::Unused,
            context: Context::empty(),
            priority: Priority::NORMAL,
            ticks: 0,
            timer: 0,
            argument: None,
            entry: None,
            stack: None,
        }
    }

    /// Bind a new thread to this slot, leaving it Ready
    pub fn bind(
        &mut self,
        name: &str,
        entry: Option<ThreadFn>,
        argument: Option<Argument>,
        priority: Priority,
        context: Context,
    ) {
        self.name = Some(name.to_owned());
        self.state = ThreadState::Ready;
        self.context = context;
        self.priority = priority;
        self.ticks = 0;
        self.timer = 0;
        self.argument = argument;
        self.entry = entry;
    }

    pub fn tid(&self) -> ThreadId {
        self.tid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn timer(&self) -> u32 {
        self.timer
    }

    /// Is a thread bound to this slot?
    pub fn is_live(&self) -> bool {
        self.state != ThreadState::Unused
    }
}

impl fmt::Debug for ThreadControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadControlBlock")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority.get())
            .field("ticks", &self.ticks)
            .field("timer", &self.timer)
            .field("sp", &format_args!("{:#x}", self.context.stack_pointer()))
            .finish()
    }
}
