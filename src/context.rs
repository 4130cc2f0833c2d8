//! Context switch — save one flow's registers, resume another
//!
//! The switch pushes the callee-saved registers on the outgoing stack and
//! keeps only the stack pointer in [`Context`]. A fresh thread gets a
//! primed frame whose "return address" is its start routine.
//!
//! Author: Moroya Sakamoto

use core::arch::global_asm;

use crate::stack::Stack;

/// Saved execution context of a suspended flow
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Context {
    /// Saved stack pointer
    sp: usize,
}

/// Start routine of a fresh thread, entered by the first switch to it
pub type StartFn = extern "C" fn() -> !;

impl Context {
    /// Context of a slot that has never run
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// Saved stack pointer
    pub fn stack_pointer(&self) -> usize {
        self.sp
    }

    /// Lay out a first frame on `stack` so that switching to the returned
    /// context enters `start` with an ABI-aligned stack.
    pub fn prime(stack: &mut Stack, start: StartFn) -> Self {
        let top = stack.top() as *mut usize;
        let words = arch::FRAME_WORDS;
        // SAFETY: the frame is a few words and stacks are at least
        // MIN_STACK_SIZE bytes, so every write stays inside the stack.
        unsafe {
            let frame = top.sub(words);
            for i in 0..words {
                frame.add(i).write(0);
            }
            frame.add(arch::RETURN_SLOT).write(start as usize);
            Self { sp: frame as usize }
        }
    }
}

/// Swap execution contexts: save the running flow into `old` and resume
/// the flow saved in `new`. Returns when something switches back to `old`.
///
/// # Safety
///
/// `old` must be writable and `new` must hold either a context saved by a
/// previous `switch` or one produced by [`Context::prime`] whose stack is
/// still alive.
#[inline]
pub unsafe fn switch(old: *mut Context, new: *const Context) {
    // SAFETY: forwarded to the caller.
    unsafe { gthr_switch_context(old, new) }
}

extern "C" {
    fn gthr_switch_context(old: *mut Context, new: *const Context);
}

#[cfg(target_arch = "x86_64")]
mod arch {
    // Primed frame, lowest address first:
    //   r15 r14 r13 r12 rbx rbp | start | 0 (fake return address)
    // `ret` pops `start` leaving rsp = top - 8, the alignment a called
    // function expects.
    pub const FRAME_WORDS: usize = 8;
    pub const RETURN_SLOT: usize = 6;
}

#[cfg(target_arch = "x86_64")]
global_asm!(
    ".text",
    ".global gthr_switch_context",
    ".type gthr_switch_context, @function",
    "gthr_switch_context:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, [rsi]",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    ".size gthr_switch_context, . - gthr_switch_context",
);

#[cfg(target_arch = "aarch64")]
mod arch {
    // Primed frame: x19..x28, x29 (fp), x30 (lr), d8..d15 = 20 words.
    // The switch restores lr = start and returns with sp = top.
    pub const FRAME_WORDS: usize = 20;
    pub const RETURN_SLOT: usize = 11;
}

#[cfg(target_arch = "aarch64")]
global_asm!(
    ".text",
    ".global gthr_switch_context",
    ".type gthr_switch_context, %function",
    "gthr_switch_context:",
    "sub sp, sp, #160",
    "stp x19, x20, [sp, #0]",
    "stp x21, x22, [sp, #16]",
    "stp x23, x24, [sp, #32]",
    "stp x25, x26, [sp, #48]",
    "stp x27, x28, [sp, #64]",
    "stp x29, x30, [sp, #80]",
    "stp d8, d9, [sp, #96]",
    "stp d10, d11, [sp, #112]",
    "stp d12, d13, [sp, #128]",
    "stp d14, d15, [sp, #144]",
    "mov x9, sp",
    "str x9, [x0]",
    "ldr x9, [x1]",
    "mov sp, x9",
    "ldp x19, x20, [sp, #0]",
    "ldp x21, x22, [sp, #16]",
    "ldp x23, x24, [sp, #32]",
    "ldp x25, x26, [sp, #48]",
    "ldp x27, x28, [sp, #64]",
    "ldp x29, x30, [sp, #80]",
    "ldp d8, d9, [sp, #96]",
    "ldp d10, d11, [sp, #112]",
    "ldp d12, d13, [sp, #128]",
    "ldp d14, d15, [sp, #144]",
    "add sp, sp, #160",
    "ret",
    ".size gthr_switch_context, . - gthr_switch_context",
);

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("gthr supports x86_64 and aarch64 only");

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static MAIN: Cell<Context> = const { Cell::new(Context::empty()) };
        static FIBER: Cell<Context> = const { Cell::new(Context::empty()) };
        static HITS: Cell<u32> = const { Cell::new(0) };
    }

    fn main_ptr() -> *mut Context {
        MAIN.with(|c| c.as_ptr())
    }

    fn fiber_ptr() -> *mut Context {
        FIBER.with(|c| c.as_ptr())
    }

    extern "C" fn bounce() -> ! {
        loop {
            HITS.with(|h| h.set(h.get() + 1));
            // SAFETY: MAIN was saved by the switch that entered us.
            unsafe { switch(fiber_ptr(), main_ptr()) };
        }
    }

    #[test]
    fn test_prime_alignment() {
        let mut stack = Stack::new(64 * 1024).unwrap();
        let ctx = Context::prime(&mut stack, bounce);
        let top = stack.top() as usize;
        assert_eq!(ctx.stack_pointer(), top - arch::FRAME_WORDS * 8);
        assert_eq!(ctx.stack_pointer() % 16, 0);
    }

    #[test]
    fn test_switch_round_trip() {
        let mut stack = Stack::new(64 * 1024).unwrap();
        FIBER.with(|c| c.set(Context::prime(&mut stack, bounce)));

        for expected in 1..=3 {
            // SAFETY: FIBER is primed on a live stack, then saved by `bounce`.
            unsafe { switch(main_ptr(), fiber_ptr()) };
            assert_eq!(HITS.with(|h| h.get()), expected);
        }
        drop(stack);
    }
}
