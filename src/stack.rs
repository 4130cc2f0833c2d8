//! Thread stacks — fixed-size, heap-backed
//!
//! Allocated uninitialized from the global allocator so untouched pages
//! stay lazy. Allocation failure is reported, not aborted on.
//!
//! Author: Moroya Sakamoto

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::error::{Error, Result};

/// Stack alignment required by both supported ABIs
pub const STACK_ALIGN: usize = 16;

/// Owned stack memory of one green thread
pub struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocate `size` bytes of stack
    pub fn new(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, STACK_ALIGN)
            .map_err(|_| Error::AllocationFailure { size })?;
        if layout.size() == 0 {
            return Err(Error::AllocationFailure { size });
        }
        // SAFETY: layout has a non-zero size.
        let base = unsafe { alloc::alloc(layout) };
        let base = NonNull::new(base).ok_or(Error::AllocationFailure { size })?;
        Ok(Self { base, layout })
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// One past the highest address, aligned down to [`STACK_ALIGN`]
    pub fn top(&self) -> *mut u8 {
        let end = self.base.as_ptr() as usize + self.layout.size();
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("size", &self.size())
            .finish()
    }
}
