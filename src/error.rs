//! Error kinds returned by the runtime
//!
//! Recoverable conditions only. Broken scheduler invariants are not
//! errors: they panic with a diagnostic.
//!
//! Author: Moroya Sakamoto

use thiserror::Error;

use crate::thread::ThreadId;

/// Runtime error
#[derive(Debug, Error)]
pub enum Error {
    /// No Unused slot left in the thread table
    #[error("thread table is full ({capacity} slots)")]
    CapacityExceeded { capacity: usize },

    /// Stack memory for a new thread could not be allocated
    #[error("failed to allocate a {size}-byte thread stack")]
    AllocationFailure { size: usize },

    /// Tid is out of range or names an Unused slot
    #[error("invalid thread id {0}")]
    InvalidId(ThreadId),

    /// Priority 0 would give the thread an empty quantum
    #[error("thread priority must be greater than zero")]
    InvalidPriority,

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The calling OS thread has no runtime
    #[error("no green-thread runtime is initialized on this thread")]
    NotInitialized,

    #[error("a green-thread runtime is already initialized on this thread")]
    AlreadyInitialized,

    /// Signal preemption requested on a build without it
    #[error("signal-driven preemption is not available on this build")]
    PreemptionUnavailable,

    /// The tick timer or its signal handler could not be set up
    #[cfg(all(feature = "signal", target_os = "linux"))]
    #[error("preemption timer setup failed: {0}")]
    Timer(#[from] nix::Error),
}

/// Result alias used across the crate
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::CapacityExceeded { capacity: 10 };
        assert_eq!(err.to_string(), "thread table is full (10 slots)");

        let err = Error::InvalidId(ThreadId::new(42));
        assert_eq!(err.to_string(), "invalid thread id 42");
    }
}
