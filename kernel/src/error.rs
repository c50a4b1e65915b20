//! Error types for the scheduling core
//!
//! Only recoverable failures live here. Contract violations (blocking with
//! preemption disabled, dequeuing an idle thread) are fatal and go through
//! [`sched_assert!`](crate::sched_assert) instead.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Storage for an alarm, listener or pending result could not be reserved
    OutOfMemory { requested: usize, available: usize },

    /// Scheduler-related errors
    SchedulerError(SchedError),

    /// Generic errors
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    NotInitialized {
        subsystem: &'static str,
    },
    AlreadyExists {
        resource: &'static str,
        id: u64,
    },
}

/// Scheduler-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    InvalidCpuId { cpu: usize },
    NoCpus,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "Out of memory: requested {} bytes, {} available",
                    requested, available
                )
            }
            Self::SchedulerError(e) => write!(f, "Scheduler error: {:?}", e),
            Self::InvalidArgument { name, value } => {
                write!(f, "Invalid argument '{}': {}", name, value)
            }
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
            Self::AlreadyExists { resource, id } => {
                write!(f, "{} with id {} already exists", resource, id)
            }
        }
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::SchedulerError(err)
    }
}

impl From<alloc::collections::TryReserveError> for KernelError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        Self::OutOfMemory {
            requested: 1,
            available: 0,
        }
    }
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
