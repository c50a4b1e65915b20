//! VeridianOS scheduling core
//!
//! Preemptive multitasking for the kernel: the shared run queue, the
//! per-CPU dispatcher with its cross-CPU yield protocol, per-CPU alarm
//! lists for sleeps and bounded waits, and the multi-wait event gate.
//!
//! The crate is `no_std` and reaches the machine only through
//! [`arch::Platform`], so the whole core runs under the host test harness.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

/// Report a scheduler contract violation and halt.
macro_rules! sched_bug {
    ($($arg:tt)+) => {{
        log::error!("[SCHED] contract violation: {}", format_args!($($arg)+));
        panic!("scheduler contract violation: {}", format_args!($($arg)+))
    }};
}

macro_rules! sched_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::sched_bug!($($arg)+);
        }
    };
}

pub(crate) use sched_assert;
pub(crate) use sched_bug;

pub mod arch;
pub mod error;
pub mod sched;
pub mod sync;
pub mod timer;

pub use error::{KernelError, KernelResult, SchedError};
pub use sched::{Event, SchedConfig, Scheduler, Thread, ThreadId, ThreadRef};
pub use timer::{Alarm, AlarmRef};
