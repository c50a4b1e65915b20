//! Synchronization Primitives
//!
//! Locks shared between thread context and the preemption interrupt.

pub mod irq_mutex;

pub use irq_mutex::{IrqMutex, IrqMutexGuard};
