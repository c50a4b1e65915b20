//! Scheduler configuration

use crate::error::{KernelError, KernelResult};

/// Default timeslice, matching the kernel's 10ms tick.
pub const DEFAULT_QUANTUM_US: u64 = 10_000;

/// Timer period while a CPU runs its idle thread.
pub const DEFAULT_IDLE_QUANTUM_US: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Quantum given to threads created through the scheduler.
    pub quantum_us: u64,
    pub idle_quantum_us: u64,
}

impl SchedConfig {
    pub fn validate(&self) -> KernelResult<()> {
        if self.quantum_us == 0 {
            return Err(KernelError::InvalidArgument {
                name: "quantum_us",
                value: "must be non-zero",
            });
        }
        if self.idle_quantum_us == 0 {
            return Err(KernelError::InvalidArgument {
                name: "idle_quantum_us",
                value: "must be non-zero",
            });
        }
        Ok(())
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            quantum_us: DEFAULT_QUANTUM_US,
            idle_quantum_us: DEFAULT_IDLE_QUANTUM_US,
        }
    }
}
