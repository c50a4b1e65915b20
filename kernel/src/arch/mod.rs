//! Architecture boundary of the scheduling core
//!
//! The core never touches interrupt controllers, timers or register state
//! directly. Everything it needs from the machine goes through [`Platform`].

#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(target_arch = "aarch64")]
pub mod aarch64;

#[cfg(target_arch = "riscv64")]
pub mod riscv64;

#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
))]
mod machine;

#[cfg(any(
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "riscv64"
))]
pub use machine::{MachineOps, MachinePlatform};

#[cfg(test)]
pub(crate) mod mock;

use crate::sched::Thread;

/// Logical CPU index, dense from zero.
pub type CpuId = usize;

/// Services the scheduler consumes from the CPU, interrupt controller and
/// context-switch code.
///
/// Timer and IPI operations address a CPU by id. Implementations may
/// require that timer operations only target the calling CPU.
pub trait Platform: Sync {
    /// Number of CPUs the scheduler manages.
    fn cpu_count(&self) -> usize;

    /// CPU executing the caller. Valid in thread and interrupt context.
    fn current_cpu(&self) -> CpuId;

    /// Mask interrupts on the calling CPU, returning the previous state.
    fn disable_interrupts(&self) -> bool;

    /// Restore the state returned by [`Platform::disable_interrupts`].
    fn restore_interrupts(&self, was_enabled: bool);

    fn enable_interrupts(&self) {
        self.restore_interrupts(true);
    }

    fn interrupts_enabled(&self) -> bool;

    /// Force `cpu` into its reschedule handler.
    fn send_reschedule_ipi(&self, cpu: CpuId);

    /// Arm the one-shot preemption timer.
    fn arm_timer(&self, cpu: CpuId, quantum_us: u64);

    fn stop_timer(&self, cpu: CpuId);

    /// Microseconds left before the armed timer fires, zero if stopped.
    fn timer_remaining_us(&self, cpu: CpuId) -> u64;

    /// Acknowledge the interrupt currently being serviced.
    fn end_of_interrupt(&self, cpu: CpuId);

    /// Save `from`, load `to` and continue in `to`.
    ///
    /// Returns only when `from` is switched back in, possibly on another
    /// CPU. Never returns if `from` has exited. The resumed side must call
    /// [`Scheduler::finish_switch`](crate::sched::Scheduler::finish_switch)
    /// before doing anything else, and a thread running for the first time
    /// must do the same from its entry trampoline.
    fn context_switch(&self, from: &Thread, to: &Thread);

    /// Spin-wait hint.
    fn pause(&self) {
        core::hint::spin_loop();
    }
}
