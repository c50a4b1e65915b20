//! [`Platform`] for real hardware
//!
//! Interrupt masking is handled here per architecture. Timer, IPI and stack
//! switching come from the interrupt controller and context code through
//! [`MachineOps`].

use super::{CpuId, Platform};
use crate::sched::Thread;

#[cfg(target_arch = "aarch64")]
use super::aarch64 as cpu;
#[cfg(target_arch = "riscv64")]
use super::riscv64 as cpu;
#[cfg(target_arch = "x86_64")]
use super::x86_64 as cpu;

/// Hooks into the interrupt controller and context-switch code.
///
/// Timer hooks act on the local CPU only.
#[derive(Clone, Copy)]
pub struct MachineOps {
    pub cpu_count: usize,
    pub current_cpu: fn() -> CpuId,
    pub send_ipi: fn(target: CpuId, vector: u8),
    pub arm_timer: fn(quantum_us: u64),
    pub stop_timer: fn(),
    pub timer_remaining_us: fn() -> u64,
    pub end_of_interrupt: fn(),
    /// Store the current stack pointer through the first argument and
    /// resume on the second.
    ///
    /// # Safety
    ///
    /// The second argument must be a stack pointer previously saved by this
    /// routine or prepared by thread setup.
    pub switch_stacks: unsafe fn(save_sp: *mut usize, load_sp: usize),
}

pub struct MachinePlatform {
    ops: MachineOps,
    reschedule_vector: u8,
}

impl MachinePlatform {
    pub const fn new(ops: MachineOps, reschedule_vector: u8) -> Self {
        Self {
            ops,
            reschedule_vector,
        }
    }

    /// Halt until the next interrupt. Used by idle loops.
    pub fn idle(&self) {
        cpu::idle();
    }
}

impl Platform for MachinePlatform {
    fn cpu_count(&self) -> usize {
        self.ops.cpu_count
    }

    fn current_cpu(&self) -> CpuId {
        (self.ops.current_cpu)()
    }

    fn disable_interrupts(&self) -> bool {
        cpu::save_and_disable_interrupts()
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        cpu::restore_interrupts(was_enabled);
    }

    fn enable_interrupts(&self) {
        cpu::enable_interrupts();
    }

    fn interrupts_enabled(&self) -> bool {
        cpu::interrupts_enabled()
    }

    fn send_reschedule_ipi(&self, cpu: CpuId) {
        (self.ops.send_ipi)(cpu, self.reschedule_vector);
    }

    fn arm_timer(&self, cpu: CpuId, quantum_us: u64) {
        debug_assert_eq!(cpu, self.current_cpu());
        (self.ops.arm_timer)(quantum_us);
    }

    fn stop_timer(&self, cpu: CpuId) {
        if cpu == self.current_cpu() {
            (self.ops.stop_timer)();
        }
    }

    fn timer_remaining_us(&self, cpu: CpuId) -> u64 {
        if cpu == self.current_cpu() {
            (self.ops.timer_remaining_us)()
        } else {
            0
        }
    }

    fn end_of_interrupt(&self, _cpu: CpuId) {
        (self.ops.end_of_interrupt)();
    }

    fn context_switch(&self, from: &Thread, to: &Thread) {
        // SAFETY: `to` was either switched out by this routine or had its
        // initial stack prepared by thread setup before being enqueued.
        unsafe { (self.ops.switch_stacks)(from.saved_sp_slot(), to.saved_sp()) };
    }
}
