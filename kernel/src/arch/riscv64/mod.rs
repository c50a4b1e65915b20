//! RISC-V supervisor interrupt enable (sstatus.SIE)

const SSTATUS_SIE: usize = 0x2;

pub fn interrupts_enabled() -> bool {
    let sstatus: usize;
    // SAFETY: reading sstatus has no side effects.
    unsafe { core::arch::asm!("csrr {}, sstatus", out(reg) sstatus, options(nomem, nostack)) };
    sstatus & SSTATUS_SIE != 0
}

/// Clear SIE and report whether it was set.
pub fn save_and_disable_interrupts() -> bool {
    let sstatus: usize;
    // SAFETY: atomically clears SIE on the local hart; returns the old value.
    unsafe {
        core::arch::asm!("csrrci {}, sstatus, 2", out(reg) sstatus, options(nomem, nostack))
    };
    sstatus & SSTATUS_SIE != 0
}

pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        enable_interrupts();
    }
}

pub fn enable_interrupts() {
    // SAFETY: stvec is installed by the platform before the scheduler starts.
    unsafe { core::arch::asm!("csrsi sstatus, 2", options(nomem, nostack)) };
}

pub fn idle() {
    // SAFETY: wfi only stalls the hart until an interrupt is pending.
    unsafe { core::arch::asm!("wfi", options(nomem, nostack)) };
}
