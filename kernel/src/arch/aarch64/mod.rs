//! AArch64 interrupt masking through the DAIF I bit

/// DAIF.I, set while IRQs are masked.
const DAIF_IRQ: u64 = 1 << 7;

fn read_daif() -> u64 {
    let daif: u64;
    // SAFETY: reading DAIF has no side effects.
    unsafe { core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack)) };
    daif
}

pub fn interrupts_enabled() -> bool {
    read_daif() & DAIF_IRQ == 0
}

/// Mask IRQs and report whether they were unmasked.
pub fn save_and_disable_interrupts() -> bool {
    let was_enabled = interrupts_enabled();
    // SAFETY: masking IRQs on the local core cannot violate memory safety.
    unsafe { core::arch::asm!("msr daifset, #2", options(nomem, nostack)) };
    was_enabled
}

pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        enable_interrupts();
    }
}

pub fn enable_interrupts() {
    // SAFETY: unmasking IRQs is sound once the vector table is installed,
    // which the platform guarantees before the scheduler starts.
    unsafe { core::arch::asm!("msr daifclr, #2", options(nomem, nostack)) };
}

pub fn idle() {
    // SAFETY: wfi only suspends the core until the next interrupt.
    unsafe { core::arch::asm!("wfi", options(nomem, nostack)) };
}
