//! x86_64 interrupt-flag control (RFLAGS.IF)

use x86_64::instructions::interrupts;

pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Clear IF and report whether it was set.
pub fn save_and_disable_interrupts() -> bool {
    let was_enabled = interrupts::are_enabled();
    interrupts::disable();
    was_enabled
}

pub fn restore_interrupts(was_enabled: bool) {
    if was_enabled {
        interrupts::enable();
    }
}

pub fn enable_interrupts() {
    interrupts::enable();
}

pub fn idle() {
    x86_64::instructions::hlt();
}
