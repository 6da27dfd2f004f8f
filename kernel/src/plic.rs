//! The RISC-V Platform Level Interrupt Controller.

use core::ptr;

use crate::arch::cpu_id;
use crate::memlayout::{plic_sclaim, plic_senable, plic_spriority, PLIC, UART0_IRQ};

/// # Safety
///
/// Boot-time only, once, on one hart.
pub unsafe fn init() {
    // set desired IRQ priorities non-zero (otherwise disabled).
    unsafe { ptr::write_volatile((PLIC + UART0_IRQ * 4) as *mut u32, 1) };
}

/// # Safety
///
/// Boot-time only, once per hart.
pub unsafe fn init_hart() {
    let hart = cpu_id();

    unsafe {
        // set the uart's enable bit for this hart's S-mode.
        ptr::write_volatile(plic_senable(hart) as *mut u32, 1 << UART0_IRQ);

        // set this hart's S-mode priority threshold to 0.
        ptr::write_volatile(plic_spriority(hart) as *mut u32, 0);
    }
}

/// Asks the PLIC what interrupt we should serve.
pub fn claim() -> u32 {
    let hart = cpu_id();
    // SAFETY: the claim register is mapped and hart-local.
    unsafe { ptr::read_volatile(plic_sclaim(hart) as *const u32) }
}

/// Tells the PLIC we've served this IRQ.
pub fn complete(irq: u32) {
    let hart = cpu_id();
    // SAFETY: as in claim.
    unsafe { ptr::write_volatile(plic_sclaim(hart) as *mut u32, irq) };
}
