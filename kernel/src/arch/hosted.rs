//! Hosted stub backend.
//!
//! Stands in for the machine layer when the kernel is compiled for the
//! development host, so the machine-independent core can be unit-tested.
//! There are no interrupts to mask and no other harts; nothing here may be
//! reached by a path that actually needs to suspend a kernel stack.

use crate::addr::PGSIZE;
use crate::proc::Context;

pub fn cpu_id() -> usize {
    0
}

pub fn intr_get() -> bool {
    false
}

pub fn intr_off() {}

/// # Safety
///
/// Trivially safe: the hosted backend has no interrupts to enable.
pub unsafe fn intr_on() {}

/// # Safety
///
/// Never safe to reach: the hosted backend has no kernel stacks to switch.
pub unsafe extern "C" fn swtch(_old: *mut Context, _new: *mut Context) {
    panic!("swtch: hosted backend cannot context switch");
}

#[repr(C, align(4096))]
struct TrampolinePage([u8; PGSIZE]);

/// A stand-in for the trampoline code page, so user page tables built in
/// tests have something real to map at TRAMPOLINE.
static TRAMPOLINE_PAGE: TrampolinePage = TrampolinePage([0; PGSIZE]);

pub fn trampoline_pa() -> usize {
    TRAMPOLINE_PAGE.0.as_ptr() as usize
}
