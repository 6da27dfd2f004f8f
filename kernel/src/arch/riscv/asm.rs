//! RISC-V instructions and control/status registers.

use core::arch::asm;

use bitflags::bitflags;

/// Which hart (core) is this?
#[inline]
pub fn r_mhartid() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, mhartid", x = out(reg) x);
    }
    x
}

bitflags! {
    /// Machine Status Register, mstatus.
    #[derive(Clone, Copy)]
    pub struct Mstatus: usize {
        /// Previous mode.
        const MPP_MASK = 3 << 11;
        const MPP_M = 3 << 11;
        const MPP_S = 1 << 11;
        const MPP_U = 0 << 11;
        /// Machine-mode interrupt enable.
        const MIE = 1 << 3;
    }
}

impl Mstatus {
    #[inline]
    pub fn read() -> Self {
        let x;
        unsafe {
            asm!("csrr {x}, mstatus", x = out(reg) x);
        }
        Self::from_bits_retain(x)
    }

    #[inline]
    pub unsafe fn write(self) {
        unsafe {
            asm!("csrw mstatus, {x}", x = in(reg) self.bits());
        }
    }
}

bitflags! {
    /// Supervisor Status Register, sstatus.
    #[derive(Clone, Copy)]
    pub struct Sstatus: usize {
        /// Previous mode, 1=Supervisor, 0=User.
        const SPP = 1 << 8;
        /// Supervisor Previous Interrupt Enable.
        const SPIE = 1 << 5;
        /// Supervisor Interrupt Enable.
        const SIE = 1 << 1;
    }
}

impl Sstatus {
    #[inline]
    pub fn read() -> Self {
        let x;
        unsafe {
            asm!("csrr {x}, sstatus", x = out(reg) x);
        }
        Self::from_bits_retain(x)
    }

    #[inline]
    pub unsafe fn write(self) {
        unsafe {
            asm!("csrw sstatus, {x}", x = in(reg) self.bits());
        }
    }
}

bitflags! {
    /// Supervisor Interrupt Enable, sie.
    #[derive(Clone, Copy)]
    pub struct Sie: usize {
        /// External.
        const SEIE = 1 << 9;
        /// Timer.
        const STIE = 1 << 5;
        /// Software.
        const SSIE = 1 << 1;
    }
}

impl Sie {
    #[inline]
    pub fn read() -> Self {
        let x;
        unsafe {
            asm!("csrr {x}, sie", x = out(reg) x);
        }
        Self::from_bits_retain(x)
    }

    #[inline]
    pub unsafe fn write(self) {
        unsafe {
            asm!("csrw sie, {x}", x = in(reg) self.bits());
        }
    }
}

bitflags! {
    /// Machine-mode Interrupt Enable, mie.
    #[derive(Clone, Copy)]
    pub struct Mie: usize {
        /// Timer.
        const MTIE = 1 << 7;
    }
}

impl Mie {
    #[inline]
    pub fn read() -> Self {
        let x;
        unsafe {
            asm!("csrr {x}, mie", x = out(reg) x);
        }
        Self::from_bits_retain(x)
    }

    #[inline]
    pub unsafe fn write(self) {
        unsafe {
            asm!("csrw mie, {x}", x = in(reg) self.bits());
        }
    }
}

/// Machine exception program counter; holds the instruction address to which
/// a return from exception will go.
#[inline]
pub unsafe fn w_mepc(x: usize) {
    unsafe {
        asm!("csrw mepc, {x}", x = in(reg) x);
    }
}

/// Supervisor exception program counter.
#[inline]
pub unsafe fn w_sepc(x: usize) {
    unsafe {
        asm!("csrw sepc, {x}", x = in(reg) x);
    }
}

#[inline]
pub fn r_sepc() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, sepc", x = out(reg) x);
    }
    x
}

/// Machine exception delegation.
#[inline]
pub unsafe fn w_medeleg(x: usize) {
    unsafe {
        asm!("csrw medeleg, {x}", x = in(reg) x);
    }
}

/// Machine interrupt delegation.
#[inline]
pub unsafe fn w_mideleg(x: usize) {
    unsafe {
        asm!("csrw mideleg, {x}", x = in(reg) x);
    }
}

/// Supervisor trap-vector base address.
#[inline]
pub unsafe fn w_stvec(x: usize) {
    unsafe {
        asm!("csrw stvec, {x}", x = in(reg) x);
    }
}

/// Machine-mode trap-vector base address.
#[inline]
pub unsafe fn w_mtvec(x: usize) {
    unsafe {
        asm!("csrw mtvec, {x}", x = in(reg) x);
    }
}

/// Physical memory protection, to give supervisor mode access to all of
/// physical memory.
#[inline]
pub unsafe fn w_pmpcfg0(x: usize) {
    unsafe {
        asm!("csrw pmpcfg0, {x}", x = in(reg) x);
    }
}

#[inline]
pub unsafe fn w_pmpaddr0(x: usize) {
    unsafe {
        asm!("csrw pmpaddr0, {x}", x = in(reg) x);
    }
}

/// Supervisor address translation and protection; holds the address of the
/// page table.
#[inline]
pub unsafe fn w_satp(x: usize) {
    unsafe {
        asm!("csrw satp, {x}", x = in(reg) x);
    }
}

#[inline]
pub fn r_satp() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, satp", x = out(reg) x);
    }
    x
}

/// Machine-mode scratch register, for early trap handling.
#[inline]
pub unsafe fn w_mscratch(x: usize) {
    unsafe {
        asm!("csrw mscratch, {x}", x = in(reg) x);
    }
}

/// Supervisor trap cause.
#[inline]
pub fn r_scause() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, scause", x = out(reg) x);
    }
    x
}

/// Supervisor trap value.
#[inline]
pub fn r_stval() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, stval", x = out(reg) x);
    }
    x
}

/// Supervisor interrupt pending.
#[inline]
pub fn r_sip() -> usize {
    let x;
    unsafe {
        asm!("csrr {x}, sip", x = out(reg) x);
    }
    x
}

#[inline]
pub unsafe fn w_sip(x: usize) {
    unsafe {
        asm!("csrw sip, {x}", x = in(reg) x);
    }
}

/// Read the thread pointer, which holds this hart's id.
#[inline]
pub fn r_tp() -> usize {
    let x;
    unsafe {
        asm!("mv {x}, tp", x = out(reg) x);
    }
    x
}

#[inline]
pub unsafe fn w_tp(x: usize) {
    unsafe {
        asm!("mv tp, {x}", x = in(reg) x);
    }
}

/// Which hart (core) is this?
///
/// Must be called with interrupts disabled, to prevent a race with the
/// process being moved to a different hart.
#[inline]
pub fn cpu_id() -> usize {
    r_tp()
}

/// Enable device interrupts.
///
/// # Safety
///
/// The caller must not be inside a `push_off` section.
#[inline]
pub unsafe fn intr_on() {
    unsafe { Sstatus::read().union(Sstatus::SIE).write() }
}

/// Disable device interrupts.
#[inline]
pub fn intr_off() {
    // Clearing an enable bit cannot create a data race.
    unsafe { Sstatus::read().difference(Sstatus::SIE).write() }
}

/// Are device interrupts enabled?
#[inline]
pub fn intr_get() -> bool {
    Sstatus::read().contains(Sstatus::SIE)
}

/// Flush the TLB.
#[inline]
pub unsafe fn sfence_vma() {
    unsafe {
        // The zero, zero means flush all TLB entries.
        asm!("sfence.vma zero, zero");
    }
}
