//! Machine-mode boot: entry.rs jumps here on every hart, on stack0.

use core::arch::asm;

use super::asm::{
    r_mhartid, w_medeleg, w_mepc, w_mideleg, w_mscratch, w_mtvec, w_pmpaddr0, w_pmpcfg0, w_satp,
    w_tp, Mie, Mstatus, Sie,
};
use super::kernelvec::timervec;
use crate::kernel::main;
use crate::memlayout::{clint_mtimecmp, CLINT_MTIME};
use crate::param::NCPU;

/// entry.rs needs one stack per hart.
#[repr(C, align(16))]
pub struct Stack([[u8; 4096]; NCPU]);

#[no_mangle]
pub static mut STACK0: Stack = Stack([[0; 4096]; NCPU]);

/// A scratch area per hart for machine-mode timer interrupts.
static mut TIMER_SCRATCH: [[usize; 5]; NCPU] = [[0; 5]; NCPU];

/// Timer interrupt interval in cycles; about 1/10th second in qemu.
const TIMER_INTERVAL: usize = 1_000_000;

#[no_mangle]
pub unsafe extern "C" fn start() -> ! {
    // set M Previous Privilege mode to Supervisor, for mret.
    let mut x = Mstatus::read();
    x.remove(Mstatus::MPP_MASK);
    x.insert(Mstatus::MPP_S);
    unsafe { x.write() };

    // set M Exception Program Counter to main, for mret.
    unsafe { w_mepc(main as usize) };

    // disable paging for now.
    unsafe { w_satp(0) };

    // delegate all interrupts and exceptions to supervisor mode.
    unsafe { w_medeleg(0xffff) };
    unsafe { w_mideleg(0xffff) };
    unsafe {
        Sie::read()
            .union(Sie::SEIE | Sie::STIE | Sie::SSIE)
            .write()
    };

    // configure Physical Memory Protection to give supervisor mode
    // access to all of physical memory.
    unsafe { w_pmpaddr0(0x3f_ffff_ffff_ffff) };
    unsafe { w_pmpcfg0(0xf) };

    // ask for clock interrupts.
    unsafe { timer_init() };

    // keep each hart's id in its tp register, for cpu_id().
    unsafe { w_tp(r_mhartid()) };

    // switch to supervisor mode and jump to main().
    unsafe { asm!("mret", options(noreturn)) }
}

/// Arrange to receive timer interrupts in machine mode, which arrive at
/// timervec in kernelvec.rs and turn into supervisor software interrupts.
unsafe fn timer_init() {
    // each hart has a separate source of timer interrupts.
    let id = r_mhartid();

    // ask the CLINT for a timer interrupt.
    // SAFETY: CLINT_MTIMECMP(id) is a valid CLINT register on qemu-virt.
    unsafe {
        *(clint_mtimecmp(id) as *mut usize) = *(CLINT_MTIME as *const usize) + TIMER_INTERVAL
    };

    // prepare information in TIMER_SCRATCH for timervec:
    // scratch[0..2] : space for timervec to save registers.
    // scratch[3]    : address of this hart's CLINT MTIMECMP register.
    // scratch[4]    : desired interval between timer interrupts.
    // SAFETY: each hart touches only its own scratch row, once, at boot.
    let scratch = unsafe { &mut *core::ptr::addr_of_mut!(TIMER_SCRATCH[id]) };
    scratch[3] = clint_mtimecmp(id);
    scratch[4] = TIMER_INTERVAL;
    unsafe { w_mscratch(scratch.as_ptr() as usize) };

    // set the machine-mode trap handler.
    unsafe { w_mtvec(timervec as usize) };

    // enable machine-mode interrupts.
    unsafe { Mstatus::read().union(Mstatus::MIE).write() };

    // enable machine-mode timer interrupts.
    unsafe { Mie::read().union(Mie::MTIE).write() };
}
