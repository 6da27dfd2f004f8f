//! Trap vectors for supervisor-mode traps taken while in the kernel, and the
//! machine-mode timer interrupt handler.

use core::arch::global_asm;

// Interrupts and exceptions while in supervisor mode come here, on whatever
// the current kernel stack is. Push all registers, call kerneltrap(),
// restore, sret.
global_asm!(
    r#"
    .globl kerneltrap
    .globl kernelvec
    .align 4
kernelvec:
    addi sp, sp, -256

    sd ra, 0(sp)
    sd gp, 8(sp)
    sd tp, 16(sp)
    sd t0, 24(sp)
    sd t1, 32(sp)
    sd t2, 40(sp)
    sd s0, 48(sp)
    sd s1, 56(sp)
    sd a0, 64(sp)
    sd a1, 72(sp)
    sd a2, 80(sp)
    sd a3, 88(sp)
    sd a4, 96(sp)
    sd a5, 104(sp)
    sd a6, 112(sp)
    sd a7, 120(sp)
    sd s2, 128(sp)
    sd s3, 136(sp)
    sd s4, 144(sp)
    sd s5, 152(sp)
    sd s6, 160(sp)
    sd s7, 168(sp)
    sd s8, 176(sp)
    sd s9, 184(sp)
    sd s10, 192(sp)
    sd s11, 200(sp)
    sd t3, 208(sp)
    sd t4, 216(sp)
    sd t5, 224(sp)
    sd t6, 232(sp)

    call kerneltrap

    ld ra, 0(sp)
    ld gp, 8(sp)
    # not tp (contains hartid), in case we moved CPUs
    ld t0, 24(sp)
    ld t1, 32(sp)
    ld t2, 40(sp)
    ld s0, 48(sp)
    ld s1, 56(sp)
    ld a0, 64(sp)
    ld a1, 72(sp)
    ld a2, 80(sp)
    ld a3, 88(sp)
    ld a4, 96(sp)
    ld a5, 104(sp)
    ld a6, 112(sp)
    ld a7, 120(sp)
    ld s2, 128(sp)
    ld s3, 136(sp)
    ld s4, 144(sp)
    ld s5, 152(sp)
    ld s6, 160(sp)
    ld s7, 168(sp)
    ld s8, 176(sp)
    ld s9, 184(sp)
    ld s10, 192(sp)
    ld s11, 200(sp)
    ld t3, 208(sp)
    ld t4, 216(sp)
    ld t5, 224(sp)
    ld t6, 232(sp)

    addi sp, sp, 256

    sret
"#
);

// Machine-mode timer interrupt handler. Arrange the next timer interrupt and
// raise a supervisor software interrupt so the real work happens in
// kerneltrap, then return.
//
// mscratch points at this hart's scratch area:
// scratch[0..2] : register save space
// scratch[3]    : address of CLINT MTIMECMP register
// scratch[4]    : desired interval (in cycles) between timer interrupts
global_asm!(
    r#"
    .globl timervec
    .align 4
timervec:
    csrrw a0, mscratch, a0
    sd a1, 0(a0)
    sd a2, 8(a0)
    sd a3, 16(a0)

    # schedule the next timer interrupt by adding interval to mtimecmp.
    ld a1, 24(a0)
    ld a2, 32(a0)
    ld a3, 0(a1)
    add a3, a3, a2
    sd a3, 0(a1)

    # raise a supervisor software interrupt.
    li a1, 2
    csrw sip, a1

    ld a3, 16(a0)
    ld a2, 8(a0)
    ld a1, 0(a0)
    csrrw a0, mscratch, a0

    mret
"#
);

extern "C" {
    pub fn kernelvec();
    pub fn timervec();
}
