//! qemu -kernel loads the kernel at 0x80000000 and causes each hart to jump
//! there in machine mode. kernel.ld places this code at 0x80000000.

use core::arch::global_asm;

global_asm!(
    r#"
    .section .text.entry
    .globl _entry
_entry:
    # set up a stack for Rust: STACK0 + 4096 * (hartid + 1).
    la sp, STACK0
    li a0, 4096
    csrr a1, mhartid
    addi a1, a1, 1
    mul a0, a0, a1
    add sp, sp, a0
    # jump to start() in start.rs
    call start
spin:
    j spin
"#
);
