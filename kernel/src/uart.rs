//! Low-level driver for the 16550a UART.

use core::ptr;
use core::sync::atomic::Ordering;

use crate::cpu::{pop_off, push_off};
use crate::kernel::kernel;
use crate::memlayout::UART0;
use crate::printf::PANICKED;

// The UART control registers, memory-mapped at UART0. Some have different
// meanings for read vs write.
const RHR: usize = 0; // receive holding register (for input bytes)
const THR: usize = 0; // transmit holding register (for output bytes)
const IER: usize = 1; // interrupt enable register
const IER_RX_ENABLE: u8 = 1 << 0;
const IER_TX_ENABLE: u8 = 1 << 1;
const FCR: usize = 2; // FIFO control register
const FCR_FIFO_ENABLE: u8 = 1 << 0;
const FCR_FIFO_CLEAR: u8 = 3 << 1; // clear the content of the two FIFOs
const LCR: usize = 3; // line control register
const LCR_EIGHT_BITS: u8 = 3;
const LCR_BAUD_LATCH: u8 = 1 << 7; // special mode to set baud rate
const LSR: usize = 5; // line status register
const LSR_RX_READY: u8 = 1 << 0; // input is waiting to be read from RHR
const LSR_TX_IDLE: u8 = 1 << 5; // THR can accept another character to send

fn reg(offset: usize) -> *mut u8 {
    (UART0 + offset) as *mut u8
}

fn read_reg(offset: usize) -> u8 {
    // SAFETY: UART0 MMIO registers are mapped and always readable.
    unsafe { ptr::read_volatile(reg(offset)) }
}

fn write_reg(offset: usize, value: u8) {
    // SAFETY: as above.
    unsafe { ptr::write_volatile(reg(offset), value) }
}

/// # Safety
///
/// Must be called once, before any console output.
pub unsafe fn init() {
    // disable interrupts.
    write_reg(IER, 0x00);

    // special mode to set baud rate.
    write_reg(LCR, LCR_BAUD_LATCH);

    // LSB and MSB for baud rate of 38.4K.
    write_reg(0, 0x03);
    write_reg(1, 0x00);

    // leave set-baud mode and set word length to 8 bits, no parity.
    write_reg(LCR, LCR_EIGHT_BITS);

    // reset and enable FIFOs.
    write_reg(FCR, FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);

    // enable receive interrupts.
    write_reg(IER, IER_TX_ENABLE | IER_RX_ENABLE);
}

/// Transmits one character, polling until the UART accepts it. Used by the
/// console and by printf; deliberately interrupt-free so diagnostics get out
/// even when the machine is wedged.
pub fn putc_sync(c: u8) {
    unsafe { push_off() };

    if PANICKED.load(Ordering::Acquire) {
        // Freeze any other hart that tries to print past a panic.
        loop {
            core::hint::spin_loop();
        }
    }

    while read_reg(LSR) & LSR_TX_IDLE == 0 {
        core::hint::spin_loop();
    }
    write_reg(THR, c);

    unsafe { pop_off() };
}

/// Reads one input character, if any is waiting.
fn getc() -> Option<u8> {
    if read_reg(LSR) & LSR_RX_READY != 0 {
        Some(read_reg(RHR))
    } else {
        None
    }
}

/// Handles a UART interrupt: drains received characters into the console.
pub fn intr() {
    while let Some(c) = getc() {
        kernel().console().intr(c);
    }
}
