//! The console device: line-buffered input fed by UART interrupts, polled
//! output. Read and write serve either user or kernel buffers, as device
//! code must.

use crate::error::Result;
use crate::proc::CurrentProc;

/// Device major number of the console.
pub const MAJOR: u16 = 1;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use crate::error::KernelError;
        use crate::kernel::kernel;
        use crate::param::INPUT_BUF;
        use crate::proc::{either_copy_in, either_copy_out};
        use crate::sleepablelock::{new_sleepable_lock, SleepableGuard, Sleepablelock};
        use crate::uart;

        const CTRL_D: u8 = b'D' - b'@'; // EOF
        const CTRL_P: u8 = b'P' - b'@'; // process listing
        const CTRL_U: u8 = b'U' - b'@'; // kill line
        const CTRL_H: u8 = b'H' - b'@'; // backspace
        const DELETE: u8 = 0x7f;

        struct ConsoleInner {
            buf: [u8; INPUT_BUF],
            /// Read index.
            r: usize,
            /// Write index.
            w: usize,
            /// Edit index.
            e: usize,
        }

        pub struct Console {
            inner: Sleepablelock<ConsoleInner>,
        }

        impl Console {
            pub const fn new() -> Self {
                Self {
                    inner: new_sleepable_lock(
                        "cons",
                        ConsoleInner {
                            buf: [0; INPUT_BUF],
                            r: 0,
                            w: 0,
                            e: 0,
                        },
                    ),
                }
            }

            /// Echoes one character, rendering backspace as erase.
            fn echo(c: u8) {
                if c == CTRL_H || c == DELETE {
                    uart::putc_sync(CTRL_H);
                    uart::putc_sync(b' ');
                    uart::putc_sync(CTRL_H);
                } else {
                    uart::putc_sync(c);
                }
            }

            fn write(&self, user_src: bool, src: usize, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
                for i in 0..n {
                    let mut byte = [0u8; 1];
                    either_copy_in(proc, user_src, src + i, &mut byte)?;
                    uart::putc_sync(byte[0]);
                }
                Ok(n)
            }

            fn read(&self, user_dst: bool, dst: usize, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
                let mut inner = self.inner.lock();
                let mut read = 0;
                while read < n {
                    // Wait until the interrupt handler has put some input
                    // into the buffer.
                    while inner.r == inner.w {
                        if proc.killed() {
                            return Err(KernelError::Interrupted);
                        }
                        inner.sleep(proc);
                    }

                    let c = inner.buf[inner.r % INPUT_BUF];
                    inner.r += 1;

                    if c == CTRL_D {
                        if read > 0 {
                            // Save ^D for next time, to make sure the caller
                            // gets a whole line.
                            inner.r -= 1;
                        }
                        break;
                    }

                    either_copy_out(proc, user_dst, dst + read, &[c])?;
                    read += 1;

                    if c == b'\n' {
                        // A whole line has arrived.
                        break;
                    }
                }
                Ok(read)
            }

            /// Handles one input character from the UART interrupt: console
            /// control keys, line editing, echo, and waking readers when a
            /// line is complete.
            pub fn intr(&self, c: u8) {
                let mut inner = self.inner.lock();
                match c {
                    CTRL_P => {
                        // SAFETY: lock-free debugging dump, racy by design.
                        unsafe { kernel().procs().dump() };
                    }
                    CTRL_U => {
                        while inner.e != inner.w && inner.buf[(inner.e - 1) % INPUT_BUF] != b'\n' {
                            inner.e -= 1;
                            Self::echo(CTRL_H);
                        }
                    }
                    CTRL_H | DELETE => {
                        if inner.e != inner.w {
                            inner.e -= 1;
                            Self::echo(CTRL_H);
                        }
                    }
                    _ => {
                        if c != 0 && inner.e - inner.r < INPUT_BUF {
                            let c = if c == b'\r' { b'\n' } else { c };
                            Self::echo(c);
                            let e = inner.e;
                            inner.buf[e % INPUT_BUF] = c;
                            inner.e += 1;
                            if c == b'\n' || c == CTRL_D || inner.e - inner.r == INPUT_BUF {
                                // Wake up read() if a whole line (or EOF) has
                                // arrived.
                                inner.w = inner.e;
                                inner.wakeup();
                            }
                        }
                    }
                }
            }
        }

        pub fn read(user_dst: bool, dst: usize, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
            kernel().console().read(user_dst, dst, n, proc)
        }

        pub fn write(user_src: bool, src: usize, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
            kernel().console().write(user_src, src, n, proc)
        }
    } else {
        use crate::error::KernelError;
        use crate::proc::either_copy_in;

        /// The hosted backend has no input source.
        pub fn read(_user_dst: bool, _dst: usize, _n: usize, _proc: &mut CurrentProc<'_>) -> Result<usize> {
            Err(KernelError::BadFd)
        }

        /// Validates and drains the bytes, discarding them; the hosted
        /// backend has no UART to write to.
        pub fn write(user_src: bool, src: usize, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
            let mut written = 0;
            let mut chunk = [0u8; 64];
            while written < n {
                let take = core::cmp::min(chunk.len(), n - written);
                either_copy_in(proc, user_src, src + written, &mut chunk[..take])?;
                written += take;
            }
            Ok(n)
        }
    }
}
