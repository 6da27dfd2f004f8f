//! System-call dispatch and argument marshalling.
//!
//! On entry from a user trap, the trapframe holds the syscall number in `a7`
//! and up to six word-sized arguments in `a0..a5`; the dispatcher's result
//! lands back in `a0` (-1 on any error).

use core::mem;

use crate::addr::{Addr, UVAddr};
use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::println;
use crate::proc::CurrentProc;

mod file;
mod proc;

impl Kernel {
    /// Runs the system call `num` for the current process. The numbering is
    /// fixed ABI, shared with the user-side stubs, and append-only; numbers
    /// belonging to features this kernel does not carry fall through to the
    /// unknown-call diagnostic.
    pub fn syscall(&'static self, num: i32, proc: &mut CurrentProc<'_>) -> Result<usize> {
        match num {
            1 => self.sys_fork(proc),
            2 => self.sys_exit(proc),
            3 => self.sys_wait(proc),
            5 => self.sys_read(proc),
            6 => self.sys_kill(proc),
            10 => self.sys_dup(proc),
            11 => self.sys_getpid(proc),
            12 => self.sys_sbrk(proc),
            13 => self.sys_sleep(proc),
            14 => self.sys_uptime(proc),
            16 => self.sys_write(proc),
            21 => self.sys_close(proc),
            _ => {
                println!("{} {}: unknown sys call {}", proc.pid(), proc.name(), num);
                Err(KernelError::UnknownSyscall)
            }
        }
    }
}

impl CurrentProc<'_> {
    /// The raw nth system-call argument register.
    fn arg_raw(&self, n: usize) -> usize {
        let tf = self.trap_frame();
        match n {
            0 => tf.a0,
            1 => tf.a1,
            2 => tf.a2,
            3 => tf.a3,
            4 => tf.a4,
            5 => tf.a5,
            _ => panic!("arg_raw"),
        }
    }

    /// Fetches the nth system-call argument as a 32-bit integer.
    pub fn arg_int(&self, n: usize) -> i32 {
        self.arg_raw(n) as i32
    }

    /// Fetches the nth system-call argument as a user pointer. Legality is
    /// not checked here; the user-memory copies do that.
    pub fn arg_addr(&self, n: usize) -> UVAddr {
        UVAddr::from(self.arg_raw(n))
    }

    /// Fetches the word at `addr` in user memory, bounds-checked against the
    /// process size.
    pub fn fetch_addr(&mut self, addr: UVAddr) -> Result<usize> {
        let size = self.memory().size();
        let addr_val = addr.into_usize();
        if addr_val >= size || addr_val + mem::size_of::<usize>() > size {
            return Err(KernelError::BadAddress);
        }
        self.memory_mut().copy_in(addr)
    }

    /// Fetches the nul-terminated string at `addr` in user memory into
    /// `buf`. Returns the length, excluding the nul.
    pub fn fetch_str(&mut self, addr: UVAddr, buf: &mut [u8]) -> Result<usize> {
        self.memory_mut().copy_in_str(buf, addr)
    }

    /// Fetches the nth system-call argument as a nul-terminated string.
    pub fn arg_str(&mut self, n: usize, buf: &mut [u8]) -> Result<usize> {
        let addr = self.arg_addr(n);
        self.fetch_str(addr, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::PGSIZE;
    use crate::kernel::kernel;
    use crate::test_support::{claim_proc, current_view, kernel_for_tests, retire_proc};

    #[test]
    fn unknown_numbers_are_diagnosed_not_fatal() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);
        assert_eq!(
            kernel().syscall(9999, &mut proc),
            Err(KernelError::UnknownSyscall)
        );
        // Numbers of features this kernel does not carry (e.g. exec = 7)
        // take the same path.
        assert_eq!(
            kernel().syscall(7, &mut proc),
            Err(KernelError::UnknownSyscall)
        );
        assert_eq!(
            kernel().syscall(0, &mut proc),
            Err(KernelError::UnknownSyscall)
        );
        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn arguments_come_from_the_saved_registers() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);
        {
            let tf = proc.trap_frame_mut();
            tf.a0 = usize::MAX; // -1
            tf.a1 = 7;
            tf.a5 = 0x4000;
        }
        assert_eq!(proc.arg_int(0), -1);
        assert_eq!(proc.arg_int(1), 7);
        assert_eq!(proc.arg_addr(5).into_usize(), 0x4000);
        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn string_arguments_are_copied_from_user_memory() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        proc.memory_mut().resize(PGSIZE as isize).unwrap();
        proc.memory_mut()
            .copy_out_bytes(UVAddr::from(128), b"echo\0")
            .unwrap();
        proc.trap_frame_mut().a1 = 128;

        let mut buf = [0u8; 32];
        let len = proc.arg_str(1, &mut buf).unwrap();
        assert_eq!(len, 4);
        assert_eq!(&buf[..4], b"echo");

        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn fetch_addr_is_bounds_checked() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        proc.memory_mut().resize(PGSIZE as isize).unwrap();
        proc.memory_mut()
            .copy_out(UVAddr::from(8), &0xfeed_usize)
            .unwrap();

        assert_eq!(proc.fetch_addr(UVAddr::from(8)), Ok(0xfeed));
        // Reads that poke past the process size are refused.
        assert_eq!(
            proc.fetch_addr(UVAddr::from(PGSIZE - 4)),
            Err(KernelError::BadAddress)
        );
        assert_eq!(
            proc.fetch_addr(UVAddr::from(PGSIZE * 8)),
            Err(KernelError::BadAddress)
        );

        drop(proc);
        retire_proc(slot);
    }
}
