//! Process-related system calls.

use crate::error::{KernelError, Result};
use crate::kernel::Kernel;
use crate::proc::CurrentProc;
use crate::sleepablelock::SleepableGuard;

impl Kernel {
    /// Creates a process, copying the caller.
    /// Returns the child's pid; the child's own fork returns 0.
    pub(super) fn sys_fork(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        Ok(self.procs().fork(proc)? as usize)
    }

    /// Terminates the current process; the status is reported to wait().
    /// No return.
    pub(super) fn sys_exit(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let status = proc.arg_int(0);
        self.procs().exit_current(status, proc)
    }

    /// Waits for a child to exit, storing its status at the given address if
    /// non-null. Returns the child's pid.
    pub(super) fn sys_wait(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let addr = proc.arg_addr(0);
        Ok(self.procs().wait(addr, proc)? as usize)
    }

    /// Terminates the process with the given pid.
    pub(super) fn sys_kill(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let pid = proc.arg_int(0);
        self.procs().kill(pid)?;
        Ok(0)
    }

    /// The current process's pid.
    pub(super) fn sys_getpid(&self, proc: &CurrentProc<'_>) -> Result<usize> {
        Ok(proc.pid() as usize)
    }

    /// Grows (or shrinks) the process's memory by n bytes. Returns the old
    /// size, which is the start of the grown region.
    pub(super) fn sys_sbrk(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let n = proc.arg_int(0);
        let old_size = proc.memory().size();
        proc.memory_mut().resize(n as isize)?;
        Ok(old_size)
    }

    /// Pauses for roughly n clock ticks.
    pub(super) fn sys_sleep(&self, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let n = proc.arg_int(0);
        if n < 0 {
            return Err(KernelError::Argument);
        }

        let mut ticks = self.ticks().lock();
        let start = *ticks;
        while ticks.wrapping_sub(start) < n as u32 {
            if proc.killed() {
                return Err(KernelError::Interrupted);
            }
            ticks.sleep(proc);
        }
        Ok(0)
    }

    /// How many clock-tick interrupts have occurred since boot.
    pub(super) fn sys_uptime(&self, _proc: &CurrentProc<'_>) -> Result<usize> {
        Ok(*self.ticks().lock() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::kernel;
    use crate::proc::ProcState;
    use crate::addr::PGSIZE;
    use crate::test_support::{claim_proc, current_view, kernel_for_tests, retire_proc};

    #[test]
    fn getpid_reports_the_callers_pid() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);
        let pid = proc.pid();
        assert_eq!(kernel().syscall(11, &mut proc), Ok(pid as usize));
        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn sbrk_returns_the_old_break_and_resizes() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);

        proc.trap_frame_mut().a0 = PGSIZE;
        assert_eq!(kernel().syscall(12, &mut proc), Ok(0));
        assert_eq!(proc.memory().size(), PGSIZE);

        proc.trap_frame_mut().a0 = PGSIZE;
        assert_eq!(kernel().syscall(12, &mut proc), Ok(PGSIZE));
        assert_eq!(proc.memory().size(), 2 * PGSIZE);

        // Shrinking past zero fails and leaves the size unchanged.
        proc.trap_frame_mut().a0 = (-(3 * PGSIZE as isize)) as usize;
        assert!(kernel().syscall(12, &mut proc).is_err());
        assert_eq!(proc.memory().size(), 2 * PGSIZE);

        drop(proc);
        retire_proc(slot);
    }

    #[test]
    fn kill_by_syscall_reaches_the_victim() {
        kernel_for_tests();
        let killer_slot = claim_proc();
        let victim_slot = claim_proc();
        let victim_pid = {
            // SAFETY: racy-but-stable read; the slot belongs to this test.
            unsafe { &*victim_slot.info.get_mut_raw() }.pid
        };

        let mut killer = current_view(killer_slot);
        killer.trap_frame_mut().a0 = victim_pid as usize;
        assert_eq!(kernel().syscall(6, &mut killer), Ok(0));
        assert!(victim_slot.killed());
        assert!(matches!(victim_slot.lock().state(), ProcState::Used));

        // Killing a nonexistent pid is a plain error.
        killer.trap_frame_mut().a0 = 1 << 30;
        assert!(kernel().syscall(6, &mut killer).is_err());

        drop(killer);
        retire_proc(victim_slot);
        retire_proc(killer_slot);
    }

    #[test]
    fn uptime_reads_the_tick_counter() {
        kernel_for_tests();
        let slot = claim_proc();
        let mut proc = current_view(slot);
        let before = *kernel().ticks().lock() as usize;
        let reported = kernel().syscall(14, &mut proc).unwrap();
        assert!(reported >= before);
        drop(proc);
        retire_proc(slot);
    }
}
