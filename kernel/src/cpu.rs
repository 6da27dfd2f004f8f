//! Per-hart state and the matched interrupt-disable nesting
//! (`push_off`/`pop_off`).

use core::cell::UnsafeCell;
use core::ptr;

use crate::arch;
use crate::param::NCPU;
use crate::proc::{Context, Proc};

/// Per-hart state.
pub struct Cpu {
    /// The process running on this hart, or null.
    pub proc: *const Proc,

    /// swtch() here to enter the scheduler.
    pub context: Context,

    /// Depth of push_off() nesting.
    pub noff: u32,

    /// Were interrupts enabled before push_off()?
    pub interrupt_enabled: bool,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            proc: ptr::null(),
            context: Context::new(),
            noff: 0,
            interrupt_enabled: false,
        }
    }
}

/// The table of all harts' `Cpu` structs.
///
/// The current hart's entry can be mutated, so we hand out raw pointers from
/// a shared reference; each hart only ever touches its own entry.
pub struct Cpus([UnsafeCell<Cpu>; NCPU]);

// SAFETY: each thread accesses only the `Cpu` of the hart it runs on.
unsafe impl Sync for Cpus {}

impl Cpus {
    pub const fn new() -> Self {
        Self([const { UnsafeCell::new(Cpu::new()) }; NCPU])
    }

    /// Returns a pointer to this hart's `Cpu` struct.
    ///
    /// It is safe to call this with interrupts enabled, but the returned
    /// pointer may then be stale, since a timer interrupt can move the
    /// process to a different hart.
    pub fn current_raw(&self) -> *mut Cpu {
        self.0[arch::cpu_id()].get()
    }

    /// Returns the process running on this hart, or null.
    pub fn current_proc(&self) -> *const Proc {
        // SAFETY: interrupts are disabled between push_off and pop_off, so
        // this thread stays on this hart while it reads `proc`.
        unsafe {
            push_off();
            let proc = (*self.current_raw()).proc;
            pop_off();
            proc
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        /// push_off/pop_off are like intr_off()/intr_on() except that they
        /// are matched: it takes two pop_off()s to undo two push_off()s.
        /// Also, if interrupts are initially off, then push_off, pop_off
        /// leaves them off.
        ///
        /// # Safety
        ///
        /// Every `push_off` must be paired with a later `pop_off` on the same
        /// hart.
        pub unsafe fn push_off() {
            let old = arch::intr_get();
            arch::intr_off();

            let cpu = crate::kernel::kernel().cpus().current_raw();
            // SAFETY: interrupts are now off, so `cpu` is stable and only
            // this thread touches it.
            unsafe {
                if (*cpu).noff == 0 {
                    (*cpu).interrupt_enabled = old;
                }
                (*cpu).noff += 1;
            }
        }

        /// pop_off() should be paired with push_off().
        /// See push_off() for more details.
        ///
        /// # Safety
        ///
        /// Must be paired with an earlier `push_off` on the same hart.
        pub unsafe fn pop_off() {
            assert!(!arch::intr_get(), "pop_off: interruptible");

            let cpu = crate::kernel::kernel().cpus().current_raw();
            // SAFETY: interrupts are off.
            unsafe {
                assert!((*cpu).noff >= 1, "pop_off");
                (*cpu).noff -= 1;
                if (*cpu).noff == 0 && (*cpu).interrupt_enabled {
                    arch::intr_on();
                }
            }
        }
    } else {
        /// The hosted backend has no interrupts to mask, and parallel test
        /// threads must not share interrupt bookkeeping, so these are no-ops.
        pub unsafe fn push_off() {}

        /// See push_off().
        pub unsafe fn pop_off() {}
    }
}
