//! Per-process state and the primitives that suspend and resume it.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;
use core::str;
use core::sync::atomic::{AtomicBool, Ordering};

use static_assertions::const_assert_eq;

use crate::addr::UVAddr;
use crate::arch;
use crate::error::Result;
use crate::file::RcFile;
use crate::fs::RcInode;
use crate::kernel::kernel;
use crate::page::Page;
use crate::param::{MAXPROCNAME, NOFILE, ROOTDEV};
use crate::spinlock::Spinlock;
use crate::vm::UserMemory;

mod procs;
mod wait_channel;

pub use procs::Procs;
pub use wait_channel::{ChannelId, WaitChannel};

pub type Pid = i32;

/// Saved registers for kernel context switches: the callee-saved registers
/// plus `ra` and `sp`. Everything else is on the parked kernel stack.
/// The layout is known to the swtch assembly.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

const_assert_eq!(mem::size_of::<Context>(), 14 * 8);

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

/// Per-process data for the trap handling code in the trampoline page.
/// Sits in a page by itself, mapped just under the trampoline page in the
/// process's page table and not specially mapped in the kernel's.
///
/// uservec saves the user registers here and loads `kernel_sp`,
/// `kernel_hartid`, `kernel_satp` and `kernel_trap` to reenter the kernel;
/// usertrapret and userret fill in the `kernel_*` fields, restore the user
/// registers and return to user space. The offsets are known to the
/// trampoline assembly.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct TrapFrame {
    /*   0 */ pub kernel_satp: usize, // kernel page table
    /*   8 */ pub kernel_sp: usize, // top of process's kernel stack
    /*  16 */ pub kernel_trap: usize, // usertrap()
    /*  24 */ pub epc: usize, // saved user program counter
    /*  32 */ pub kernel_hartid: usize, // saved kernel tp
    /*  40 */ pub ra: usize,
    /*  48 */ pub sp: usize,
    /*  56 */ pub gp: usize,
    /*  64 */ pub tp: usize,
    /*  72 */ pub t0: usize,
    /*  80 */ pub t1: usize,
    /*  88 */ pub t2: usize,
    /*  96 */ pub s0: usize,
    /* 104 */ pub s1: usize,
    /* 112 */ pub a0: usize,
    /* 120 */ pub a1: usize,
    /* 128 */ pub a2: usize,
    /* 136 */ pub a3: usize,
    /* 144 */ pub a4: usize,
    /* 152 */ pub a5: usize,
    /* 160 */ pub a6: usize,
    /* 168 */ pub a7: usize,
    /* 176 */ pub s2: usize,
    /* 184 */ pub s3: usize,
    /* 192 */ pub s4: usize,
    /* 200 */ pub s5: usize,
    /* 208 */ pub s6: usize,
    /* 216 */ pub s7: usize,
    /* 224 */ pub s8: usize,
    /* 232 */ pub s9: usize,
    /* 240 */ pub s10: usize,
    /* 248 */ pub s11: usize,
    /* 256 */ pub t3: usize,
    /* 264 */ pub t4: usize,
    /* 272 */ pub t5: usize,
    /* 280 */ pub t6: usize,
}

const_assert_eq!(mem::size_of::<TrapFrame>(), 36 * 8);

/// The state of a process slot.
///
/// A sleeping slot always carries the channel it is parked on, and a zombie
/// always carries its exit status; neither can exist without the other half.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    Unused,
    Used,
    Sleeping { channel: ChannelId },
    Runnable,
    Running,
    Zombie { xstate: i32 },
}

impl ProcState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Sleeping { .. } => "sleep ",
            ProcState::Runnable => "runble",
            ProcState::Running => "run   ",
            ProcState::Zombie { .. } => "zombie",
        }
    }
}

/// The slot's lock must be held when using these.
pub struct ProcInfo {
    /// Process state.
    pub state: ProcState,

    /// Process ID; zero while the slot is unused.
    pub pid: Pid,
}

/// These are private to the process, so the slot's lock need not be held.
pub struct ProcData {
    /// Virtual address of this slot's kernel stack. Assigned once at boot;
    /// survives across slot generations.
    pub kstack: usize,

    /// The trapframe page, or null.
    pub trap_frame: *mut TrapFrame,

    /// User address space, or none.
    pub memory: Option<UserMemory>,

    /// swtch() here to run the process.
    pub context: Context,

    /// Open files.
    pub open_files: [Option<RcFile>; NOFILE],

    /// Current directory.
    pub cwd: Option<RcInode>,

    /// Process name (debugging).
    pub name: [u8; MAXPROCNAME],
}

impl ProcData {
    const fn new() -> Self {
        Self {
            kstack: 0,
            trap_frame: ptr::null_mut(),
            memory: None,
            context: Context::new(),
            open_files: [const { None }; NOFILE],
            cwd: None,
            name: [0; MAXPROCNAME],
        }
    }
}

/// One slot of the process table.
pub struct Proc {
    /// This slot's index in the table; used as the key of the parent map.
    idx: usize,

    pub info: Spinlock<ProcInfo>,

    data: UnsafeCell<ProcData>,

    /// Channel this slot's parent waits on for a child to die.
    child_channel: WaitChannel,

    /// If true, the process has been killed. Set once, observed at the next
    /// user-return boundary; atomic so readers need not take the slot lock.
    killed: AtomicBool,
}

// SAFETY: `info` is lock-protected, `killed` is atomic, and `data` is only
// touched by the slot's owner (see `CurrentProc` and `ProcGuard`).
unsafe impl Sync for Proc {}

impl Proc {
    const fn new() -> Self {
        Self {
            idx: 0,
            info: crate::spinlock::new_spinlock(
                "proc",
                ProcInfo {
                    state: ProcState::Unused,
                    pid: 0,
                },
            ),
            data: UnsafeCell::new(ProcData::new()),
            child_channel: WaitChannel::new(),
            killed: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    /// Marks the process killed. It terminates at its next user-return
    /// boundary.
    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Acquires the slot's lock.
    pub fn lock(&self) -> ProcGuard<'_> {
        mem::forget(self.info.lock());
        ProcGuard { proc: self }
    }
}

/// A held slot lock.
///
/// # Safety invariant
///
/// `proc.info`'s lock is held for the lifetime of the guard.
pub struct ProcGuard<'s> {
    proc: &'s Proc,
}

impl<'s> ProcGuard<'s> {
    pub fn deref_info(&self) -> &ProcInfo {
        // SAFETY: the lock is held.
        unsafe { &*self.proc.info.get_mut_raw() }
    }

    pub fn deref_mut_info(&mut self) -> &mut ProcInfo {
        // SAFETY: the lock is held and `&mut self` is exclusive.
        unsafe { &mut *self.proc.info.get_mut_raw() }
    }

    pub fn state(&self) -> ProcState {
        self.deref_info().state
    }

    /// Returns a mutable reference to the slot's private data.
    ///
    /// # Safety
    ///
    /// There must be no `CurrentProc` for this slot: either the slot has not
    /// become runnable yet (allocation, fork), or it can never run again
    /// (reaping).
    pub unsafe fn deref_mut_data(&mut self) -> &mut ProcData {
        unsafe { &mut *self.proc.data.get() }
    }

    /// Wakes the slot if it is sleeping, so it can observe its killed flag or
    /// a completed condition.
    pub fn awaken(&mut self) {
        if matches!(self.state(), ProcState::Sleeping { .. }) {
            self.deref_mut_info().state = ProcState::Runnable;
        }
    }

    /// Switch to the hart's scheduler context. Must hold only this slot's
    /// lock and have already changed the state away from Running.
    ///
    /// Saves and restores `interrupt_enabled` because it is a property of
    /// this kernel thread, not of the hart.
    ///
    /// # Safety
    ///
    /// The slot must be the current process of this hart, with its kernel
    /// stack set up by a previous swtch or by alloc.
    pub unsafe fn sched(&mut self) {
        assert!(!arch::intr_get(), "sched interruptible");
        assert!(
            !matches!(self.state(), ProcState::Running),
            "sched running"
        );

        let cpu = kernel().cpus().current_raw();
        // SAFETY: interrupts are disabled (the slot lock is held).
        unsafe {
            assert_eq!((*cpu).noff, 1, "sched locks");
            let interrupt_enabled = (*cpu).interrupt_enabled;

            let context = ptr::addr_of_mut!((*self.proc.data.get()).context);
            arch::swtch(context, ptr::addr_of_mut!((*cpu).context));

            // We cannot reuse `cpu`: swtch may have moved this thread to
            // another hart.
            let cpu = kernel().cpus().current_raw();
            (*cpu).interrupt_enabled = interrupt_enabled;
        }
    }

    /// Returns the slot to `Unused`, freeing the trapframe page and the user
    /// address space. Safe to call on a partially initialized slot.
    ///
    /// # Safety
    ///
    /// There must be no `CurrentProc` for this slot.
    pub unsafe fn clear(&mut self) {
        // SAFETY: caller guarantees exclusive access to the data.
        let data = unsafe { self.deref_mut_data() };

        let trap_frame = mem::replace(&mut data.trap_frame, ptr::null_mut());
        if !trap_frame.is_null() {
            // SAFETY: a non-null trap_frame uniquely owns its page.
            kernel().free_page(unsafe { Page::from_usize(trap_frame as usize) });
        }

        // Dropping the address space unmaps and frees the user pages.
        data.memory = None;
        data.name[0] = 0;

        let info = self.deref_mut_info();
        info.pid = 0;
        info.state = ProcState::Unused;

        self.proc.killed.store(false, Ordering::Release);
    }

    /// Temporarily releases the slot's lock and calls `f`. The lock is held
    /// again when this returns.
    pub fn reacquire_after<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce(&Proc) -> U,
    {
        // SAFETY: the release is temporary, and `self` cannot be used inside
        // `f` (it only sees the bare `&Proc`).
        unsafe { self.proc.info.unlock() };
        let result = f(self.proc);
        mem::forget(self.proc.info.lock());
        result
    }
}

impl core::ops::Deref for ProcGuard<'_> {
    type Target = Proc;

    fn deref(&self) -> &Self::Target {
        self.proc
    }
}

impl Drop for ProcGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard held the lock.
        unsafe { self.proc.info.unlock() };
    }
}

/// The current hart's running process.
///
/// # Safety invariant
///
/// `inner` is the process installed on this hart, so this thread has
/// exclusive access to its `ProcData`; at most one `CurrentProc` exists per
/// slot at a time.
pub struct CurrentProc<'p> {
    inner: &'p Proc,
}

impl<'p> CurrentProc<'p> {
    /// # Safety
    ///
    /// `proc` must be owned by this thread — installed on this hart by the
    /// scheduler, or (before it ever becomes runnable) claimed with its lock
    /// released to no one else. At most one `CurrentProc` may exist for it.
    pub unsafe fn new_unchecked(proc: &'p Proc) -> Self {
        Self { inner: proc }
    }

    pub fn pid(&self) -> Pid {
        // SAFETY: pid is not modified while the process runs.
        unsafe { (*self.inner.info.get_mut_raw()).pid }
    }

    pub fn data(&self) -> &ProcData {
        // SAFETY: invariant of CurrentProc.
        unsafe { &*self.inner.data.get() }
    }

    pub fn data_mut(&mut self) -> &mut ProcData {
        // SAFETY: invariant of CurrentProc, and `&mut self` is exclusive.
        unsafe { &mut *self.inner.data.get() }
    }

    pub fn trap_frame(&self) -> &TrapFrame {
        // SAFETY: a running process always has a trapframe page.
        unsafe { &*self.data().trap_frame }
    }

    pub fn trap_frame_mut(&mut self) -> &mut TrapFrame {
        // SAFETY: as above.
        unsafe { &mut *self.data_mut().trap_frame }
    }

    pub fn memory(&self) -> &UserMemory {
        self.data().memory.as_ref().expect("no user memory")
    }

    pub fn memory_mut(&mut self) -> &mut UserMemory {
        self.data_mut().memory.as_mut().expect("no user memory")
    }

    /// The process name, for diagnostics.
    pub fn name(&self) -> &str {
        let name = &self.data().name;
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        str::from_utf8(&name[..len]).unwrap_or("???")
    }

    /// Gives up the hart for one scheduling round.
    pub fn yield_cpu(&self) {
        let mut guard = self.inner.lock();
        guard.deref_mut_info().state = ProcState::Runnable;
        // SAFETY: we hold the slot lock and are no longer Running.
        unsafe { guard.sched() };
    }
}

impl<'p> core::ops::Deref for CurrentProc<'p> {
    type Target = Proc;

    fn deref(&self) -> &Self::Target {
        self.inner
    }
}

/// Returns the process running on this hart, if any.
///
/// # Safety
///
/// At most one `CurrentProc` may exist per thread; do not call while another
/// is alive.
pub unsafe fn current() -> Option<CurrentProc<'static>> {
    let proc = kernel().cpus().current_proc();
    // SAFETY: a non-null cpu.proc is the slot running on this hart.
    unsafe { proc.as_ref().map(|p| CurrentProc::new_unchecked(p)) }
}

/// Copies `src` to either a user destination (through the current process's
/// page table) or a kernel destination, so device code can serve both.
pub fn either_copy_out(
    proc: &mut CurrentProc<'_>,
    user_dst: bool,
    dst: usize,
    src: &[u8],
) -> Result<()> {
    if user_dst {
        proc.memory_mut().copy_out_bytes(UVAddr::from(dst), src)
    } else {
        // SAFETY: a kernel destination comes from a kernel caller that owns
        // the buffer.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst as *mut u8, src.len()) };
        Ok(())
    }
}

/// The `copy_in` counterpart of `either_copy_out`.
pub fn either_copy_in(
    proc: &mut CurrentProc<'_>,
    user_src: bool,
    src: usize,
    dst: &mut [u8],
) -> Result<()> {
    if user_src {
        proc.memory_mut().copy_in_bytes(dst, UVAddr::from(src))
    } else {
        // SAFETY: as in either_copy_out.
        unsafe { ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}

/// A fork child's very first scheduling by `scheduler()` swtch-es here, with
/// the slot's lock still held.
pub unsafe extern "C" fn forkret() -> ! {
    static FIRST: AtomicBool = AtomicBool::new(true);

    // SAFETY: the scheduler installed this slot on this hart just before
    // switching to us, and no other CurrentProc exists on this thread.
    let proc = unsafe { current().expect("forkret: no process") };

    // Still holding the slot's lock from scheduler().
    unsafe { proc.info.unlock() };

    if FIRST
        .compare_exchange(true, false, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
    {
        // Filesystem initialization must run in the context of a regular
        // process (it may sleep), so it cannot run from main().
        kernel().fs_init(ROOTDEV);
    }

    cfg_if::cfg_if! {
        if #[cfg(target_arch = "riscv64")] {
            // Return to user space, mimicking usertrap()'s return.
            unsafe { crate::trap::usertrapret(proc) }
        } else {
            drop(proc);
            unreachable!("forkret: hosted backend never schedules");
        }
    }
}
