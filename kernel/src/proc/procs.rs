//! The process table and the operations over it: allocation, fork, exit,
//! wait, kill, wakeup and the per-hart scheduler loop.

use core::ptr;
use core::str;

use arrayvec::ArrayVec;
use itertools::izip;
use spin::Once;

use super::{forkret, ChannelId, Context, CurrentProc, Pid, Proc, ProcGuard, ProcState, TrapFrame};
use crate::addr::{Addr, PAddr, UVAddr, PGSIZE};
use crate::arch;
use crate::error::{KernelError, Result};
use crate::kernel::kernel;
use crate::memlayout::kstack;
use crate::param::{MAXPROCNAME, NPROC};
use crate::println;
use crate::spinlock::{new_spinlock, Spinlock};
use crate::vm::UserMemory;

/// A user program that reaps children and otherwise dozes:
///
///     start:
///         li a0, 0
///         li a7, 3          # wait(0)
///         ecall
///         li a0, 10
///         li a7, 13         # sleep(10)
///         ecall
///         jal zero, start
const INITCODE: [u8; 28] = [
    0x13, 0x05, 0x00, 0x00, // li a0, 0
    0x93, 0x08, 0x30, 0x00, // li a7, 3
    0x73, 0x00, 0x00, 0x00, // ecall
    0x13, 0x05, 0xa0, 0x00, // li a0, 10
    0x93, 0x08, 0xd0, 0x00, // li a7, 13
    0x73, 0x00, 0x00, 0x00, // ecall
    0x6f, 0xf0, 0x9f, 0xfe, // jal zero, start
];

/// The parent edges of the process tree, child index → parent index.
///
/// Living inside the wait lock's `Spinlock` means a parent edge cannot be
/// read or written without holding the wait lock: the lock order
/// wait lock → slot lock is enforced by construction.
pub struct ParentMap([Option<usize>; NPROC]);

impl ParentMap {
    const fn new() -> Self {
        Self([None; NPROC])
    }

    pub fn parent_of(&self, child: usize) -> Option<usize> {
        self.0[child]
    }

    fn set(&mut self, child: usize, parent: usize) {
        self.0[child] = Some(parent);
    }

    fn clear(&mut self, child: usize) {
        self.0[child] = None;
    }

    /// Reassigns every child of `from` to `to`. Returns true if any edge
    /// moved.
    fn reparent(&mut self, from: usize, to: usize) -> bool {
        let mut moved = false;
        for edge in self.0.iter_mut() {
            if *edge == Some(from) {
                *edge = Some(to);
                moved = true;
            }
        }
        moved
    }
}

/// The process table.
pub struct Procs {
    /// The pid counter and its dedicated lock. Acquired only while already
    /// holding a slot lock, never the other way around.
    nextpid: Spinlock<Pid>,

    pool: [Proc; NPROC],

    /// The slot index of the init process, set once at boot.
    init_idx: Once<usize>,

    /// Helps ensure that wakeups of wait()ing parents are not lost, and
    /// guards every parent edge. Must be acquired before any slot lock.
    wait_lock: Spinlock<ParentMap>,
}

impl Procs {
    pub const fn new() -> Self {
        let mut pool = [const { Proc::new() }; NPROC];
        let mut i = 0;
        while i < NPROC {
            pool[i].idx = i;
            i += 1;
        }
        Self {
            nextpid: new_spinlock("nextpid", 1),
            pool,
            init_idx: Once::new(),
            wait_lock: new_spinlock("wait_lock", ParentMap::new()),
        }
    }

    /// Initializes the table at boot time: records each slot's fixed kernel
    /// stack address.
    pub fn init(&self) {
        for p in self.pool.iter() {
            // SAFETY: boot is single-threaded; no slot is in use yet.
            unsafe { (*p.data.get()).kstack = kstack(p.idx) };
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proc> {
        self.pool.iter()
    }

    fn get(&self, idx: usize) -> &Proc {
        &self.pool[idx]
    }

    fn initial_index(&self) -> usize {
        *self.init_idx.get().expect("no init process")
    }

    /// A fresh, never-reused process id.
    fn alloc_pid(&self) -> Pid {
        let mut next = self.nextpid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// Scans the table for an unused slot. If one is found, fully initializes
    /// it to run in the kernel and returns with the slot's lock still held;
    /// finishing the initialization and releasing the lock is the caller's
    /// job. On any failure the slot is returned to `Unused` and nothing is
    /// leaked.
    pub fn alloc(&self) -> Result<ProcGuard<'_>> {
        for p in self.pool.iter() {
            let mut guard = p.lock();
            if !matches!(guard.state(), ProcState::Unused) {
                continue;
            }

            // Slot lock first, pid lock inside it: the mandated order.
            let pid = self.alloc_pid();
            {
                let info = guard.deref_mut_info();
                info.pid = pid;
                info.state = ProcState::Used;
            }

            // SAFETY: the slot cannot run yet, so no CurrentProc exists.
            let data = unsafe { guard.deref_mut_data() };

            // Allocate a trapframe page.
            let trap_frame = match kernel().alloc_page() {
                Some(page) => page,
                None => {
                    // SAFETY: as above.
                    unsafe { guard.clear() };
                    return Err(KernelError::OutOfMemory);
                }
            };
            data.trap_frame = trap_frame.into_usize() as *mut TrapFrame;

            // An empty user page table, with trampoline and trapframe pages
            // mapped.
            match UserMemory::new(PAddr::from(data.trap_frame as usize), None) {
                Ok(memory) => data.memory = Some(memory),
                Err(e) => {
                    // SAFETY: as above.
                    unsafe { guard.clear() };
                    return Err(e);
                }
            }

            // Set up a new context to start executing at forkret, which
            // returns to user space.
            data.context = Context::new();
            data.context.ra = forkret as usize;
            data.context.sp = data.kstack + PGSIZE;

            return Ok(guard);
        }
        Err(KernelError::OutOfProcs)
    }

    /// Sets up the first user process.
    pub fn user_init(&self) {
        let mut guard = self.alloc().expect("user_init: alloc");

        // SAFETY: the slot is not runnable yet.
        let data = unsafe { guard.deref_mut_data() };

        // Load the embedded first user program.
        data.memory
            .as_mut()
            .unwrap()
            .load_initcode(&INITCODE)
            .expect("user_init: initcode");

        // Prepare for the very first "return" from kernel to user.
        // SAFETY: alloc gave the slot a trapframe page.
        let tf = unsafe { &mut *data.trap_frame };
        tf.epc = 0; // user program counter
        tf.sp = PGSIZE; // user stack pointer

        data.name[..8].copy_from_slice(b"initcode");
        data.cwd = Some(kernel().itable().root());

        self.init_idx.call_once(|| guard.index());
        guard.deref_mut_info().state = ProcState::Runnable;
    }

    /// Creates a new process, copying the parent. Sets up the child's kernel
    /// stack to return as if from the fork() system call.
    pub fn fork(&self, proc: &mut CurrentProc<'_>) -> Result<Pid> {
        // Allocate a child slot; its lock is held from here on.
        let mut np = self.alloc()?;

        // SAFETY: the child cannot run yet, so no CurrentProc exists for it.
        let npdata = unsafe { np.deref_mut_data() };
        let pdata = proc.data_mut();

        // Copy user memory from parent to child.
        if let Err(e) = pdata
            .memory
            .as_mut()
            .unwrap()
            .clone_into(npdata.memory.as_mut().unwrap())
        {
            // SAFETY: as above.
            unsafe { np.clear() };
            return Err(e);
        }

        // Copy the saved user registers, then make fork return 0 in the
        // child.
        // SAFETY: both slots own their trapframe pages.
        unsafe {
            *npdata.trap_frame = *pdata.trap_frame;
            (*npdata.trap_frame).a0 = 0;
        }

        // Increment reference counts on open file descriptors.
        for (nf, f) in izip!(npdata.open_files.iter_mut(), pdata.open_files.iter()) {
            if let Some(file) = f {
                *nf = Some(file.dup());
            }
        }
        npdata.cwd = Some(pdata.cwd.as_ref().expect("fork: no cwd").dup());

        npdata.name = pdata.name;

        let pid = np.deref_info().pid;
        let child_idx = np.index();
        let parent_idx = proc.index();

        // The parent edge must be written under the wait lock, and the lock
        // order forbids taking it while a slot lock is held; so release the
        // child's lock around the write. The edge must exist before the
        // child can be reaped or reparented.
        np.reacquire_after(|_| {
            let mut parents = self.wait_lock.lock();
            parents.set(child_idx, parent_idx);
        });

        np.deref_mut_info().state = ProcState::Runnable;

        Ok(pid)
    }

    /// Wakes up all slots sleeping on `target`, other than the caller's own.
    /// Must be called without any slot lock held.
    pub fn wakeup_pool(&self, target: ChannelId) {
        let current = kernel().cpus().current_proc();
        for p in self.pool.iter() {
            if ptr::eq(p, current) {
                continue;
            }
            let mut guard = p.lock();
            if let ProcState::Sleeping { channel } = guard.state() {
                if channel == target {
                    guard.deref_mut_info().state = ProcState::Runnable;
                }
            }
        }
    }

    /// Kills the process with the given pid. The victim won't exit until it
    /// next tries to return to user space (see usertrap in trap.rs).
    pub fn kill(&self, pid: Pid) -> Result<()> {
        for p in self.pool.iter() {
            let mut guard = p.lock();
            if guard.deref_info().pid == pid && !matches!(guard.state(), ProcState::Unused) {
                p.kill();
                // A sleeper must wake to observe the flag.
                guard.awaken();
                return Ok(());
            }
        }
        Err(KernelError::NotFound)
    }

    /// Waits for a child to exit and returns its pid, reaping the zombie.
    /// If `addr` is non-null, the child's exit status is copied there first.
    pub fn wait(&self, addr: UVAddr, proc: &mut CurrentProc<'_>) -> Result<Pid> {
        let mut parents = self.wait_lock.lock();

        loop {
            // Scan through the table looking for exited children.
            let mut havekids = false;
            for (i, p) in self.pool.iter().enumerate() {
                if parents.parent_of(i) != Some(proc.index()) {
                    continue;
                }
                // Make sure the child isn't still in exit() or swtch().
                let mut np = p.lock();

                havekids = true;
                if let ProcState::Zombie { xstate } = np.state() {
                    let pid = np.deref_info().pid;
                    if !addr.is_null() {
                        // On failure both the child's lock and the wait lock
                        // are released by the guards on the way out.
                        proc.memory_mut().copy_out(addr, &xstate)?;
                    }
                    parents.clear(i);
                    // SAFETY: a zombie can never run again.
                    unsafe { np.clear() };
                    return Ok(pid);
                }
            }

            // No point waiting if we don't have any children.
            if !havekids {
                return Err(KernelError::NotFound);
            }
            if proc.killed() {
                return Err(KernelError::Interrupted);
            }

            // Wait for a child to exit.
            proc.child_channel.sleep(&mut parents, proc);
        }
    }

    /// Exits the current process with the given status; does not return. The
    /// process remains a zombie until its parent calls wait().
    pub fn exit_current(&self, status: i32, proc: &mut CurrentProc<'_>) -> ! {
        assert_ne!(proc.index(), self.initial_index(), "init exiting");

        // Close all open files and drop the working directory inside a
        // filesystem transaction. Both may sleep, so this happens strictly
        // before the state changes to Zombie.
        {
            let data = proc.data_mut();
            for file in data.open_files.iter_mut() {
                drop(file.take());
            }
        }
        {
            let tx = kernel().fs_log().begin_op(proc);
            let cwd = proc.data_mut().cwd.take().expect("exit: no cwd");
            cwd.put(&tx);
        }

        let mut parents = self.wait_lock.lock();

        // Give any children to init, and wake it once in case it is waiting.
        if parents.reparent(proc.index(), self.initial_index()) {
            self.get(self.initial_index()).child_channel.wakeup();
        }

        // The parent might be sleeping in wait().
        let parent_idx = parents
            .parent_of(proc.index())
            .expect("exit: no parent");
        self.get(parent_idx).child_channel.wakeup();

        let mut guard = proc.lock();
        guard.deref_mut_info().state = ProcState::Zombie { xstate: status };

        // Keep the slot's lock across the switch; release only the wait
        // lock.
        drop(parents);

        // Jump into the scheduler, never to return.
        // SAFETY: we hold only the slot's lock and are no longer Running.
        unsafe { guard.sched() };

        unreachable!("zombie exit");
    }

    /// The per-hart scheduler. Each hart calls this after setting itself up;
    /// it never returns. It loops, picking a runnable slot in table order,
    /// switching to it, and taking back over when that process yields,
    /// sleeps or exits.
    ///
    /// # Safety
    ///
    /// Must run on a hart's boot stack with interrupts disabled, after the
    /// kernel is initialized.
    pub unsafe fn scheduler(&'static self) -> ! {
        // This function never migrates harts, so the pointer stays valid.
        let cpu = kernel().cpus().current_raw();
        // SAFETY: only this hart writes its own Cpu.
        unsafe { (*cpu).proc = ptr::null() };

        loop {
            // Avoid deadlock by ensuring that devices can interrupt: when
            // every slot is idle, only an interrupt can make one runnable.
            // SAFETY: this hart holds no locks here.
            unsafe { arch::intr_on() };

            for p in self.pool.iter() {
                let mut guard = p.lock();
                if matches!(guard.state(), ProcState::Runnable) {
                    // Switch to the chosen process. It is the process's job
                    // to release its lock and then reacquire it before
                    // jumping back to us.
                    guard.deref_mut_info().state = ProcState::Running;
                    // SAFETY: the slot was Runnable, so nothing else runs it
                    // and its context is parked; cpu is this hart's own.
                    unsafe {
                        (*cpu).proc = p;
                        let context = ptr::addr_of_mut!((*p.data.get()).context);
                        arch::swtch(ptr::addr_of_mut!((*cpu).context), context);

                        // The process is done running for now; it changed its
                        // state before coming back.
                        (*cpu).proc = ptr::null();
                    }
                }
            }
        }
    }

    /// Drops a test-fabricated parent edge; see `test_support`.
    #[cfg(test)]
    pub(crate) fn forget_parent(&self, child: usize) {
        self.wait_lock.lock().clear(child);
    }

    /// Prints a process listing to the console, for when the machine is
    /// wedged. Lock-free on purpose — taking locks here could hang a stuck
    /// machine further.
    ///
    /// # Safety
    ///
    /// The reads race with the rest of the kernel; only for debugging.
    pub unsafe fn dump(&self) {
        println!();
        for p in self.pool.iter() {
            // SAFETY: racy read, accepted by the caller.
            let info = unsafe { &*p.info.get_mut_raw() };
            if matches!(info.state, ProcState::Unused) {
                continue;
            }
            // SAFETY: as above.
            let data = unsafe { &*p.data.get() };
            let name: ArrayVec<u8, MAXPROCNAME> = data
                .name
                .iter()
                .copied()
                .take_while(|&b| b != 0)
                .collect();
            println!(
                "{} {} {}",
                info.pid,
                info.state.as_str(),
                str::from_utf8(&name).unwrap_or("???")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc::WaitChannel;
    use crate::test_support::{
        claim_proc as claim_slot, current_view, kernel_for_tests, retire_proc as retire,
    };

    #[test]
    fn pids_are_unique_and_positive() {
        kernel_for_tests();
        let a = claim_slot();
        let b = claim_slot();
        let pid_a = unsafe { &*a.info.get_mut_raw() }.pid;
        let pid_b = unsafe { &*b.info.get_mut_raw() }.pid;
        assert!(pid_a > 0);
        assert!(pid_b > 0);
        assert_ne!(pid_a, pid_b);
        retire(a);
        retire(b);
    }

    #[test]
    fn alloc_initializes_and_clear_reverses() {
        kernel_for_tests();
        let proc = claim_slot();

        {
            let mut guard = proc.lock();
            assert!(matches!(guard.state(), ProcState::Used));
            assert!(guard.deref_info().pid > 0);
            let data = unsafe { guard.deref_mut_data() };
            assert!(!data.trap_frame.is_null());
            let memory = data.memory.as_ref().unwrap();
            assert_eq!(memory.size(), 0);
            // A fresh slot resumes at forkret, on its own kernel stack.
            assert_eq!(data.context.ra, forkret as usize);
            assert_eq!(data.context.sp, data.kstack + PGSIZE);
        }

        retire(proc);

        let mut guard = proc.lock();
        assert!(matches!(guard.state(), ProcState::Unused));
        assert_eq!(guard.deref_info().pid, 0);
        let data = unsafe { guard.deref_mut_data() };
        assert!(data.trap_frame.is_null());
        assert!(data.memory.is_none());
        assert!(!proc.killed());
    }

    #[test]
    fn fork_copies_the_parent_and_returns_zero_in_the_child() {
        kernel_for_tests();
        let parent = claim_slot();
        {
            let mut guard = parent.lock();
            let data = unsafe { guard.deref_mut_data() };
            data.cwd = Some(kernel().itable().root());
            data.name[..4].copy_from_slice(b"mom\0");
        }

        let mut proc = current_view(parent);
        proc.memory_mut().resize(PGSIZE as isize).unwrap();
        proc.memory_mut()
            .copy_out_bytes(UVAddr::from(64), b"legacy")
            .unwrap();
        {
            let tf = proc.trap_frame_mut();
            tf.a0 = 0xdead;
            tf.a1 = 77;
            tf.epc = 0x1000;
        }

        let pid = kernel().procs().fork(&mut proc).expect("fork");
        assert!(pid > 0);

        // Find the child by pid.
        let child = kernel()
            .procs()
            .iter()
            .find(|p| unsafe { &*p.info.get_mut_raw() }.pid == pid)
            .expect("no child slot");

        {
            let mut guard = child.lock();
            // The child is scheduled only after its parent edge exists.
            assert!(matches!(guard.state(), ProcState::Runnable));
            let data = unsafe { guard.deref_mut_data() };
            // Trapframe is a bit-for-bit copy except for a0.
            let tf = unsafe { &*data.trap_frame };
            assert_eq!(tf.a0, 0);
            assert_eq!(tf.a1, 77);
            assert_eq!(tf.epc, 0x1000);
            assert_eq!(&data.name[..4], b"mom\0");
            // User memory is copied by value.
            let mut buf = [0u8; 6];
            data.memory
                .as_mut()
                .unwrap()
                .copy_in_bytes(&mut buf, UVAddr::from(64))
                .unwrap();
            assert_eq!(&buf, b"legacy");
        }

        let parents = kernel().procs().wait_lock.lock();
        assert_eq!(parents.parent_of(child.index()), Some(parent.index()));
        drop(parents);

        retire(child);
        retire(parent);
    }

    #[test]
    fn wait_without_children_fails_immediately() {
        kernel_for_tests();
        let lonely = claim_slot();
        let mut proc = current_view(lonely);
        assert_eq!(
            kernel().procs().wait(UVAddr::from(0), &mut proc),
            Err(KernelError::NotFound)
        );
        retire(lonely);
    }

    #[test]
    fn wakeup_hits_only_the_matching_channel() {
        kernel_for_tests();
        static CHAN_A: WaitChannel = WaitChannel::new();
        static CHAN_B: WaitChannel = WaitChannel::new();

        let sleeper1 = claim_slot();
        let sleeper2 = claim_slot();
        let other = claim_slot();
        for (p, chan) in [
            (sleeper1, &CHAN_A),
            (sleeper2, &CHAN_A),
            (other, &CHAN_B),
        ] {
            p.lock().deref_mut_info().state = ProcState::Sleeping { channel: chan.id() };
        }

        CHAN_A.wakeup();

        assert!(matches!(sleeper1.lock().state(), ProcState::Runnable));
        assert!(matches!(sleeper2.lock().state(), ProcState::Runnable));
        assert!(matches!(
            other.lock().state(),
            ProcState::Sleeping { .. }
        ));

        // A wakeup on an unrelated channel wakes no one further.
        static CHAN_C: WaitChannel = WaitChannel::new();
        CHAN_C.wakeup();
        assert!(matches!(
            other.lock().state(),
            ProcState::Sleeping { .. }
        ));

        // Make the slots inert again before retiring them.
        other.lock().deref_mut_info().state = ProcState::Used;
        sleeper1.lock().deref_mut_info().state = ProcState::Used;
        sleeper2.lock().deref_mut_info().state = ProcState::Used;
        retire(sleeper1);
        retire(sleeper2);
        retire(other);
    }

    #[test]
    fn kill_wakes_a_sleeper_so_it_can_see_the_flag() {
        kernel_for_tests();
        static CHAN: WaitChannel = WaitChannel::new();

        let victim = claim_slot();
        let pid = unsafe { &*victim.info.get_mut_raw() }.pid;
        victim.lock().deref_mut_info().state = ProcState::Sleeping { channel: CHAN.id() };

        kernel().procs().kill(pid).expect("kill");

        assert!(victim.killed());
        // Runnable without any wakeup on CHAN, so it can observe the flag.
        assert!(matches!(victim.lock().state(), ProcState::Runnable));

        victim.lock().deref_mut_info().state = ProcState::Used;
        retire(victim);
        assert_eq!(kernel().procs().kill(pid), Err(KernelError::NotFound));
    }

    #[test]
    fn reparenting_moves_only_the_dying_parents_children() {
        kernel_for_tests();
        let mut parents = kernel().procs().wait_lock.lock();
        // Use high slot indices directly; the map is just indices.
        parents.set(60, 58);
        parents.set(61, 58);
        parents.set(62, 59);

        assert!(parents.reparent(58, 0));
        assert_eq!(parents.parent_of(60), Some(0));
        assert_eq!(parents.parent_of(61), Some(0));
        assert_eq!(parents.parent_of(62), Some(59));
        assert!(!parents.reparent(58, 0));

        parents.clear(60);
        parents.clear(61);
        parents.clear(62);
    }
}
