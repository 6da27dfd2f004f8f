//! Shared scaffolding for the host-side unit tests: a page arena for the
//! global allocator and fabricated process slots.

use crate::addr::PGSIZE;
use crate::kernel::kernel;
use crate::proc::{CurrentProc, Proc};

/// Ensures the global kernel has a page arena. Tests share one kernel, so
/// slots and pages claimed by a test must be returned by it.
pub fn kernel_for_tests() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        // A 16 MiB playground.
        const PAGES: usize = 4096;
        let layout = std::alloc::Layout::from_size_align((PAGES + 1) * PGSIZE, PGSIZE).unwrap();
        // SAFETY: a fresh allocation, leaked for the life of the test run.
        let base = unsafe { std::alloc::alloc(layout) } as usize;
        assert_ne!(base, 0, "test arena allocation failed");
        // SAFETY: the arena is unused and handed over exactly once.
        unsafe { kernel().init_memory(base, base + (PAGES + 1) * PGSIZE) };
    });
}

/// Claims a process slot and returns it with its lock released; the slot
/// stays `Used`, so nothing else touches it until `retire_proc`.
pub fn claim_proc() -> &'static Proc {
    kernel_for_tests();
    let guard = kernel().procs().alloc().expect("claim_proc: no free slot");
    let proc = &*guard as *const Proc;
    drop(guard);
    // SAFETY: the slot is Used and belongs to the calling test.
    unsafe { &*proc }
}

/// A fabricated "running" view of a claimed slot, the way the syscall layer
/// sees the current process.
pub fn current_view(proc: &'static Proc) -> CurrentProc<'static> {
    // SAFETY: the slot was claimed by this test and cannot be scheduled.
    unsafe { CurrentProc::new_unchecked(proc) }
}

/// Returns a claimed slot to `Unused`, dropping whatever the test hung off
/// it.
pub fn retire_proc(proc: &Proc) {
    kernel().procs().forget_parent(proc.index());

    let mut guard = proc.lock();
    // SAFETY: the slot belongs to the calling test and is not running.
    let data = unsafe { guard.deref_mut_data() };
    data.cwd.take();
    for f in data.open_files.iter_mut() {
        drop(f.take());
    }
    // SAFETY: as above.
    unsafe { guard.clear() };
}
