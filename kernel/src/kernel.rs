//! The kernel aggregate: every system-wide table behind one const-initialized
//! static, and the boot path that brings the harts up.

use crate::cpu::Cpus;
use crate::file::FileTable;
use crate::fs::{Itable, Log};
use crate::kalloc::Kmem;
use crate::page::Page;
use crate::param::ROOTDEV;
use crate::println;
use crate::proc::Procs;
use crate::sleepablelock::{new_sleepable_lock, Sleepablelock};
use crate::spinlock::{new_spinlock, Spinlock};

pub struct Kernel {
    cpus: Cpus,

    procs: Procs,

    /// The physical page allocator.
    kmem: Spinlock<Kmem>,

    /// Clock ticks since boot; sleepers park on this lock's channel.
    ticks: Sleepablelock<u32>,

    ftable: FileTable,

    itable: Itable,

    fs_log: Log,

    #[cfg(target_arch = "riscv64")]
    console: crate::console::Console,

    #[cfg(target_arch = "riscv64")]
    kvm: spin::Once<crate::vm::KernelMemory>,
}

static KERNEL: Kernel = Kernel::new();

#[inline]
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

impl Kernel {
    const fn new() -> Self {
        Self {
            cpus: Cpus::new(),
            procs: Procs::new(),
            kmem: new_spinlock("kmem", Kmem::new()),
            ticks: new_sleepable_lock("time", 0),
            ftable: FileTable::new(),
            itable: Itable::new(),
            fs_log: Log::new(),
            #[cfg(target_arch = "riscv64")]
            console: crate::console::Console::new(),
            #[cfg(target_arch = "riscv64")]
            kvm: spin::Once::new(),
        }
    }

    pub fn cpus(&self) -> &Cpus {
        &self.cpus
    }

    pub fn procs(&self) -> &Procs {
        &self.procs
    }

    pub fn ticks(&self) -> &Sleepablelock<u32> {
        &self.ticks
    }

    pub fn ftable(&self) -> &FileTable {
        &self.ftable
    }

    pub fn itable(&self) -> &Itable {
        &self.itable
    }

    pub fn fs_log(&self) -> &Log {
        &self.fs_log
    }

    #[cfg(target_arch = "riscv64")]
    pub fn console(&self) -> &crate::console::Console {
        &self.console
    }

    pub fn alloc_page(&self) -> Option<Page> {
        self.kmem.lock().alloc()
    }

    pub fn free_page(&self, page: Page) {
        self.kmem.lock().free(page);
    }

    /// Hands the physical memory range to the page allocator.
    ///
    /// # Safety
    ///
    /// The range must be unused memory; call once.
    pub unsafe fn init_memory(&self, pa_start: usize, pa_end: usize) {
        unsafe { self.kmem.lock().init(pa_start, pa_end) };
    }

    /// Brings the filesystem up; runs in process context (from forkret)
    /// because a real disk would sleep here.
    pub fn fs_init(&self, dev: u32) {
        assert_eq!(dev, ROOTDEV, "fs_init: unknown device");
        println!("fs: device {} online", dev);
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use core::sync::atomic::{AtomicBool, Ordering};

        use crate::arch::cpu_id;
        use crate::memlayout::PHYSTOP;
        use crate::plic;
        use crate::trap;
        use crate::uart;
        use crate::vm::KernelMemory;

        extern "C" {
            // kernel.ld sets this to the first address after the kernel.
            static end: [u8; 0];
        }

        /// start() jumps here in supervisor mode on all harts.
        pub unsafe fn main() -> ! {
            static STARTED: AtomicBool = AtomicBool::new(false);

            if cpu_id() == 0 {
                // SAFETY: boot hart, before any other initialization.
                unsafe { uart::init() };
                println!();
                println!("kestrel kernel booting");

                // physical page allocator
                // SAFETY: the memory between the kernel image and PHYSTOP is
                // unused.
                unsafe {
                    kernel().init_memory(end.as_ptr() as usize, PHYSTOP)
                };

                // the kernel page table, per-slot kernel stacks included
                let kvm = kernel().kvm.call_once(|| {
                    let mut kvm = KernelMemory::new().expect("kvm init");
                    kvm.map_proc_stacks().expect("kvm init: kernel stacks");
                    kvm
                });
                // SAFETY: the table covers the running kernel.
                unsafe { kvm.init_hart() }; // turn on paging

                kernel().procs().init(); // process table
                unsafe { trap::init_hart() }; // install kernel trap vector
                unsafe { plic::init() }; // set up interrupt controller
                unsafe { plic::init_hart() }; // ask PLIC for device interrupts

                kernel().procs().user_init(); // first user process

                STARTED.store(true, Ordering::Release);
            } else {
                while !STARTED.load(Ordering::Acquire) {
                    core::hint::spin_loop();
                }
                println!("hart {} starting", cpu_id());
                // SAFETY: same as on the boot hart.
                unsafe { kernel().kvm.get().unwrap().init_hart() }; // turn on paging
                unsafe { trap::init_hart() }; // install kernel trap vector
                unsafe { plic::init_hart() }; // ask PLIC for device interrupts
            }

            // SAFETY: initialization is done; each hart enters its scheduler
            // loop for good.
            unsafe { kernel().procs().scheduler() }
        }
    }
}
