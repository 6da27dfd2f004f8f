//! Page tables: the Sv39 walk/map machinery, the per-process user address
//! space (`UserMemory`) and the kernel's own direct-mapped space
//! (`KernelMemory`).

use core::cmp;
use core::marker::PhantomData;
use core::ptr;

use zerocopy::{AsBytes, FromBytes};

use crate::addr::{
    pg_round_down, pg_round_up, pte2pa, Addr, PAddr, PteFlags, UVAddr, VAddr, MAXVA, PGSIZE,
    PTE_PER_PT,
};
use crate::addr::{make_satp, pa2pte};
use crate::arch;
use crate::error::{KernelError, Result};
use crate::kernel::kernel;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::page::Page;

/// One Sv39 page-table entry.
///
/// # Safety
///
/// If `is_table()` is true, the entry refers to a valid page-table page.
#[derive(Default)]
struct PageTableEntry {
    inner: usize,
}

impl PageTableEntry {
    fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.inner)
    }

    fn pa(&self) -> PAddr {
        PAddr::from(pte2pa(self.inner))
    }

    fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    /// Valid and accessible from user mode.
    fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::V | PteFlags::U)
    }

    /// An interior entry, referring to the next level of page table.
    fn is_table(&self) -> bool {
        self.is_valid() && !self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    /// A leaf entry, referring to a data page.
    fn is_data(&self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    /// Makes the entry refer to a next-level page-table page.
    fn set_table(&mut self, table: *mut RawPageTable) {
        self.inner = pa2pte(table as usize) | PteFlags::V.bits();
    }

    /// Makes the entry a leaf mapping `pa` with permission `perm`. The
    /// permission must include at least one of R, W and X, so that the entry
    /// is not mistaken for an interior one.
    fn set_entry(&mut self, pa: PAddr, perm: PteFlags) {
        assert!(perm.intersects(PteFlags::R | PteFlags::W | PteFlags::X));
        self.inner = pa2pte(pa.into_usize()) | (perm | PteFlags::V).bits();
    }

    fn invalidate(&mut self) {
        self.inner = 0;
    }

    /// Returns the next-level table if this is an interior entry.
    fn as_table_mut(&mut self) -> Option<*mut RawPageTable> {
        if self.is_table() {
            Some(self.pa().into_usize() as *mut RawPageTable)
        } else {
            None
        }
    }
}

#[repr(C, align(4096))]
struct RawPageTable {
    entries: [PageTableEntry; PTE_PER_PT],
}

/// An owning handle to a tree of page-table pages translating addresses of
/// type `A`.
pub struct PageTable<A> {
    root: *mut RawPageTable,
    _marker: PhantomData<A>,
}

// SAFETY: the table pages are owned by this handle.
unsafe impl<A> Send for PageTable<A> {}
// SAFETY: every mutation goes through `&mut self`.
unsafe impl<A> Sync for PageTable<A> {}

impl<A: VAddr> PageTable<A> {
    /// Allocates an empty page table.
    fn new() -> Result<Self> {
        Ok(Self {
            root: alloc_table()?,
            _marker: PhantomData,
        })
    }

    pub fn root_pa(&self) -> usize {
        self.root as usize
    }

    /// Returns the leaf entry for `va`, optionally allocating interior
    /// page-table pages on the way down.
    fn walk(&mut self, va: A, alloc: bool) -> Result<&mut PageTableEntry> {
        assert!(va.into_usize() < MAXVA, "walk");

        let mut table = self.root;
        for level in [2, 1] {
            // SAFETY: `table` is a live page-table page of this tree.
            let pte = unsafe { &mut (*table).entries[va.px(level)] };
            table = match pte.as_table_mut() {
                Some(next) => next,
                None if !alloc => return Err(KernelError::BadAddress),
                None => {
                    assert!(!pte.is_valid(), "walk: leaf in interior level");
                    let next = alloc_table()?;
                    pte.set_table(next);
                    next
                }
            };
        }
        // SAFETY: as above.
        Ok(unsafe { &mut (*table).entries[va.px(0)] })
    }

    /// Creates leaf mappings for virtual addresses `va..va + size` referring
    /// to physical addresses starting at `pa`.
    ///
    /// On failure some of the mappings may have been installed; the caller is
    /// responsible for unwinding.
    pub fn map_pages(&mut self, va: A, size: usize, pa: PAddr, perm: PteFlags) -> Result<()> {
        assert!(size > 0, "map_pages: size");

        let last = pg_round_down(va.into_usize() + size - 1);
        let mut va = pg_round_down(va.into_usize());
        let mut pa = pa.into_usize();
        loop {
            let pte = self.walk(A::from(va), true)?;
            assert!(!pte.is_valid(), "map_pages: remap");
            pte.set_entry(PAddr::from(pa), perm);
            if va == last {
                return Ok(());
            }
            va += PGSIZE;
            pa += PGSIZE;
        }
    }

    /// Removes `npages` leaf mappings starting at `va`, optionally freeing
    /// the referenced pages. The mappings must exist.
    pub fn unmap_pages(&mut self, va: A, npages: usize, free: bool) {
        let start = va.into_usize();
        assert!(start % PGSIZE == 0, "unmap_pages: not aligned");

        for va in num_iter::range_step(start, start + npages * PGSIZE, PGSIZE) {
            let pte = self.walk(A::from(va), false).expect("unmap_pages: walk");
            assert!(pte.is_data(), "unmap_pages: not a leaf");
            if free {
                let page = unsafe { Page::from_usize(pte.pa().into_usize()) };
                kernel().free_page(page);
            }
            pte.invalidate();
        }
    }

    /// The physical address and flags of the leaf mapping for `va`.
    fn leaf(&mut self, va: A) -> Result<(PAddr, PteFlags)> {
        if va.into_usize() >= MAXVA {
            return Err(KernelError::BadAddress);
        }
        let pte = self.walk(va, false)?;
        if !pte.is_valid() {
            return Err(KernelError::BadAddress);
        }
        Ok((pte.pa(), pte.flags()))
    }

    /// Frees the page-table pages themselves. All leaf mappings must already
    /// have been removed.
    fn free_walk(&mut self) {
        // SAFETY: `table` is a live page-table page owned by this tree, and
        // nothing else references it once we get here.
        unsafe fn recurse(table: *mut RawPageTable) {
            for i in 0..PTE_PER_PT {
                // SAFETY: see above.
                let pte = unsafe { &mut (*table).entries[i] };
                if let Some(child) = pte.as_table_mut() {
                    // SAFETY: child is a live page-table page of this tree.
                    unsafe { recurse(child) };
                    pte.invalidate();
                } else {
                    assert!(!pte.is_valid(), "free_walk: leaf");
                }
            }
            // SAFETY: all children are freed; the page came from the
            // allocator.
            kernel().free_page(unsafe { Page::from_usize(table as usize) });
        }

        // SAFETY: self.root is the root of this tree.
        unsafe { recurse(self.root) };
        self.root = ptr::null_mut();
    }
}

fn alloc_table() -> Result<*mut RawPageTable> {
    let mut page = kernel().alloc_page().ok_or(KernelError::OutOfMemory)?;
    page.zero();
    Ok(page.into_usize() as *mut RawPageTable)
}

/// A process's user address space: its page table plus its size in bytes.
///
/// The page table always carries two fixed kernel mappings: the trampoline
/// page (shared kernel code, not user-accessible) at the top of the address
/// space and the process's trapframe page just below it. User memory occupies
/// `0..size`.
pub struct UserMemory {
    page_table: PageTable<UVAddr>,
    size: usize,
}

impl UserMemory {
    /// Creates an address space with no user memory, mapping the trampoline
    /// and the given trapframe page. If `initcode` is given, additionally
    /// loads it into a fresh first page, as the very first process image.
    ///
    /// Unwinds all partial mappings on failure.
    pub fn new(trap_frame: PAddr, initcode: Option<&[u8]>) -> Result<Self> {
        let mut page_table = PageTable::new()?;

        // Map the trampoline code (for system call return) at the highest
        // user virtual address. Only the supervisor uses it, on the way to
        // and from user space, so not PTE_U.
        if let Err(e) = page_table.map_pages(
            UVAddr::from(TRAMPOLINE),
            PGSIZE,
            PAddr::from(arch::trampoline_pa()),
            PteFlags::R | PteFlags::X,
        ) {
            page_table.free_walk();
            return Err(e);
        }

        // Map the trapframe page just below the trampoline, for trap entry.
        if let Err(e) = page_table.map_pages(
            UVAddr::from(TRAPFRAME),
            PGSIZE,
            trap_frame,
            PteFlags::R | PteFlags::W,
        ) {
            page_table.unmap_pages(UVAddr::from(TRAMPOLINE), 1, false);
            page_table.free_walk();
            return Err(e);
        }

        let mut this = Self {
            page_table,
            size: 0,
        };
        if let Some(code) = initcode {
            // On failure `this` is dropped, which unwinds the mappings.
            this.load_initcode(code)?;
        }
        Ok(this)
    }

    /// User address-space size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The satp value that installs this address space.
    pub fn satp(&self) -> usize {
        make_satp(self.page_table.root_pa())
    }

    /// Loads `code` into a fresh first page. Only for the very first
    /// process's image, which must fit on one page.
    pub(crate) fn load_initcode(&mut self, code: &[u8]) -> Result<()> {
        assert_eq!(self.size, 0, "load_initcode: not empty");
        assert!(code.len() <= PGSIZE, "load_initcode: more than a page");

        // The guard returns the page to the allocator if mapping fails.
        let mut page = scopeguard::guard(
            kernel().alloc_page().ok_or(KernelError::OutOfMemory)?,
            |page| kernel().free_page(page),
        );
        page.zero();
        page.write_bytes(code);
        let pa = page.addr();
        self.page_table.map_pages(
            UVAddr::from(0),
            PGSIZE,
            pa,
            PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U,
        )?;
        // The page table owns the page now.
        let _ = scopeguard::ScopeGuard::into_inner(page).into_usize();
        self.size = PGSIZE;
        Ok(())
    }

    /// Grows or shrinks the user memory by `n` bytes. On failure, no change
    /// to the address space remains.
    pub fn resize(&mut self, n: isize) -> Result<()> {
        if n > 0 {
            self.grow(self.size + n as usize)
        } else if n < 0 {
            let shrink = n.unsigned_abs();
            if shrink > self.size {
                return Err(KernelError::Argument);
            }
            let new_size = self.size - shrink;
            self.dealloc(self.size, new_size);
            self.size = new_size;
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Allocates zeroed pages to take the space from `self.size` up to
    /// `new_size`.
    fn grow(&mut self, new_size: usize) -> Result<()> {
        if new_size <= self.size {
            return Ok(());
        }
        if new_size > MAXVA {
            return Err(KernelError::OutOfMemory);
        }

        let old_size = self.size;
        let mut va = pg_round_up(old_size);
        while va < new_size {
            let mut page = match kernel().alloc_page() {
                Some(page) => scopeguard::guard(page, |page| kernel().free_page(page)),
                None => {
                    self.dealloc(va, old_size);
                    return Err(KernelError::OutOfMemory);
                }
            };
            page.zero();
            let pa = page.addr();
            if let Err(e) = self.page_table.map_pages(
                UVAddr::from(va),
                PGSIZE,
                pa,
                PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U,
            ) {
                // The guard frees the unmapped page.
                drop(page);
                self.dealloc(va, old_size);
                return Err(e);
            }
            let _ = scopeguard::ScopeGuard::into_inner(page).into_usize();
            va += PGSIZE;
        }
        self.size = new_size;
        Ok(())
    }

    /// Unmaps and frees the pages that take the mapped region from `from`
    /// bytes down to `to` bytes. `from` must be the currently mapped extent.
    fn dealloc(&mut self, from: usize, to: usize) {
        let from = pg_round_up(from);
        let to = pg_round_up(to);
        if to < from {
            self.page_table
                .unmap_pages(UVAddr::from(to), (from - to) / PGSIZE, true);
        }
    }

    /// Copies the whole user memory of `self` into `child`, which must be
    /// empty. Used by fork. On failure the child is left empty again.
    pub fn clone_into(&mut self, child: &mut UserMemory) -> Result<()> {
        assert_eq!(child.size, 0, "clone_into: child not empty");

        for va in num_iter::range_step(0, self.size, PGSIZE) {
            let (pa, flags) = self
                .page_table
                .leaf(UVAddr::from(va))
                .expect("clone_into: page not mapped");

            let unwind = |child: &mut UserMemory| {
                if va > 0 {
                    child.page_table.unmap_pages(UVAddr::from(0), va / PGSIZE, true);
                }
            };

            let mut page = match kernel().alloc_page() {
                Some(page) => scopeguard::guard(page, |page| kernel().free_page(page)),
                None => {
                    unwind(child);
                    return Err(KernelError::OutOfMemory);
                }
            };
            // SAFETY: `pa` is a live user page of `self`.
            let src = unsafe { core::slice::from_raw_parts(pa.into_usize() as *const u8, PGSIZE) };
            page.write_bytes(src);
            let new_pa = page.addr();
            if let Err(e) = child
                .page_table
                .map_pages(UVAddr::from(va), PGSIZE, new_pa, flags)
            {
                drop(page);
                unwind(child);
                return Err(e);
            }
            let _ = scopeguard::ScopeGuard::into_inner(page).into_usize();
        }
        child.size = self.size;
        Ok(())
    }

    /// The physical address of the user page containing `va`. Fails if the
    /// page is not mapped user-accessible.
    fn user_page(&mut self, va: UVAddr) -> Result<PAddr> {
        if va.into_usize() >= MAXVA {
            return Err(KernelError::BadAddress);
        }
        let pte = self.page_table.walk(va, false)?;
        if !pte.is_user() {
            return Err(KernelError::BadAddress);
        }
        Ok(pte.pa())
    }

    /// Copies `src` into user memory at `dst`.
    pub fn copy_out_bytes(&mut self, dst: UVAddr, mut src: &[u8]) -> Result<()> {
        let mut dst = dst.into_usize();
        while !src.is_empty() {
            let va0 = pg_round_down(dst);
            let pa = self.user_page(UVAddr::from(va0))?.into_usize();
            let off = dst - va0;
            let n = cmp::min(PGSIZE - off, src.len());
            // SAFETY: pa is a live user page, and off + n <= PGSIZE.
            unsafe {
                ptr::copy_nonoverlapping(src.as_ptr(), (pa + off) as *mut u8, n);
            }
            src = &src[n..];
            dst = va0 + PGSIZE;
        }
        Ok(())
    }

    /// Copies a `T` into user memory at `dst`.
    pub fn copy_out<T: AsBytes>(&mut self, dst: UVAddr, src: &T) -> Result<()> {
        self.copy_out_bytes(dst, src.as_bytes())
    }

    /// Fills `dst` from user memory at `src`.
    pub fn copy_in_bytes(&mut self, dst: &mut [u8], src: UVAddr) -> Result<()> {
        let mut src = src.into_usize();
        let mut copied = 0;
        while copied < dst.len() {
            let va0 = pg_round_down(src);
            let pa = self.user_page(UVAddr::from(va0))?.into_usize();
            let off = src - va0;
            let n = cmp::min(PGSIZE - off, dst.len() - copied);
            // SAFETY: pa is a live user page, and off + n <= PGSIZE.
            unsafe {
                ptr::copy_nonoverlapping((pa + off) as *const u8, dst[copied..].as_mut_ptr(), n);
            }
            copied += n;
            src = va0 + PGSIZE;
        }
        Ok(())
    }

    /// Reads a `T` from user memory at `src`.
    pub fn copy_in<T: AsBytes + FromBytes>(&mut self, src: UVAddr) -> Result<T> {
        let mut value = T::new_zeroed();
        self.copy_in_bytes(value.as_bytes_mut(), src)?;
        Ok(value)
    }

    /// Copies a nul-terminated string from user memory at `src` into `dst`.
    /// Returns the length excluding the nul. Fails if `dst` fills up before a
    /// nul is found.
    pub fn copy_in_str(&mut self, dst: &mut [u8], src: UVAddr) -> Result<usize> {
        let max = dst.len();
        let mut copied = 0;
        let mut src = src.into_usize();
        while copied < max {
            let va0 = pg_round_down(src);
            let pa = self.user_page(UVAddr::from(va0))?.into_usize();
            let off = src - va0;
            let n = cmp::min(PGSIZE - off, max - copied);
            for i in 0..n {
                // SAFETY: pa is a live user page, and off + i < PGSIZE.
                let byte = unsafe { *((pa + off + i) as *const u8) };
                dst[copied] = byte;
                if byte == 0 {
                    return Ok(copied);
                }
                copied += 1;
            }
            src = va0 + PGSIZE;
        }
        Err(KernelError::BadAddress)
    }
}

impl Drop for UserMemory {
    fn drop(&mut self) {
        self.page_table.unmap_pages(UVAddr::from(TRAMPOLINE), 1, false);
        self.page_table.unmap_pages(UVAddr::from(TRAPFRAME), 1, false);
        self.dealloc(self.size, 0);
        self.size = 0;
        self.page_table.free_walk();
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        use crate::addr::KVAddr;
        use crate::memlayout::{kstack, KERNBASE, PHYSTOP, PLIC, UART0};
        use crate::param::NPROC;

        extern "C" {
            // kernel.ld sets this to the end of kernel code.
            static etext: [u8; 0];
        }

        /// The kernel's own address space, shared by all harts: a direct map
        /// of devices and RAM, plus the trampoline and the per-slot kernel
        /// stacks high up.
        pub struct KernelMemory {
            page_table: PageTable<KVAddr>,
        }

        impl KernelMemory {
            pub fn new() -> Result<Self> {
                let mut page_table = PageTable::new()?;

                // SAFETY: only the address of the linker symbol is taken.
                let etext = unsafe { etext.as_ptr() as usize };

                // uart registers
                page_table.map_pages(
                    KVAddr::from(UART0),
                    PGSIZE,
                    PAddr::from(UART0),
                    PteFlags::R | PteFlags::W,
                )?;

                // PLIC
                page_table.map_pages(
                    KVAddr::from(PLIC),
                    0x40_0000,
                    PAddr::from(PLIC),
                    PteFlags::R | PteFlags::W,
                )?;

                // map kernel text executable and read-only.
                page_table.map_pages(
                    KVAddr::from(KERNBASE),
                    etext - KERNBASE,
                    PAddr::from(KERNBASE),
                    PteFlags::R | PteFlags::X,
                )?;

                // map kernel data and the physical RAM we'll make use of.
                page_table.map_pages(
                    KVAddr::from(etext),
                    PHYSTOP - etext,
                    PAddr::from(etext),
                    PteFlags::R | PteFlags::W,
                )?;

                // map the trampoline to the highest virtual address in the
                // kernel.
                page_table.map_pages(
                    KVAddr::from(TRAMPOLINE),
                    PGSIZE,
                    PAddr::from(arch::trampoline_pa()),
                    PteFlags::R | PteFlags::X,
                )?;

                Ok(Self { page_table })
            }

            /// Allocates a kernel-stack page for every process slot and maps
            /// it at its well-known address, beneath an invalid guard page.
            /// Called once during boot; these mappings outlive every slot
            /// generation.
            pub fn map_proc_stacks(&mut self) -> Result<()> {
                for i in 0..NPROC {
                    let page = kernel().alloc_page().ok_or(KernelError::OutOfMemory)?;
                    let pa = page.addr();
                    self.page_table.map_pages(
                        KVAddr::from(kstack(i)),
                        PGSIZE,
                        pa,
                        PteFlags::R | PteFlags::W,
                    )?;
                    let _ = page.into_usize();
                }
                Ok(())
            }

            /// Switches the hart's MMU over to this page table.
            ///
            /// # Safety
            ///
            /// The page table must cover the executing kernel.
            pub unsafe fn init_hart(&self) {
                use crate::arch::riscv::asm::{sfence_vma, w_satp};
                unsafe {
                    // wait for any previous writes to the page table to
                    // finish.
                    sfence_vma();
                    w_satp(make_satp(self.page_table.root_pa()));
                    // flush stale entries from the TLB.
                    sfence_vma();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::kernel_for_tests;

    fn fake_trapframe() -> Page {
        let mut page = kernel().alloc_page().expect("no pages");
        page.zero();
        page
    }

    #[test]
    fn map_walk_unmap_round_trip() {
        kernel_for_tests();
        let mut pt = PageTable::<UVAddr>::new().unwrap();
        let page = kernel().alloc_page().unwrap();
        let pa = page.addr();
        pt.map_pages(UVAddr::from(3 * PGSIZE), PGSIZE, pa, PteFlags::R | PteFlags::W)
            .unwrap();

        let (found, flags) = pt.leaf(UVAddr::from(3 * PGSIZE)).unwrap();
        assert_eq!(found, pa);
        assert!(flags.contains(PteFlags::R | PteFlags::W | PteFlags::V));
        assert!(pt.leaf(UVAddr::from(4 * PGSIZE)).is_err());

        pt.unmap_pages(UVAddr::from(3 * PGSIZE), 1, false);
        assert!(pt.leaf(UVAddr::from(3 * PGSIZE)).is_err());
        kernel().free_page(page);
        pt.free_walk();
    }

    #[test]
    fn address_space_has_trampoline_and_trapframe() {
        kernel_for_tests();
        let tf = fake_trapframe();
        let tf_pa = tf.addr();
        let mut memory = UserMemory::new(tf_pa, None).unwrap();

        let (pa, flags) = memory.page_table.leaf(UVAddr::from(TRAMPOLINE)).unwrap();
        assert_eq!(pa.into_usize(), arch::trampoline_pa());
        // Kernel code on the way in and out of traps; never user-visible.
        assert!(flags.contains(PteFlags::R | PteFlags::X));
        assert!(!flags.contains(PteFlags::U));

        let (pa, flags) = memory.page_table.leaf(UVAddr::from(TRAPFRAME)).unwrap();
        assert_eq!(pa, tf_pa);
        assert!(flags.contains(PteFlags::R | PteFlags::W));
        assert!(!flags.contains(PteFlags::U));

        assert_eq!(memory.size(), 0);
        drop(memory);
        kernel().free_page(tf);
    }

    #[test]
    fn initcode_is_loaded_user_executable() {
        kernel_for_tests();
        let tf = fake_trapframe();
        let mut memory = UserMemory::new(tf.addr(), Some(&[0x13, 0x05, 0x00, 0x00])).unwrap();
        assert_eq!(memory.size(), PGSIZE);
        let word: u32 = memory.copy_in(UVAddr::from(0)).unwrap();
        assert_eq!(word, 0x0513);
        let (_, flags) = memory.page_table.leaf(UVAddr::from(0)).unwrap();
        assert!(flags.contains(PteFlags::U | PteFlags::X));
        drop(memory);
        kernel().free_page(tf);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        kernel_for_tests();
        let tf = fake_trapframe();
        let mut memory = UserMemory::new(tf.addr(), None).unwrap();

        memory.resize(3 * PGSIZE as isize).unwrap();
        assert_eq!(memory.size(), 3 * PGSIZE);
        // Fresh pages read back zeroed.
        let word: u64 = memory.copy_in(UVAddr::from(2 * PGSIZE)).unwrap();
        assert_eq!(word, 0);

        memory.resize(-(2 * PGSIZE as isize)).unwrap();
        assert_eq!(memory.size(), PGSIZE);
        assert!(memory.copy_in_bytes(&mut [0u8; 1], UVAddr::from(PGSIZE)).is_err());

        // Shrinking past zero is an argument error and changes nothing.
        assert_eq!(memory.resize(-(2 * PGSIZE as isize)), Err(KernelError::Argument));
        assert_eq!(memory.size(), PGSIZE);

        drop(memory);
        kernel().free_page(tf);
    }

    #[test]
    fn copies_cross_page_boundaries() {
        kernel_for_tests();
        let tf = fake_trapframe();
        let mut memory = UserMemory::new(tf.addr(), None).unwrap();
        memory.resize(2 * PGSIZE as isize).unwrap();

        let dst = UVAddr::from(PGSIZE - 3);
        memory.copy_out_bytes(dst, b"straddle").unwrap();
        let mut buf = [0u8; 8];
        memory.copy_in_bytes(&mut buf, dst).unwrap();
        assert_eq!(&buf, b"straddle");

        // Out-of-range accesses fail without panicking.
        assert!(memory
            .copy_out_bytes(UVAddr::from(2 * PGSIZE - 1), b"xy")
            .is_err());
        assert!(memory.copy_out_bytes(UVAddr::from(MAXVA), b"x").is_err());

        drop(memory);
        kernel().free_page(tf);
    }

    #[test]
    fn copy_in_str_stops_at_nul() {
        kernel_for_tests();
        let tf = fake_trapframe();
        let mut memory = UserMemory::new(tf.addr(), None).unwrap();
        memory.resize(PGSIZE as isize).unwrap();

        memory.copy_out_bytes(UVAddr::from(16), b"console\0junk").unwrap();
        let mut buf = [0u8; 32];
        let len = memory.copy_in_str(&mut buf, UVAddr::from(16)).unwrap();
        assert_eq!(len, 7);
        assert_eq!(&buf[..8], b"console\0");

        // No nul within the buffer: error.
        let mut tiny = [0u8; 4];
        assert!(memory.copy_in_str(&mut tiny, UVAddr::from(16)).is_err());

        drop(memory);
        kernel().free_page(tf);
    }

    #[test]
    fn clone_into_copies_bytes_not_pages() {
        kernel_for_tests();
        let tf_parent = fake_trapframe();
        let tf_child = fake_trapframe();
        let mut parent = UserMemory::new(tf_parent.addr(), None).unwrap();
        parent.resize(2 * PGSIZE as isize).unwrap();
        parent.copy_out_bytes(UVAddr::from(100), b"inherited").unwrap();

        let mut child = UserMemory::new(tf_child.addr(), None).unwrap();
        parent.clone_into(&mut child).unwrap();
        assert_eq!(child.size(), parent.size());

        let mut buf = [0u8; 9];
        child.copy_in_bytes(&mut buf, UVAddr::from(100)).unwrap();
        assert_eq!(&buf, b"inherited");

        // Distinct physical pages: writing the child leaves the parent alone.
        child.copy_out_bytes(UVAddr::from(100), b"CHANGED!!").unwrap();
        parent.copy_in_bytes(&mut buf, UVAddr::from(100)).unwrap();
        assert_eq!(&buf, b"inherited");

        drop(child);
        drop(parent);
        kernel().free_page(tf_parent);
        kernel().free_page(tf_child);
    }
}
