//! Physical memory allocator, for user processes, kernel stacks, page-table
//! pages and trapframes. Allocates whole 4096-byte pages from a free list
//! threaded through the pages themselves.

use core::mem;
use core::ptr;

use crate::addr::{pg_round_down, pg_round_up, PGSIZE};
use crate::page::Page;

struct Run {
    next: *mut Run,
}

/// The free list.
///
/// # Safety
///
/// - The list has no cycle.
/// - Every node is the address of an unowned, page-aligned page inside the
///   range this `Kmem` was initialized with.
pub struct Kmem {
    head: *mut Run,
}

// SAFETY: Kmem is always used under a spinlock.
unsafe impl Send for Kmem {}

impl Kmem {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Registers the physical memory between `pa_start` and `pa_end` as free
    /// pages.
    ///
    /// # Safety
    ///
    /// The range must be unused memory owned by the caller, and this method
    /// must be called only once.
    pub unsafe fn init(&mut self, pa_start: usize, pa_end: usize) {
        let pa_start = pg_round_up(pa_start);
        let pa_end = pg_round_down(pa_end);
        for pa in num_iter::range_step(pa_start, pa_end, PGSIZE) {
            // SAFETY: pa is a page inside the caller-owned range, and the
            // safety condition guarantees it does not overlap an existing
            // page.
            self.free(unsafe { Page::from_usize(pa) });
        }
    }

    pub fn free(&mut self, mut page: Page) {
        // Fill with junk to catch dangling refs.
        page.poison();
        let run = page.into_usize() as *mut Run;
        // SAFETY: we own the page, and by the invariant this cannot create a
        // cycle.
        unsafe { (*run).next = self.head };
        self.head = run;
    }

    pub fn alloc(&mut self) -> Option<Page> {
        if self.head.is_null() {
            return None;
        }
        // SAFETY: head is a valid free page by the invariant.
        let next = unsafe { (*self.head).next };
        let pa = mem::replace(&mut self.head, next) as usize;
        // SAFETY: the page just left the free list, so it is unowned.
        Some(unsafe { Page::from_usize(pa) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::Addr;

    /// A Kmem over a private leaked buffer.
    fn test_kmem(pages: usize) -> Kmem {
        let layout = std::alloc::Layout::from_size_align((pages + 1) * PGSIZE, PGSIZE).unwrap();
        let base = unsafe { std::alloc::alloc(layout) } as usize;
        assert_ne!(base, 0);
        let mut kmem = Kmem::new();
        unsafe { kmem.init(base, base + pages * PGSIZE) };
        kmem
    }

    #[test]
    fn alloc_until_exhausted() {
        let mut kmem = test_kmem(4);
        let mut pages = Vec::new();
        while let Some(page) = kmem.alloc() {
            pages.push(page.into_usize());
        }
        assert_eq!(pages.len(), 4);
        // All distinct and aligned.
        pages.sort_unstable();
        pages.dedup();
        assert_eq!(pages.len(), 4);
        assert!(pages.iter().all(|pa| pa % PGSIZE == 0));
        for pa in pages {
            kmem.free(unsafe { Page::from_usize(pa) });
        }
    }

    #[test]
    fn freed_pages_are_reused() {
        let mut kmem = test_kmem(1);
        let first = kmem.alloc().unwrap();
        let addr = first.addr().into_usize();
        kmem.free(first);
        let second = kmem.alloc().unwrap();
        assert_eq!(second.addr().into_usize(), addr);
        kmem.free(second);
    }

    #[test]
    fn zero_and_write() {
        let mut kmem = test_kmem(1);
        let mut page = kmem.alloc().unwrap();
        page.zero();
        page.write_bytes(b"hart");
        let pa = page.addr().into_usize();
        let bytes = unsafe { core::slice::from_raw_parts(pa as *const u8, 6) };
        assert_eq!(bytes, b"hart\0\0");
        kmem.free(page);
    }
}
