//! Address types and Sv39 paging constants.
//!
//! Hoisted out of the arch backends so that the page-table code can be
//! compiled (and unit-tested) on any target; only the act of *installing* a
//! page table is machine-specific.

use core::ops::Add;

use bitflags::bitflags;

/// Bytes per page.
pub const PGSIZE: usize = 4096;

/// Bits of offset within a page.
pub const PGSHIFT: usize = 12;

/// One beyond the highest possible virtual address.
///
/// MAXVA is actually one bit less than the max allowed by Sv39, to avoid
/// having to sign-extend virtual addresses that have the high bit set.
pub const MAXVA: usize = 1 << (9 + 9 + 9 + PGSHIFT - 1);

/// Page-table entries per page table.
pub const PTE_PER_PT: usize = 512;

const PXMASK: usize = 0x1ff;

pub const fn pg_round_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

const fn px_shift(level: usize) -> usize {
    PGSHIFT + 9 * level
}

bitflags! {
    /// Flag bits of a Sv39 page-table entry.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PteFlags: usize {
        /// Valid.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// User-accessible.
        const U = 1 << 4;
        /// Global.
        const G = 1 << 5;
        /// Accessed.
        const A = 1 << 6;
        /// Dirty.
        const D = 1 << 7;
    }
}

pub const fn pa2pte(pa: usize) -> usize {
    (pa >> PGSHIFT) << 10
}

pub const fn pte2pa(pte: usize) -> usize {
    (pte >> 10) << PGSHIFT
}

/// satp value for Sv39 with the given root page-table physical address.
pub const fn make_satp(root: usize) -> usize {
    const SATP_SV39: usize = 8 << 60;
    SATP_SV39 | (root >> PGSHIFT)
}

pub trait Addr: Copy + From<usize> + Add<usize, Output = Self> {
    fn into_usize(self) -> usize;

    fn is_null(self) -> bool {
        self.into_usize() == 0
    }

    fn is_page_aligned(self) -> bool {
        self.into_usize() % PGSIZE == 0
    }
}

macro_rules! define_addr_type {
    ($(#[$attr:meta])* $typ:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
        pub struct $typ(usize);

        impl From<usize> for $typ {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }

        impl Add<usize> for $typ {
            type Output = Self;

            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Addr for $typ {
            fn into_usize(self) -> usize {
                self.0
            }
        }
    };
}

define_addr_type!(
    /// A physical address.
    PAddr
);
define_addr_type!(
    /// A kernel virtual address.
    KVAddr
);
define_addr_type!(
    /// A user virtual address.
    UVAddr
);

pub trait VAddr: Addr {
    /// The index into the page table at `level` for this virtual address.
    #[inline]
    fn px(&self, level: usize) -> usize {
        (self.into_usize() >> px_shift(level)) & PXMASK
    }
}

impl VAddr for KVAddr {}

impl VAddr for UVAddr {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(pg_round_up(0), 0);
        assert_eq!(pg_round_up(1), PGSIZE);
        assert_eq!(pg_round_up(PGSIZE), PGSIZE);
        assert_eq!(pg_round_down(PGSIZE + 1), PGSIZE);
        assert_eq!(pg_round_down(PGSIZE - 1), 0);
    }

    #[test]
    fn pte_pa_round_trip() {
        let pa = 0x8020_3000;
        assert_eq!(pte2pa(pa2pte(pa)), pa);
    }

    #[test]
    fn page_index_extraction() {
        // va = level-2 index 1, level-1 index 2, level-0 index 3.
        let va = UVAddr::from((1 << 30) | (2 << 21) | (3 << 12));
        assert_eq!(va.px(2), 1);
        assert_eq!(va.px(1), 2);
        assert_eq!(va.px(0), 3);
    }
}
