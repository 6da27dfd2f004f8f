//! Open file objects: a fixed table of reference-counted entries, shared by
//! descriptors across fork.

use crate::addr::{Addr, UVAddr};
use crate::console;
use crate::error::{KernelError, Result};
use crate::kernel::kernel;
use crate::param::NFILE;
use crate::proc::CurrentProc;
use crate::spinlock::{new_spinlock, Spinlock};

/// What an open file refers to. (Pipes and on-disk inodes are out of scope;
/// devices are the only kind this kernel serves.)
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FileKind {
    Device { major: u16 },
}

struct FileSlot {
    nref: u32,
    kind: FileKind,
    readable: bool,
    writable: bool,
}

/// The system-wide table of open file objects.
pub struct FileTable {
    slots: Spinlock<[Option<FileSlot>; NFILE]>,
}

impl FileTable {
    pub const fn new() -> Self {
        Self {
            slots: new_spinlock("ftable", [const { None }; NFILE]),
        }
    }

    /// Allocates a file object with a single reference.
    pub fn alloc(&self, kind: FileKind, readable: bool, writable: bool) -> Result<RcFile> {
        let mut slots = self.slots.lock();
        for (idx, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(FileSlot {
                    nref: 1,
                    kind,
                    readable,
                    writable,
                });
                return Ok(RcFile { idx });
            }
        }
        Err(KernelError::OutOfFiles)
    }

    fn dup(&self, idx: usize) {
        let mut slots = self.slots.lock();
        let slot = slots[idx].as_mut().expect("ftable dup: free slot");
        slot.nref += 1;
    }

    fn close(&self, idx: usize) {
        let mut slots = self.slots.lock();
        let slot = slots[idx].as_mut().expect("ftable close: free slot");
        assert!(slot.nref >= 1, "ftable close");
        slot.nref -= 1;
        if slot.nref == 0 {
            // Last reference gone. A device has nothing further to release;
            // an inode-backed file would put its inode here.
            slots[idx] = None;
        }
    }

    fn meta(&self, idx: usize) -> (FileKind, bool, bool) {
        let slots = self.slots.lock();
        let slot = slots[idx].as_ref().expect("ftable meta: free slot");
        (slot.kind, slot.readable, slot.writable)
    }

    #[cfg(test)]
    fn nref(&self, idx: usize) -> Option<u32> {
        self.slots.lock()[idx].as_ref().map(|s| s.nref)
    }
}

/// One reference to an open file object. `dup` mints another reference;
/// dropping one closes it, releasing the object when the last goes.
pub struct RcFile {
    idx: usize,
}

impl RcFile {
    pub fn dup(&self) -> RcFile {
        kernel().ftable().dup(self.idx);
        RcFile { idx: self.idx }
    }

    pub fn read(&self, dst: UVAddr, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let (kind, readable, _) = kernel().ftable().meta(self.idx);
        if !readable {
            return Err(KernelError::BadFd);
        }
        match kind {
            FileKind::Device { major } => {
                if major != console::MAJOR {
                    return Err(KernelError::BadFd);
                }
                console::read(true, dst.into_usize(), n, proc)
            }
        }
    }

    pub fn write(&self, src: UVAddr, n: usize, proc: &mut CurrentProc<'_>) -> Result<usize> {
        let (kind, _, writable) = kernel().ftable().meta(self.idx);
        if !writable {
            return Err(KernelError::BadFd);
        }
        match kind {
            FileKind::Device { major } => {
                if major != console::MAJOR {
                    return Err(KernelError::BadFd);
                }
                console::write(true, src.into_usize(), n, proc)
            }
        }
    }
}

impl Drop for RcFile {
    fn drop(&mut self) {
        kernel().ftable().close(self.idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::kernel_for_tests;

    #[test]
    fn references_count_up_and_down() {
        kernel_for_tests();
        let file = kernel()
            .ftable()
            .alloc(FileKind::Device { major: console::MAJOR }, true, true)
            .unwrap();
        let idx = file.idx;
        assert_eq!(kernel().ftable().nref(idx), Some(1));

        let copy = file.dup();
        assert_eq!(kernel().ftable().nref(idx), Some(2));

        drop(file);
        assert_eq!(kernel().ftable().nref(idx), Some(1));

        drop(copy);
        assert_eq!(kernel().ftable().nref(idx), None);
    }

    #[test]
    fn slots_are_recycled() {
        kernel_for_tests();
        let file = kernel()
            .ftable()
            .alloc(FileKind::Device { major: console::MAJOR }, true, false)
            .unwrap();
        let idx = file.idx;
        drop(file);

        // The freed slot is usable again.
        let again = kernel()
            .ftable()
            .alloc(FileKind::Device { major: console::MAJOR }, false, true)
            .unwrap();
        // Not necessarily the same slot under parallel tests, but both must
        // be live and independent.
        assert!(kernel().ftable().nref(again.idx).is_some());
        let _ = idx;
        drop(again);
    }
}
