//! The filesystem surface the process core depends on: reference-counted
//! in-memory inodes and the operation gate that stands where the on-disk log
//! would. There is no disk in this kernel; everything beyond the root inode
//! and refcount discipline is a collaborator's concern.

use crate::error::{KernelError, Result};
use crate::kernel::kernel;
use crate::param::{MAXOPBLOCKS, NINODE, ROOTDEV};
use crate::proc::CurrentProc;
use crate::sleepablelock::{new_sleepable_lock, SleepableGuard, Sleepablelock};
use crate::spinlock::{new_spinlock, Spinlock};

/// Inode number of the root directory.
pub const ROOTINO: u32 = 1;

struct InodeSlot {
    dev: u32,
    inum: u32,
    nref: u32,
}

/// The in-memory inode table.
pub struct Itable {
    slots: Spinlock<[Option<InodeSlot>; NINODE]>,
}

impl Itable {
    pub const fn new() -> Self {
        Self {
            slots: new_spinlock("itable", [const { None }; NINODE]),
        }
    }

    /// References the root directory inode.
    pub fn root(&self) -> RcInode {
        self.get(ROOTDEV, ROOTINO).expect("itable: no slot for root")
    }

    /// Finds or creates the in-memory inode for `(dev, inum)` and takes a
    /// reference to it.
    fn get(&self, dev: u32, inum: u32) -> Result<RcInode> {
        let mut slots = self.slots.lock();
        let mut empty = None;
        for (idx, slot) in slots.iter_mut().enumerate() {
            match slot {
                Some(inode) if inode.dev == dev && inode.inum == inum => {
                    inode.nref += 1;
                    return Ok(RcInode { idx });
                }
                None if empty.is_none() => empty = Some(idx),
                _ => {}
            }
        }
        let idx = empty.ok_or(KernelError::OutOfInodes)?;
        slots[idx] = Some(InodeSlot { dev, inum, nref: 1 });
        Ok(RcInode { idx })
    }

    fn dup(&self, idx: usize) {
        let mut slots = self.slots.lock();
        let slot = slots[idx].as_mut().expect("itable dup: free slot");
        slot.nref += 1;
    }

    fn put(&self, idx: usize) {
        let mut slots = self.slots.lock();
        let slot = slots[idx].as_mut().expect("itable put: free slot");
        assert!(slot.nref >= 1, "itable put");
        slot.nref -= 1;
        if slot.nref == 0 {
            // Last reference; an on-disk inode with no links would be
            // truncated and freed here.
            slots[idx] = None;
        }
    }

    #[cfg(test)]
    fn nref(&self, idx: usize) -> Option<u32> {
        self.slots.lock()[idx].as_ref().map(|s| s.nref)
    }
}

/// One reference to an in-memory inode.
pub struct RcInode {
    idx: usize,
}

impl RcInode {
    pub fn dup(&self) -> RcInode {
        kernel().itable().dup(self.idx);
        RcInode { idx: self.idx }
    }

    /// Drops this reference inside a filesystem transaction. The witness is
    /// what the on-disk variant would need to write back a freed inode.
    pub fn put(self, _tx: &FsTransaction<'_>) {
        drop(self);
    }
}

impl Drop for RcInode {
    fn drop(&mut self) {
        kernel().itable().put(self.idx);
    }
}

/// The gate that stands where the on-disk log would: at most `MAXOPBLOCKS`
/// filesystem operations may be outstanding at once, and `begin_op` blocks
/// until a slot frees up.
pub struct Log {
    outstanding: Sleepablelock<usize>,
}

impl Log {
    pub const fn new() -> Self {
        Self {
            outstanding: new_sleepable_lock("log", 0),
        }
    }

    /// Opens a filesystem operation; blocks while the gate is full. The
    /// operation ends when the returned transaction is dropped.
    pub fn begin_op(&self, proc: &CurrentProc<'_>) -> FsTransaction<'_> {
        let mut outstanding = self.outstanding.lock();
        while *outstanding >= MAXOPBLOCKS {
            outstanding.sleep(proc);
        }
        *outstanding += 1;
        FsTransaction { log: self }
    }

    fn end_op(&self) {
        let mut outstanding = self.outstanding.lock();
        assert!(*outstanding >= 1, "end_op");
        *outstanding -= 1;
        // A begin_op may be waiting for the gate.
        outstanding.wakeup();
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        *self.outstanding.lock()
    }
}

/// An open filesystem operation; dropping it is `end_op`.
pub struct FsTransaction<'s> {
    log: &'s Log,
}

impl Drop for FsTransaction<'_> {
    fn drop(&mut self) {
        self.log.end_op();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{current_view, kernel_for_tests, retire_proc, claim_proc};

    #[test]
    fn same_inode_shares_a_slot() {
        kernel_for_tests();
        let a = kernel().itable().get(7, 42).unwrap();
        let b = kernel().itable().get(7, 42).unwrap();
        assert_eq!(a.idx, b.idx);
        assert_eq!(kernel().itable().nref(a.idx), Some(2));

        let c = kernel().itable().get(7, 43).unwrap();
        assert_ne!(a.idx, c.idx);

        drop(b);
        assert_eq!(kernel().itable().nref(a.idx), Some(1));
        drop(a);
        drop(c);
    }

    #[test]
    fn dup_and_put_balance() {
        kernel_for_tests();
        let root = kernel().itable().root();
        let idx = root.idx;
        let before = kernel().itable().nref(idx).unwrap();

        let extra = root.dup();
        assert_eq!(kernel().itable().nref(idx), Some(before + 1));
        drop(extra);
        assert_eq!(kernel().itable().nref(idx), Some(before));
        drop(root);
    }

    #[test]
    fn transactions_gate_and_release() {
        kernel_for_tests();
        let proc_slot = claim_proc();
        let proc = current_view(proc_slot);

        let log = kernel().fs_log();
        let before = log.outstanding();
        {
            let _tx = log.begin_op(&proc);
            let _tx2 = log.begin_op(&proc);
            assert!(log.outstanding() >= before + 2);
        }
        assert_eq!(log.outstanding(), before);

        drop(proc);
        retire_proc(proc_slot);
    }
}
