use kernel_lib::lock::{Guard, RawLock};

use crate::kernel::kernel;
use crate::proc::{CurrentProc, ProcState};

/// A rendezvous point for `sleep`/`wakeup`.
///
/// The channel's *address* is its identity; sleepers record it and wakers
/// match on it. The padding byte keeps the type non-zero-sized — otherwise
/// distinct channels could share an address and spuriously wake each other.
pub struct WaitChannel {
    _padding: u8,
}

/// The opaque token a sleeping slot is parked on. It is only ever compared,
/// never dereferenced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChannelId(usize);

impl WaitChannel {
    pub const fn new() -> Self {
        Self { _padding: 0 }
    }

    pub fn id(&self) -> ChannelId {
        ChannelId(self as *const WaitChannel as usize)
    }

    /// Atomically releases `lock_guard` and sleeps on this channel.
    /// Reacquires the lock when awakened; it is always held again on return.
    pub fn sleep<R: RawLock, T>(&self, lock_guard: &mut Guard<'_, R, T>, proc: &CurrentProc<'_>) {
        // Must acquire the slot's lock in order to change its state and then
        // call sched. Once we hold it, we are guaranteed not to miss any
        // wakeup (wakeup locks every slot), so it's okay to release the
        // outer lock.
        let mut guard = proc.lock();
        lock_guard.reacquire_after(move || {
            // Go to sleep.
            guard.deref_mut_info().state = ProcState::Sleeping { channel: self.id() };

            // SAFETY: we hold the slot's lock and have left the Running
            // state; interrupts are off because the lock is held.
            unsafe { guard.sched() };

            // Awakened: the waker already moved us out of Sleeping, so there
            // is no channel left to tidy up. Release the slot's lock before
            // reacquiring the outer lock.
            drop(guard);
        });
    }

    /// Wakes up all processes sleeping on this channel.
    /// Must be called without any slot lock held.
    pub fn wakeup(&self) {
        kernel().procs().wakeup_pool(self.id());
    }
}
