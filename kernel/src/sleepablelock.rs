//! Sleepable locks: spinlocks whose guards can block on a built-in wait
//! channel, for conditions like the tick counter and the fs-op gate.

use kernel_lib::lock::{Guard, Lock, RawLock};

use crate::proc::{CurrentProc, WaitChannel};
use crate::spinlock::RawSpinlock;

pub struct RawSleepablelock {
    lock: RawSpinlock,
    /// Channel used to park and wake this lock's guards.
    channel: WaitChannel,
}

/// Similar to `Spinlock`, but guards of this lock can sleep.
pub type Sleepablelock<T> = Lock<RawSleepablelock, T>;
/// Guards of `Sleepablelock<T>`; these can `sleep()` and `wakeup()`.
pub type SleepablelockGuard<'s, T> = Guard<'s, RawSleepablelock, T>;

/// Returns a new `Sleepablelock` with name `name` holding `data`.
pub const fn new_sleepable_lock<T>(name: &'static str, data: T) -> Sleepablelock<T> {
    Lock::new(RawSleepablelock::new(name), data)
}

impl RawSleepablelock {
    const fn new(name: &'static str) -> Self {
        Self {
            lock: RawSpinlock::new(name),
            channel: WaitChannel::new(),
        }
    }
}

impl RawLock for RawSleepablelock {
    fn acquire(&self) {
        self.lock.acquire();
    }

    fn release(&self) {
        self.lock.release();
    }
}

/// Blocking operations of `SleepablelockGuard`.
pub trait SleepableGuard {
    /// Atomically releases the lock and sleeps on its channel; the lock is
    /// held again on return.
    fn sleep(&mut self, proc: &CurrentProc<'_>);

    /// Wakes everyone sleeping on this lock's channel.
    fn wakeup(&self);
}

impl<T> SleepableGuard for SleepablelockGuard<'_, T> {
    fn sleep(&mut self, proc: &CurrentProc<'_>) {
        let channel = &self.get_lock().raw_lock().channel;
        channel.sleep(self, proc);
    }

    fn wakeup(&self) {
        self.get_lock().raw_lock().channel.wakeup();
    }
}
