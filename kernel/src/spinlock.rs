//! Spin locks: mutual exclusion that busy-waits, disabling interrupts on the
//! holding hart for the duration.

use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use kernel_lib::lock::{Guard, Lock, RawLock};

use crate::cpu::{pop_off, push_off, Cpu};

/// Mutual exclusion lock that busy-waits (spins).
pub struct RawSpinlock {
    /// Name of the lock, for diagnostics.
    name: &'static str,

    /// If held, an opaque tag for the holder (the holding hart's `Cpu`);
    /// null otherwise.
    locked: AtomicPtr<Cpu>,
}

/// Locks that busy-wait (spin).
pub type Spinlock<T> = Lock<RawSpinlock, T>;
/// Guards of `Spinlock<T>`.
pub type SpinlockGuard<'s, T> = Guard<'s, RawSpinlock, T>;

/// Returns a new `Spinlock` with name `name` holding `data`.
pub const fn new_spinlock<T>(name: &'static str, data: T) -> Spinlock<T> {
    Lock::new(RawSpinlock::new(name), data)
}

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Checks whether this hart is holding the lock.
    /// Interrupts must be off.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == holder_tag()
    }
}

impl RawLock for RawSpinlock {
    /// Acquires the lock, spinning until it is free.
    ///
    /// The `Acquire` exchange pairs with the `Release` store in `release`, so
    /// stores made inside one critical section are visible to loads in the
    /// next.
    fn acquire(&self) {
        // Disable interrupts to avoid deadlock with interrupt handlers that
        // take the same lock.
        unsafe {
            push_off();
        }
        assert!(!self.holding(), "acquire {}", self.name);

        while self
            .locked
            .compare_exchange(
                ptr::null_mut(),
                holder_tag(),
                Ordering::Acquire,
                // Okay to use `Relaxed` ordering on failure since we don't
                // enter the critical section anyway.
                Ordering::Relaxed,
            )
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        assert!(self.holding(), "release {}", self.name);

        self.locked.store(ptr::null_mut(), Ordering::Release);
        unsafe {
            pop_off();
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        fn holder_tag() -> *mut Cpu {
            crate::kernel::kernel().cpus().current_raw()
        }
    } else if #[cfg(test)] {
        /// One distinct tag per test thread, so `holding()` keeps meaning
        /// "held by me" when tests run in parallel.
        fn holder_tag() -> *mut Cpu {
            use core::cell::UnsafeCell;
            std::thread_local! {
                static TAG: UnsafeCell<Cpu> = UnsafeCell::new(Cpu::new());
            }
            TAG.with(|tag| tag.get())
        }
    } else {
        fn holder_tag() -> *mut Cpu {
            crate::kernel::kernel().cpus().current_raw()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_round_trip() {
        let lock = new_spinlock("test", 3);
        {
            let mut guard = lock.lock();
            assert!(lock.raw_lock().holding());
            *guard += 1;
        }
        assert!(!lock.raw_lock().holding());
        assert_eq!(*lock.lock(), 4);
    }

    #[test]
    fn holding_is_per_thread() {
        static LOCK: Spinlock<()> = new_spinlock("shared", ());
        let guard = LOCK.lock();
        let other = std::thread::spawn(|| LOCK.raw_lock().holding());
        assert!(!other.join().unwrap());
        assert!(LOCK.raw_lock().holding());
        drop(guard);
    }
}
