//! Concurrency primitives, named after and playing the same role as the
//! teacher's own `Spinlock`/`SleepLock` pair: a short-held lock for
//! metadata that is never held across another acquisition, and a
//! longer-held lock that may be held across device I/O.
//!
//! The teacher's `Spinlock` disables interrupts on the current hart, which
//! only makes sense pinned to its own kernel's scheduler; this core is not
//! tied to one architecture's interrupt-control registers, so `Spinlock`
//! here is a thin, portable wrapper around `spin::Mutex` instead.

use std::sync::{Mutex, MutexGuard};

/// A lock meant to be held briefly (cache metadata, the open-inode table).
pub struct Spinlock<T> {
    inner: spin::Mutex<T>,
}

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, T> {
        self.inner.lock()
    }
}

/// A lock meant to be held for the duration of a read/write/expand/free,
/// i.e. possibly across blocking device I/O — a genuine OS mutex, not a
/// busy-wait, since the calling thread may be preempted while holding it.
pub struct Sleeplock<T> {
    inner: Mutex<T>,
}

impl<T> Sleeplock<T> {
    pub fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        // A poisoned lock means some other thread panicked while holding
        // it; this core never panics out of a locked section, so recover
        // the guard rather than force every caller to handle poisoning.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
