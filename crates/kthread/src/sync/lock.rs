//! Mutual-exclusion lock with priority donation.
//!
//! A lock is a semaphore with an initial value of one plus a holder. While
//! a thread waits for a held lock, it lends its effective priority to the
//! holder (and, if the holder itself waits for a lock, to that lock's
//! holder, and so on). Releasing a lock returns what was lent through it.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::interrupt::Platform;
use crate::sched::Scheduler;
use crate::sync::semaphore::Semaphore;
use crate::thread::ThreadId;

/// Shared part of a [`Lock`]. Waiting threads keep a weak reference to it
/// so donations can be traced back to the lock they came through.
pub(crate) struct LockCore {
    /// Raw id of the holder, 0 when free.
    holder: AtomicU64,
    pub(crate) sema: Semaphore,
}

impl LockCore {
    pub(crate) fn holder(&self) -> Option<ThreadId> {
        ThreadId::new(self.holder.load(Ordering::Acquire))
    }

    pub(crate) fn set_holder(&self, holder: Option<ThreadId>) {
        self.holder
            .store(holder.map_or(0, ThreadId::as_u64), Ordering::Release);
    }
}

/// Held by at most one thread at a time. Not recursive: acquiring a lock
/// the caller already holds is a bug.
pub struct Lock {
    core: Arc<LockCore>,
}

impl Lock {
    pub fn new() -> Self {
        Self {
            core: Arc::new(LockCore {
                holder: AtomicU64::new(0),
                sema: Semaphore::new(1),
            }),
        }
    }

    /// Acquire, sleeping until the lock is free.
    pub fn acquire<P: Platform>(&self, sched: &Scheduler<P>) {
        assert!(
            !sched.interrupts().in_interrupt(),
            "lock acquired inside an interrupt handler"
        );
        assert!(
            !self.held_by_current_thread(sched),
            "lock acquired twice by thread {}",
            sched.current()
        );

        let _guard = sched.interrupts().mask_scoped();
        self.core
            .sema
            .down_with(sched, || sched.donate(&self.core));
        self.finish_acquire(sched);
    }

    /// Acquire only if free right now.
    pub fn try_acquire<P: Platform>(&self, sched: &Scheduler<P>) -> bool {
        assert!(
            !self.held_by_current_thread(sched),
            "lock acquired twice by thread {}",
            sched.current()
        );

        let _guard = sched.interrupts().mask_scoped();
        if !self.core.sema.try_down(sched) {
            return false;
        }
        self.finish_acquire(sched);
        true
    }

    /// Record the caller as holder; threads still queued on the lock now
    /// donate to it.
    fn finish_acquire<P: Platform>(&self, sched: &Scheduler<P>) {
        self.core
            .sema
            .with_waiters(sched, |waiters| sched.finish_acquire(&self.core, waiters));
    }

    /// Release; the caller must hold the lock.
    pub fn release<P: Platform>(&self, sched: &Scheduler<P>) {
        assert!(
            self.held_by_current_thread(sched),
            "lock released by thread {} which does not hold it",
            sched.current()
        );

        let _guard = sched.interrupts().mask_scoped();
        sched.release_donations(&self.core);
        self.core.sema.up(sched);
    }

    pub fn held_by_current_thread<P: Platform>(&self, sched: &Scheduler<P>) -> bool {
        self.core.holder() == Some(sched.current())
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.core.holder()
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, boot};

    #[test]
    fn try_acquire_fails_while_held() {
        let sched = boot();
        let lock = Arc::new(Lock::new());
        assert!(lock.try_acquire(sched));
        assert_eq!(lock.holder(), Some(sched.current()));

        let (l, log) = (lock.clone(), Journal::default());
        let j = log.clone();
        sched
            .spawn("contender", 40, move || j.record(l.try_acquire(sched).to_string()))
            .unwrap();
        sched.yield_to_higher_priority();
        assert_eq!(log.entries(), ["false"]);

        lock.release(sched);
        assert_eq!(lock.holder(), None);
    }

    #[test]
    fn holders_are_mutually_exclusive() {
        let sched = boot();
        let lock = Arc::new(Lock::new());
        let log = Journal::default();

        for name in ["first", "second", "third"] {
            let (l, j) = (lock.clone(), log.clone());
            sched
                .spawn(name, 40, move || {
                    l.acquire(sched);
                    j.record(format!("{name} in"));
                    // Let the others try while the lock is held.
                    sched.sleep(1);
                    j.record(format!("{name} out"));
                    l.release(sched);
                })
                .unwrap();
        }
        sched.sleep(10);

        assert_eq!(
            log.entries(),
            ["first in", "first out", "second in", "second out", "third in", "third out"]
        );
    }

    #[test]
    #[should_panic(expected = "acquired twice")]
    fn recursive_acquire_is_fatal() {
        let sched = boot();
        let lock = Lock::new();
        lock.acquire(sched);
        lock.acquire(sched);
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn release_without_holding_is_fatal() {
        let sched = boot();
        Lock::new().release(sched);
    }
}
