//! Mesa-style condition variable.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::interrupt::Platform;
use crate::sched::Scheduler;
use crate::sync::lock::Lock;
use crate::sync::semaphore::Semaphore;
use crate::thread::ThreadId;

/// One waiting thread and the private semaphore it sleeps on.
struct Waiter {
    thread: ThreadId,
    sema: Arc<Semaphore>,
}

/// Lets a thread holding a [`Lock`] wait until another thread signals that
/// some condition may have changed.
///
/// Signalling is not atomic with the waiter re-acquiring the lock, so a
/// woken thread must re-check its condition in a loop.
pub struct Condition {
    waiters: Mutex<VecDeque<Waiter>>,
}

impl Condition {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Release `lock`, sleep until signalled, re-acquire `lock`.
    pub fn wait<P: Platform>(&self, lock: &Lock, sched: &Scheduler<P>) {
        assert!(
            !sched.interrupts().in_interrupt(),
            "condition wait inside an interrupt handler"
        );
        assert!(
            lock.held_by_current_thread(sched),
            "condition wait without holding its lock"
        );

        let sema = Arc::new(Semaphore::new(0));
        let thread = sched.current();
        {
            let _guard = sched.interrupts().mask_scoped();
            self.waiters.lock().push_back(Waiter {
                thread,
                sema: sema.clone(),
            });
        }
        lock.release(sched);
        sema.down(sched);
        lock.acquire(sched);
    }

    /// Wake the highest-priority waiter, if any.
    pub fn signal<P: Platform>(&self, lock: &Lock, sched: &Scheduler<P>) {
        assert!(
            !sched.interrupts().in_interrupt(),
            "condition signal inside an interrupt handler"
        );
        assert!(
            lock.held_by_current_thread(sched),
            "condition signal without holding its lock"
        );

        let woken = {
            let _guard = sched.interrupts().mask_scoped();
            let mut waiters = self.waiters.lock();
            let mut best: Option<(usize, u8)> = None;
            for (i, waiter) in waiters.iter().enumerate() {
                let priority = sched.priority_of(waiter.thread).unwrap_or(0);
                if best.is_none_or(|(_, p)| priority > p) {
                    best = Some((i, priority));
                }
            }
            best.and_then(|(i, _)| waiters.remove(i))
        };
        if let Some(waiter) = woken {
            waiter.sema.up(sched);
        }
    }

    /// Wake every waiter.
    pub fn broadcast<P: Platform>(&self, lock: &Lock, sched: &Scheduler<P>) {
        while self.waiter_count(sched) > 0 {
            self.signal(lock, sched);
        }
    }

    pub fn waiter_count<P: Platform>(&self, sched: &Scheduler<P>) -> usize {
        let _guard = sched.interrupts().mask_scoped();
        self.waiters.lock().len()
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::boot;

    #[test]
    fn signal_without_waiters_is_a_no_op() {
        let sched = boot();
        let lock = Lock::new();
        let cond = Condition::new();
        lock.acquire(sched);
        cond.signal(&lock, sched);
        cond.broadcast(&lock, sched);
        lock.release(sched);
        assert_eq!(cond.waiter_count(sched), 0);
    }

    #[test]
    #[should_panic(expected = "without holding its lock")]
    fn wait_requires_the_lock() {
        let sched = boot();
        Condition::new().wait(&Lock::new(), sched);
    }
}
