//! Counting semaphore.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use spin::Mutex;

use crate::error::ThreadError;
use crate::interrupt::Platform;
use crate::sched::Scheduler;
use crate::thread::{PRI_DEFAULT, ThreadId, WaitListId};

struct SemaState {
    value: u32,
    /// Highest priority first at insertion; re-sorted before every wakeup.
    waiters: VecDeque<ThreadId>,
}

/// A non-negative counter with two atomic operations: `down` waits for it to
/// become positive and decrements it, `up` increments it and wakes one
/// waiter.
pub struct Semaphore {
    state: Mutex<SemaState>,
}

impl Semaphore {
    pub fn new(value: u32) -> Self {
        Self {
            state: Mutex::new(SemaState {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Identity of this semaphore's waiter list: its address, which cannot
    /// change while a thread waits on it.
    pub(crate) fn wait_list(&self) -> WaitListId {
        WaitListId(core::ptr::from_ref(self) as usize as u64)
    }

    /// Wait until the value is positive, then decrement it.
    ///
    /// May block, so never call it from an interrupt handler. It can be
    /// called with interrupts masked; if it blocks, the next thread decides
    /// the interrupt level.
    pub fn down<P: Platform>(&self, sched: &Scheduler<P>) {
        self.down_with(sched, || {});
    }

    /// `down` that runs `before_block` each time the caller is about to
    /// block. `Lock` uses this to donate its priority.
    pub(crate) fn down_with<P: Platform>(&self, sched: &Scheduler<P>, mut before_block: impl FnMut()) {
        assert!(
            !sched.interrupts().in_interrupt(),
            "semaphore down inside an interrupt handler"
        );
        let _guard = sched.interrupts().mask_scoped();
        loop {
            {
                let mut state = self.state.lock();
                if state.value > 0 {
                    state.value -= 1;
                    return;
                }
                sched.enqueue_waiter(&mut state.waiters, self.wait_list());
            }
            before_block();
            sched.block();
        }
    }

    /// Decrement if positive, without waiting. Safe in interrupt handlers.
    pub fn try_down<P: Platform>(&self, sched: &Scheduler<P>) -> bool {
        let _guard = sched.interrupts().mask_scoped();
        let mut state = self.state.lock();
        if state.value > 0 {
            state.value -= 1;
            true
        } else {
            false
        }
    }

    /// Increment and wake the highest-priority waiter, yielding to it if it
    /// outranks the caller. Safe in interrupt handlers, where the yield is
    /// deferred until the handler returns.
    pub fn up<P: Platform>(&self, sched: &Scheduler<P>) {
        {
            let _guard = sched.interrupts().mask_scoped();
            let mut state = self.state.lock();
            sched.wake_highest(&mut state.waiters);
            state.value += 1;
        }
        sched.yield_to_higher_priority();
    }

    pub fn value<P: Platform>(&self, sched: &Scheduler<P>) -> u32 {
        let _guard = sched.interrupts().mask_scoped();
        self.state.lock().value
    }

    pub fn waiter_count<P: Platform>(&self, sched: &Scheduler<P>) -> usize {
        let _guard = sched.interrupts().mask_scoped();
        self.state.lock().waiters.len()
    }

    /// Run `f` on the threads blocked in `down`, with the list locked.
    pub(crate) fn with_waiters<P: Platform, R>(
        &self,
        sched: &Scheduler<P>,
        f: impl FnOnce(&VecDeque<ThreadId>) -> R,
    ) -> R {
        let _guard = sched.interrupts().mask_scoped();
        f(&self.state.lock().waiters)
    }

    /// Ping-pong control between two threads through a pair of semaphores.
    /// Log output shows whether it completed.
    pub fn self_test<P: Platform>(sched: &'static Scheduler<P>) -> Result<(), ThreadError> {
        log::info!("Testing semaphores...");
        let pair = Arc::new([Semaphore::new(0), Semaphore::new(0)]);
        let theirs = pair.clone();
        sched.spawn("sema-test", PRI_DEFAULT, move || ping_pong(sched, &theirs))?;
        for _ in 0..10 {
            pair[0].up(sched);
            pair[1].down(sched);
        }
        log::info!("Testing semaphores... done.");
        Ok(())
    }
}

fn ping_pong<P: Platform>(sched: &Scheduler<P>, pair: &[Semaphore; 2]) {
    for _ in 0..10 {
        pair[0].down(sched);
        pair[1].up(sched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::boot;

    #[test]
    fn down_then_up_restores_value() {
        let sched = boot();
        let sema = Semaphore::new(2);
        sema.down(sched);
        assert_eq!(sema.value(sched), 1);
        sema.up(sched);
        assert_eq!(sema.value(sched), 2);
    }

    #[test]
    fn try_down_never_blocks() {
        let sched = boot();
        let sema = Semaphore::new(1);
        assert!(sema.try_down(sched));
        assert!(!sema.try_down(sched));
        assert_eq!(sema.value(sched), 0);
        assert_eq!(sema.waiter_count(sched), 0);
    }

    #[test]
    fn each_semaphore_has_its_own_wait_list() {
        let pair = [Semaphore::new(0), Semaphore::new(0)];
        assert_ne!(pair[0].wait_list(), pair[1].wait_list());
        assert_eq!(pair[0].wait_list(), pair[0].wait_list());
    }
}
