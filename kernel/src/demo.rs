//! Boot-time exercises for the scheduler, run on the `main` thread.
//!
//! Each check logs its outcome and panics on a wrong result, so a clean
//! run ends with the statistics line and "scheduler shut down".

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use kthread::{Condition, Lock, PRI_DEFAULT, Priority, Scheduler, Semaphore, ThreadError};
use spin::Mutex;

use crate::platform::X86Platform;

type Sched = Scheduler<X86Platform>;

/// Event log shared between demo threads. Appends are done with interrupts
/// masked so a preempted writer never leaves the spin lock held.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<u32>>>);

impl Journal {
    fn record(&self, sched: &Sched, value: u32) {
        let _guard = sched.interrupts().mask_scoped();
        self.0.lock().push(value);
    }

    fn entries(&self, sched: &Sched) -> Vec<u32> {
        let _guard = sched.interrupts().mask_scoped();
        self.0.lock().clone()
    }
}

pub fn run(sched: &'static Sched) -> Result<(), ThreadError> {
    Semaphore::self_test(sched)?;
    priority_order(sched)?;
    priority_donation(sched)?;
    alarm_order(sched)?;
    real_time_sleep(sched);
    bounded_buffer(sched)?;
    klog::info!("all scheduler checks passed");
    Ok(())
}

/// Threads above `main` run as soon as they are ready, highest first.
fn priority_order(sched: &'static Sched) -> Result<(), ThreadError> {
    let journal = Journal::default();
    let done = Arc::new(Semaphore::new(0));

    // Outrank them all so none runs before the last one is ready.
    sched.set_priority(PRI_DEFAULT + 5);
    for priority in [PRI_DEFAULT - 3, PRI_DEFAULT - 1, PRI_DEFAULT - 2] {
        let (journal, done) = (journal.clone(), done.clone());
        sched.spawn("prio", priority, move || {
            journal.record(sched, sched.priority() as u32);
            done.up(sched);
        })?;
    }
    sched.set_priority(PRI_DEFAULT);
    for _ in 0..3 {
        done.down(sched);
    }

    let order = journal.entries(sched);
    assert_eq!(order, [30, 29, 28]);
    klog::info!("priority order: {:?}", order);
    Ok(())
}

/// A lock holder runs at the priority of its highest waiter until release.
fn priority_donation(sched: &'static Sched) -> Result<(), ThreadError> {
    let lock = Arc::new(Lock::new());
    let done = Arc::new(Semaphore::new(0));

    lock.acquire(sched);
    for boost in [1, 2] {
        let (lock, done) = (lock.clone(), done.clone());
        sched.spawn("donor", PRI_DEFAULT + boost, move || {
            lock.acquire(sched);
            klog::info!("donor at {} got the lock", sched.priority());
            lock.release(sched);
            done.up(sched);
        })?;
        sched.yield_to_higher_priority();
        let expected: Priority = PRI_DEFAULT + boost;
        assert_eq!(sched.priority(), expected);
        klog::info!("main holds the lock at donated priority {}", expected);
    }

    lock.release(sched);
    assert_eq!(sched.priority(), PRI_DEFAULT);
    for _ in 0..2 {
        done.down(sched);
    }
    klog::info!("donation returned: main back at {}", sched.priority());
    Ok(())
}

/// Sleepers wake in order of their deadline, not of their creation.
fn alarm_order(sched: &'static Sched) -> Result<(), ThreadError> {
    let journal = Journal::default();
    let done = Arc::new(Semaphore::new(0));
    let start = sched.ticks();

    for delay in [30, 10, 20] {
        let (journal, done) = (journal.clone(), done.clone());
        sched.spawn("sleeper", PRI_DEFAULT, move || {
            sched.sleep(delay);
            journal.record(sched, delay as u32);
            done.up(sched);
        })?;
    }
    for _ in 0..3 {
        done.down(sched);
    }

    let order = journal.entries(sched);
    assert_eq!(order, [10, 20, 30]);
    klog::info!("alarms fired in order {:?} after {} ticks", order, sched.elapsed(start));
    Ok(())
}

/// Millisecond sleeps block for whole ticks; shorter ones spin.
fn real_time_sleep(sched: &Sched) {
    let start = sched.ticks();
    sched.msleep(50);
    let slept = sched.elapsed(start);
    assert!(slept >= 5, "msleep(50) returned after {slept} ticks");

    let start = sched.ticks();
    sched.usleep(100);
    klog::info!(
        "msleep(50) took {} ticks, usleep(100) took {} ticks",
        slept,
        sched.elapsed(start)
    );
}

/// Producer and consumer over a two-slot buffer guarded by a monitor.
fn bounded_buffer(sched: &'static Sched) -> Result<(), ThreadError> {
    const ITEMS: u32 = 16;
    const CAPACITY: usize = 2;

    struct Monitor {
        lock: Lock,
        not_full: Condition,
        not_empty: Condition,
        slots: Mutex<VecDeque<u32>>,
    }

    let monitor = Arc::new(Monitor {
        lock: Lock::new(),
        not_full: Condition::new(),
        not_empty: Condition::new(),
        slots: Mutex::new(VecDeque::new()),
    });
    let done = Arc::new(Semaphore::new(0));

    let producer = monitor.clone();
    sched.spawn("producer", PRI_DEFAULT, move || {
        for item in 0..ITEMS {
            producer.lock.acquire(sched);
            while producer.slots.lock().len() == CAPACITY {
                producer.not_full.wait(&producer.lock, sched);
            }
            producer.slots.lock().push_back(item);
            producer.not_empty.signal(&producer.lock, sched);
            producer.lock.release(sched);
        }
    })?;

    let consumer = monitor.clone();
    let consumer_done = done.clone();
    sched.spawn("consumer", PRI_DEFAULT, move || {
        let mut sum = 0;
        for _ in 0..ITEMS {
            consumer.lock.acquire(sched);
            let item = loop {
                // Bind first so the slot guard is gone before `wait` blocks.
                let next = consumer.slots.lock().pop_front();
                match next {
                    Some(item) => break item,
                    None => consumer.not_empty.wait(&consumer.lock, sched),
                }
            };
            consumer.not_full.signal(&consumer.lock, sched);
            consumer.lock.release(sched);
            sum += item;
        }
        assert_eq!(sum, ITEMS * (ITEMS - 1) / 2);
        klog::info!("consumer received {} items, sum {}", ITEMS, sum);
        consumer_done.up(sched);
    })?;

    done.down(sched);
    Ok(())
}
