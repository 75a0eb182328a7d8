//! Host simulation of the platform for unit tests.
//!
//! Every kernel thread is backed by a host thread, but only the one holding
//! the baton runs; a context switch hands the baton over and parks the
//! caller. The interrupt flag is a plain boolean and interrupts arrive only
//! when a test calls [`deliver`], the idle thread halts, or a busy wait
//! spins past a simulated tick.

use std::boxed::Box;
use std::collections::HashMap;
use std::string::String;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::vec::Vec;

use spin::Once;

use crate::config::SchedConfig;
use crate::context::ExecutionContext;
use crate::interrupt::{InterruptFrame, IntrLevel, Platform, TIMER_VECTOR};
use crate::sched::Scheduler;
use crate::thread::KernelStack;

// ── Context ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Parked,
    Running,
    /// The thread was reclaimed; its host thread must unwind and end.
    Retired,
}

/// Payload of the unwind that ends a reclaimed thread's host thread.
struct Retired;

struct Baton {
    turn: Mutex<Turn>,
    wake: Condvar,
}

impl Baton {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            turn: Mutex::new(Turn::Parked),
            wake: Condvar::new(),
        })
    }

    fn set(&self, turn: Turn) {
        *self.turn.lock().unwrap() = turn;
        self.wake.notify_all();
    }

    fn wait(&self) {
        let mut turn = self.turn.lock().unwrap();
        loop {
            match *turn {
                Turn::Running => {
                    *turn = Turn::Parked;
                    return;
                }
                Turn::Retired => {
                    drop(turn);
                    std::panic::resume_unwind(Box::new(Retired));
                }
                Turn::Parked => turn = self.wake.wait(turn).unwrap(),
            }
        }
    }
}

pub struct SimContext {
    baton: Arc<Baton>,
}

unsafe impl ExecutionContext for SimContext {
    fn boot() -> Self {
        Self {
            baton: Baton::new(),
        }
    }

    fn prepare(_stack: &mut KernelStack, entry: fn(usize), arg: usize) -> Self {
        let baton = Baton::new();
        let mine = baton.clone();
        std::thread::spawn(move || {
            mine.wait();
            entry(arg);
        });
        Self { baton }
    }

    unsafe fn switch(from: *mut Self, to: *const Self) {
        // Clone both batons first: `from` may be freed while we are parked.
        let (from, to) = unsafe { ((*from).baton.clone(), (*to).baton.clone()) };
        to.set(Turn::Running);
        from.wait();
    }
}

impl Drop for SimContext {
    fn drop(&mut self) {
        self.baton.set(Turn::Retired);
    }
}

// ── Platform ────────────────────────────────────────────────────

type TimerHook = Box<dyn Fn() + Send + Sync>;

/// Busy-wait loops between two simulated timer interrupts.
pub const SIM_LOOPS_PER_TICK: u64 = 5000;

pub struct SimPlatform {
    interrupts: AtomicBool,
    gates: Mutex<HashMap<u8, (u8, IntrLevel)>>,
    acknowledged: Mutex<Vec<u8>>,
    timer: Once<TimerHook>,
    /// Busy-wait loops run so far.
    spun: AtomicU64,
}

impl SimPlatform {
    /// Boots with interrupts masked, like the real CPU.
    pub fn new() -> Self {
        Self {
            interrupts: AtomicBool::new(false),
            gates: Mutex::new(HashMap::new()),
            acknowledged: Mutex::new(Vec::new()),
            timer: Once::new(),
            spun: AtomicU64::new(0),
        }
    }

    /// What `install_gate` last recorded for `vector`.
    pub fn gate(&self, vector: u8) -> Option<(u8, IntrLevel)> {
        self.gates.lock().unwrap().get(&vector).copied()
    }

    /// Every vector that received an end-of-interrupt, oldest first.
    pub fn acknowledged(&self) -> Vec<u8> {
        self.acknowledged.lock().unwrap().clone()
    }

    /// Busy-wait loops run so far.
    pub fn spun(&self) -> u64 {
        self.spun.load(Ordering::SeqCst)
    }

    /// Install the timer: `hook` runs whenever a thread halts waiting for
    /// an interrupt and every [`SIM_LOOPS_PER_TICK`] busy-wait loops.
    pub fn set_timer(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.timer.call_once(|| Box::new(hook));
    }

    fn fire_timer(&self) {
        match self.timer.get() {
            Some(hook) => hook(),
            None => panic!("halted with no interrupt source"),
        }
    }
}

impl Platform for SimPlatform {
    type Context = SimContext;

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.load(Ordering::SeqCst)
    }

    fn enable_interrupts(&self) {
        self.interrupts.store(true, Ordering::SeqCst);
    }

    fn disable_interrupts(&self) {
        self.interrupts.store(false, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        self.enable_interrupts();
        self.fire_timer();
    }

    fn end_of_interrupt(&self, vector: u8) {
        self.acknowledged.lock().unwrap().push(vector);
    }

    fn install_gate(&self, vector: u8, dpl: u8, level: IntrLevel) {
        self.gates.lock().unwrap().insert(vector, (dpl, level));
    }

    fn busy_wait(&self, loops: u64) {
        for _ in 0..loops {
            let spun = self.spun.fetch_add(1, Ordering::SeqCst) + 1;
            // A masked CPU would take the tick later; here it is lost.
            if spun % SIM_LOOPS_PER_TICK == 0 && self.interrupts_enabled() {
                self.fire_timer();
            }
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────

/// A started scheduler whose idle thread halts into timer interrupts.
pub fn boot() -> &'static Scheduler<SimPlatform> {
    boot_with(SchedConfig::default())
}

pub fn boot_with(config: SchedConfig) -> &'static Scheduler<SimPlatform> {
    let sched: &'static Scheduler<SimPlatform> =
        Box::leak(Box::new(Scheduler::new(SimPlatform::new(), config)));
    sched
        .platform()
        .set_timer(move || deliver(sched, TIMER_VECTOR));
    sched.start().unwrap();
    sched
}

/// Raise interrupt `vector` on the running thread, the way the CPU would:
/// mask, run the common handler path, restore the flag on return.
pub fn deliver(sched: &Scheduler<SimPlatform>, vector: u8) {
    let platform = sched.platform();
    assert!(
        platform.interrupts_enabled(),
        "interrupt delivered while masked"
    );
    platform.disable_interrupts();
    sched.handle_interrupt(&mut InterruptFrame::new(vector));
    platform.enable_interrupts();
}

/// Ordered record of what test threads did.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
