//! Priority scheduler.
//!
//! One [`Scheduler`] value owns every thread control block, the ready queue,
//! the idle thread and the tick counters. The kernel keeps it in a
//! `spin::Once` static; everything below takes `&'static self` where a new
//! thread must be able to find its scheduler again.
//!
//! ## Locking
//!
//! All scheduler state sits behind one spin lock, always taken with
//! interrupts masked. Synchronization objects take their own lock first and
//! the scheduler lock second, never the other way round. No spin lock is
//! held across a context switch: [`Scheduler::schedule`] copies the two
//! context pointers out, drops the guard, then switches.

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cmp::Reverse;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::config::{SchedConfig, SchedPolicy};
use crate::context::ExecutionContext;
use crate::error::{Exhausted, ThreadError};
use crate::interrupt::{InterruptFrame, InterruptGate, IntrLevel, Platform, TIMER_VECTOR};
use crate::ready::ReadyQueue;
use crate::sync::lock::LockCore;
use crate::thread::{
    KernelStack, PRI_DEFAULT, PRI_MIN, Priority, QueueSlot, Tcb, ThreadBody, ThreadId,
    ThreadInfo, ThreadStatus, WaitListId, check_priority,
};

/// Range accepted by [`Scheduler::set_nice`].
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 20;

/// Where the timer ticks went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ticks that interrupted the idle thread.
    pub idle_ticks: u64,
    /// Ticks that interrupted any other thread.
    pub kernel_ticks: u64,
}

// ── Scheduler state ─────────────────────────────────────────────

struct SchedState<C> {
    /// The thread table.
    threads: BTreeMap<ThreadId, Tcb<C>>,
    ready: ReadyQueue,
    current: ThreadId,
    /// Boot thread; runs on the boot stack and is never reclaimed.
    initial: ThreadId,
    idle: Option<ThreadId>,
    /// Dying threads switched away from, freed by the next `schedule`.
    reclaim: Vec<ThreadId>,
    /// Threads blocked in `sleep`, in the order they went to sleep.
    sleepers: Vec<ThreadId>,
    /// Exit codes of reclaimed `create_thread` threads not yet taken.
    exit_codes: BTreeMap<ThreadId, i32>,
    next_tid: u64,
    /// Ticks the running thread has used of its time slice.
    slice_ticks: u32,
    stats: TickStats,
}

impl<C> SchedState<C> {
    fn tcb(&self, tid: ThreadId) -> &Tcb<C> {
        self.threads
            .get(&tid)
            .unwrap_or_else(|| panic!("no thread with id {tid}"))
    }

    fn tcb_mut(&mut self, tid: ThreadId) -> &mut Tcb<C> {
        self.threads
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("no thread with id {tid}"))
    }

    fn alloc_tid(&mut self) -> ThreadId {
        let tid = ThreadId::new(self.next_tid).expect("thread ids start at 1");
        self.next_tid += 1;
        tid
    }

    fn priority_or_min(&self, tid: ThreadId) -> Priority {
        self.threads.get(&tid).map_or(PRI_MIN, |t| t.priority)
    }

    /// Blocked -> Ready, queued by effective priority.
    fn make_ready(&mut self, tid: ThreadId) {
        let tcb = self.tcb_mut(tid);
        assert!(
            tcb.status == ThreadStatus::Blocked,
            "unblock of thread {} ({}) which is {:?}, not blocked",
            tid,
            tcb.name,
            tcb.status
        );
        tcb.status = ThreadStatus::Ready;
        tcb.queue = QueueSlot::Ready;
        let priority = tcb.priority;
        self.ready.push(tid, priority);
    }

    fn set_effective(&mut self, tid: ThreadId, priority: Priority) {
        let Some(tcb) = self.threads.get_mut(&tid) else {
            return;
        };
        tcb.priority = priority;
        if tcb.queue == QueueSlot::Ready {
            self.ready.reprioritize(tid, priority);
        }
    }

    /// Effective priority := max(base, every donor's effective priority).
    fn refresh(&mut self, tid: ThreadId) {
        let Some(tcb) = self.threads.get(&tid) else {
            return;
        };
        let donated = tcb
            .donations
            .iter()
            .filter_map(|d| self.threads.get(d))
            .map(|d| d.priority)
            .max();
        let effective = donated.map_or(tcb.base_priority, |d| d.max(tcb.base_priority));
        self.set_effective(tid, effective);
    }

    fn take_reclaimed(&mut self) -> Vec<Tcb<C>> {
        let mut dead = Vec::new();
        for tid in core::mem::take(&mut self.reclaim) {
            if let Some(tcb) = self.threads.remove(&tid) {
                if tcb.collect_exit {
                    self.exit_codes.insert(tid, tcb.exit_status);
                }
                dead.push(tcb);
            }
        }
        dead
    }
}

/// How `create` treats a new thread.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Exit code kept for `take_exit_status`.
    Collected,
    Detached,
    /// Never queued; runs only when nothing else is ready.
    Idle,
}

fn waits_on<C>(tcb: &Tcb<C>, lock: &Arc<LockCore>) -> bool {
    tcb.wait_on_lock
        .as_ref()
        .is_some_and(|w| core::ptr::eq(w.as_ptr(), Arc::as_ptr(lock)))
}

// ── Scheduler ───────────────────────────────────────────────────

pub struct Scheduler<P: Platform> {
    gate: InterruptGate<P>,
    config: SchedConfig,
    /// Timer ticks since `start`.
    ticks: AtomicU64,
    /// Busy-wait loops that fit in one tick; 0 until `calibrate`.
    loops_per_tick: AtomicU64,
    state: Mutex<SchedState<P::Context>>,
}

impl<P: Platform> Scheduler<P> {
    /// Turn the code running right now into the thread `main`.
    ///
    /// Must be called with interrupts masked, before anything else in this
    /// crate is used.
    pub fn new(platform: P, config: SchedConfig) -> Self {
        let gate = InterruptGate::new(platform);
        assert_eq!(
            gate.level(),
            IntrLevel::Off,
            "scheduler initialised with interrupts enabled"
        );

        let mut state = SchedState {
            threads: BTreeMap::new(),
            ready: ReadyQueue::new(),
            current: ThreadId::new(1).expect("thread ids start at 1"),
            initial: ThreadId::new(1).expect("thread ids start at 1"),
            idle: None,
            reclaim: Vec::new(),
            sleepers: Vec::new(),
            exit_codes: BTreeMap::new(),
            next_tid: 1,
            slice_ticks: 0,
            stats: TickStats::default(),
        };
        let tid = state.alloc_tid();
        let mut main = Tcb::new(tid, "main", PRI_DEFAULT, P::Context::boot(), None, None);
        main.status = ThreadStatus::Running;
        state.threads.insert(tid, main);
        state.current = tid;
        state.initial = tid;

        Self {
            gate,
            config,
            ticks: AtomicU64::new(0),
            loops_per_tick: AtomicU64::new(0),
            state: Mutex::new(state),
        }
    }

    /// Create the idle thread, hook the timer and enable interrupts.
    pub fn start(&'static self) -> Result<(), ThreadError> {
        if self.config.policy == SchedPolicy::Mlfqs {
            log::warn!("mlfqs requested; scheduling with priority round robin");
        }

        self.gate
            .register_external(TIMER_VECTOR, "8254 Timer", move |_| self.timer_tick());
        self.create("idle", PRI_MIN, Box::new(move || self.idle_loop()), Role::Idle)?;

        log::info!(
            "scheduler started: time slice {} ticks, {} KiB stacks, {} threads max",
            self.config.time_slice,
            self.config.stack_size / 1024,
            self.config.max_threads
        );
        self.gate.unmask();
        Ok(())
    }

    /// Mask interrupts for good, free what is left to free, report.
    pub fn shutdown(&self) {
        self.gate.mask();
        let dead = self.state.lock().take_reclaimed();
        drop(dead);
        self.print_stats();
        log::info!("scheduler shut down");
    }

    pub fn interrupts(&self) -> &InterruptGate<P> {
        &self.gate
    }

    pub fn platform(&self) -> &P {
        self.gate.platform()
    }

    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SchedState<P::Context>) -> R) -> R {
        let _guard = self.gate.mask_scoped();
        f(&mut self.state.lock())
    }

    // ── Thread creation ─────────────────────────────────────────

    /// Start a thread running `entry(arg)` at `priority`.
    ///
    /// The new thread is ready when this returns but the caller keeps the
    /// CPU; call [`Scheduler::yield_to_higher_priority`] to let it run at
    /// once if it outranks the caller.
    pub fn create_thread<A: Send + 'static>(
        &'static self,
        name: &str,
        priority: Priority,
        entry: fn(A),
        arg: A,
    ) -> Result<ThreadId, ThreadError> {
        self.create(name, priority, Box::new(move || entry(arg)), Role::Collected)
    }

    /// [`Scheduler::create_thread`] for closures. Nobody waits for the
    /// thread, so its exit code is dropped when it is reclaimed.
    pub fn spawn<F>(&'static self, name: &str, priority: Priority, body: F) -> Result<ThreadId, ThreadError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.create(name, priority, Box::new(body), Role::Detached)
    }

    fn create(
        &'static self,
        name: &str,
        priority: Priority,
        body: ThreadBody,
        role: Role,
    ) -> Result<ThreadId, ThreadError> {
        check_priority(priority);

        let tid = self.with_state(|st| {
            let capacity = self.config.max_threads;
            if st.threads.len() >= capacity {
                return Err(ThreadError::Allocation(Exhausted::ThreadTable { capacity }));
            }

            let mut stack = KernelStack::new(self.config.stack_size)?;
            let context = P::Context::prepare(
                &mut stack,
                thread_main::<P>,
                self as *const Self as usize,
            );
            let tid = st.alloc_tid();
            let mut tcb = Tcb::new(tid, name, priority, context, Some(stack), Some(body));
            tcb.collect_exit = role == Role::Collected;
            st.threads.insert(tid, tcb);
            if role == Role::Idle {
                st.idle = Some(tid);
            }
            Ok(tid)
        })?;

        log::debug!("thread {} '{}' created at priority {}", tid, name, priority);
        if role != Role::Idle {
            self.unblock(tid);
        }
        Ok(tid)
    }

    // ── Blocking and switching ──────────────────────────────────

    /// Put the running thread to sleep until [`Scheduler::unblock`].
    ///
    /// Interrupts must be masked; callers normally go through a
    /// synchronization primitive instead.
    pub fn block(&self) {
        assert!(
            !self.gate.in_interrupt(),
            "thread blocked inside an interrupt handler"
        );
        assert_eq!(
            self.gate.level(),
            IntrLevel::Off,
            "block called with interrupts enabled"
        );
        {
            let mut st = self.state.lock();
            let cur = st.current;
            st.tcb_mut(cur).status = ThreadStatus::Blocked;
        }
        self.schedule();
    }

    /// Make a blocked thread ready. Never switches; safe in interrupt
    /// handlers.
    pub fn unblock(&self, tid: ThreadId) {
        self.with_state(|st| st.make_ready(tid));
    }

    /// Give up the CPU; the caller stays ready.
    pub fn yield_now(&self) {
        assert!(!self.gate.in_interrupt(), "yield inside an interrupt handler");
        let _guard = self.gate.mask_scoped();
        {
            let mut st = self.state.lock();
            let cur = st.current;
            let is_idle = st.idle == Some(cur);
            let tcb = st.tcb_mut(cur);
            tcb.status = ThreadStatus::Ready;
            if !is_idle {
                tcb.queue = QueueSlot::Ready;
                let priority = tcb.priority;
                st.ready.push(cur, priority);
            }
        }
        self.schedule();
    }

    /// Terminate the running thread. Its stack is freed by the next
    /// scheduling decision, once nothing runs on it any more.
    pub fn exit(&self) -> ! {
        assert!(!self.gate.in_interrupt(), "thread exit inside an interrupt handler");
        self.gate.mask();
        {
            let mut st = self.state.lock();
            let cur = st.current;
            let tcb = st.tcb_mut(cur);
            tcb.status = ThreadStatus::Dying;
            log::debug!("thread {} '{}' exiting ({})", cur, tcb.name, tcb.exit_status);
        }
        self.schedule();
        unreachable!("a dying thread was scheduled again");
    }

    /// Switch to the highest-priority ready thread, or idle.
    ///
    /// The caller has already moved the running thread out of `Running`.
    fn schedule(&self) {
        assert_eq!(
            self.gate.level(),
            IntrLevel::Off,
            "schedule with interrupts enabled"
        );

        let mut st = self.state.lock();
        let prev = st.current;
        assert_ne!(
            st.tcb(prev).status,
            ThreadStatus::Running,
            "schedule called by a running thread"
        );

        let dead = st.take_reclaimed();

        let next = match st.ready.pop() {
            Some(tid) => tid,
            None => st
                .idle
                .unwrap_or_else(|| panic!("no thread ready to run")),
        };

        let tcb = st.tcb_mut(next);
        if let Some(stack) = &tcb.stack {
            assert!(
                stack.is_intact(),
                "stack overflow in thread {} ({})",
                tcb.id,
                tcb.name
            );
        }
        tcb.status = ThreadStatus::Running;
        tcb.queue = QueueSlot::Unqueued;
        st.current = next;
        st.slice_ticks = 0;

        if prev == next {
            drop(st);
            drop(dead);
            return;
        }

        if st.tcb(prev).status == ThreadStatus::Dying && prev != st.initial {
            st.reclaim.push(prev);
        }

        let from: *mut P::Context = &mut *st.tcb_mut(prev).context;
        let to: *const P::Context = &*st.tcb(next).context;
        log::trace!("switch {} -> {}", prev, next);
        drop(st);
        drop(dead);

        // SAFETY: interrupts are masked and no lock is held. Both contexts
        // are boxed inside table entries that stay put until `prev` is
        // reclaimed, which happens only after this switch away from it.
        unsafe { P::Context::switch(from, to) };
    }

    /// Body of the idle thread. Runs only when nothing else is ready and
    /// never returns.
    fn idle_loop(&self) {
        loop {
            self.gate.mask();
            self.block();
            // Unmask and halt as one step, or a wakeup landing between the
            // two would be missed for a whole tick.
            self.gate.platform().wait_for_interrupt();
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn current(&self) -> ThreadId {
        self.with_state(|st| st.current)
    }

    pub fn current_name(&self) -> String {
        self.with_state(|st| st.tcb(st.current).name.clone())
    }

    /// Name of the running thread, or `None` while the scheduler state is
    /// locked. For panic reports, where waiting on the lock could hang.
    pub fn try_current_name(&self) -> Option<String> {
        let st = self.state.try_lock()?;
        st.threads.get(&st.current).map(|t| t.name.clone())
    }

    /// Effective priority of the running thread.
    pub fn priority(&self) -> Priority {
        self.with_state(|st| st.tcb(st.current).priority)
    }

    pub fn priority_of(&self, tid: ThreadId) -> Option<Priority> {
        self.with_state(|st| st.threads.get(&tid).map(|t| t.priority))
    }

    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.with_state(|st| st.threads.get(&tid).map(Tcb::info))
    }

    /// Ready threads in the order they will run.
    pub fn ready_threads(&self) -> Vec<ThreadId> {
        self.with_state(|st| st.ready.iter().map(|(tid, _)| tid).collect())
    }

    pub fn idle_thread(&self) -> Option<ThreadId> {
        self.with_state(|st| st.idle)
    }

    // ── Priorities ──────────────────────────────────────────────

    /// Set the running thread's base priority. Donations still apply; the
    /// thread yields if it no longer has the highest priority.
    pub fn set_priority(&self, priority: Priority) {
        check_priority(priority);
        self.with_state(|st| {
            let cur = st.current;
            st.tcb_mut(cur).base_priority = priority;
            st.refresh(cur);
        });
        self.yield_to_higher_priority();
    }

    /// Yield if a ready thread outranks the running one. In an interrupt
    /// handler the yield happens when the handler returns.
    pub fn yield_to_higher_priority(&self) {
        let outranked = self.with_state(|st| {
            let running = st.tcb(st.current).priority;
            st.ready.front_priority().is_some_and(|p| p > running)
        });
        if !outranked {
            return;
        }
        if self.gate.in_interrupt() {
            self.gate.yield_on_return();
        } else {
            self.yield_now();
        }
    }

    // ── Feedback-queue interface ────────────────────────────────
    //
    // Kept so callers compile against either policy. Only `nice` is stored.

    pub fn nice(&self) -> i32 {
        self.with_state(|st| st.tcb(st.current).nice)
    }

    pub fn set_nice(&self, nice: i32) {
        assert!(
            (NICE_MIN..=NICE_MAX).contains(&nice),
            "nice {nice} outside {NICE_MIN}..={NICE_MAX}"
        );
        self.with_state(|st| {
            let cur = st.current;
            st.tcb_mut(cur).nice = nice;
        });
    }

    /// System load average times 100. Always 0.
    pub fn load_avg(&self) -> i32 {
        0
    }

    /// Running thread's recent CPU use times 100. Always 0.
    pub fn recent_cpu(&self) -> i32 {
        0
    }

    // ── Exit status ─────────────────────────────────────────────

    pub fn set_exit_status(&self, code: i32) {
        self.with_state(|st| {
            let cur = st.current;
            st.tcb_mut(cur).exit_status = code;
        });
    }

    /// Exit code of a thread that has exited and been reclaimed. Each code
    /// can be taken once.
    pub fn take_exit_status(&self, tid: ThreadId) -> Option<i32> {
        self.with_state(|st| st.exit_codes.remove(&tid))
    }

    // ── Timer ───────────────────────────────────────────────────

    /// Timer interrupt body: count the tick, wake sleepers and enforce the
    /// time slice.
    pub fn timer_tick(&self) {
        let now = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;

        let preempt = self.with_state(|st| {
            let cur = st.current;
            if st.idle == Some(cur) {
                st.stats.idle_ticks += 1;
            } else {
                st.stats.kernel_ticks += 1;
            }

            let running = st.tcb(cur).priority;
            let mut woke_higher = false;
            let mut i = 0;
            while i < st.sleepers.len() {
                let tid = st.sleepers[i];
                if st.tcb(tid).wake_tick <= now {
                    st.sleepers.remove(i);
                    st.make_ready(tid);
                    woke_higher |= st.tcb(tid).priority > running;
                } else {
                    i += 1;
                }
            }

            st.slice_ticks += 1;
            woke_higher || st.slice_ticks >= self.config.time_slice
        });

        if preempt {
            self.gate.yield_on_return();
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks elapsed since `then`, a value earlier returned by `ticks`.
    pub fn elapsed(&self, then: u64) -> u64 {
        self.ticks().saturating_sub(then)
    }

    /// Block the running thread for about `ticks` timer ticks.
    pub fn sleep(&self, ticks: i64) {
        if ticks <= 0 {
            return;
        }
        let _guard = self.gate.mask_scoped();
        {
            let mut st = self.state.lock();
            let cur = st.current;
            st.tcb_mut(cur).wake_tick = self.ticks() + ticks as u64;
            st.sleepers.push(cur);
        }
        self.block();
    }

    /// Sleep for about `ms` milliseconds.
    pub fn msleep(&self, ms: i64) {
        self.real_time_sleep(ms, 1_000);
    }

    /// Sleep for about `us` microseconds.
    pub fn usleep(&self, us: i64) {
        self.real_time_sleep(us, 1_000_000);
    }

    /// Sleep for about `ns` nanoseconds.
    pub fn nsleep(&self, ns: i64) {
        self.real_time_sleep(ns, 1_000_000_000);
    }

    /// Wait `num / denom` seconds: whole ticks by blocking, anything
    /// shorter by spinning `loops_per_tick`-scaled loops.
    fn real_time_sleep(&self, num: i64, denom: i64) {
        assert_eq!(
            self.gate.level(),
            IntrLevel::On,
            "timed sleep with interrupts masked"
        );
        let freq = i64::from(self.config.timer_freq);
        let ticks = num.saturating_mul(freq) / denom;
        if ticks > 0 {
            self.sleep(ticks);
            return;
        }

        assert!(denom % 1000 == 0, "sub-tick sleep needs a denominator in thousands");
        let per_tick = self.loops_per_tick() as i64;
        // Scaled down by 1000 first so the product cannot overflow.
        let loops = per_tick.saturating_mul(num) / 1000 * freq / (denom / 1000);
        self.gate.platform().busy_wait(loops.max(0) as u64);
    }

    /// Find how many busy-wait loops fit in one timer tick.
    ///
    /// Starts from the largest power of two below one tick, then settles
    /// the next eight bits one at a time. Needs the timer running.
    pub fn calibrate(&self) -> u64 {
        assert_eq!(
            self.gate.level(),
            IntrLevel::On,
            "timer calibration with interrupts masked"
        );
        log::info!("Calibrating timer...");

        let mut loops: u64 = 1 << 10;
        while !self.too_many_loops(loops << 1) {
            loops <<= 1;
            assert!(loops < 1 << 62, "timer never ticks during calibration");
        }

        let high_bit = loops;
        let mut test_bit = high_bit >> 1;
        while test_bit != high_bit >> 10 {
            if !self.too_many_loops(loops | test_bit) {
                loops |= test_bit;
            }
            test_bit >>= 1;
        }

        self.loops_per_tick.store(loops, Ordering::Relaxed);
        log::info!("{} loops/s", loops * u64::from(self.config.timer_freq));
        loops
    }

    /// Value found by the last `calibrate`, or 0.
    pub fn loops_per_tick(&self) -> u64 {
        self.loops_per_tick.load(Ordering::Relaxed)
    }

    /// Whether `loops` iterations, started right after a tick, run into
    /// the next one.
    fn too_many_loops(&self, loops: u64) -> bool {
        let platform = self.gate.platform();
        let start = self.ticks();
        while self.ticks() == start {
            platform.busy_wait(1);
        }

        let start = self.ticks();
        platform.busy_wait(loops);
        start != self.ticks()
    }

    pub fn stats(&self) -> TickStats {
        self.with_state(|st| st.stats)
    }

    pub fn print_stats(&self) {
        let stats = self.stats();
        log::info!("Timer: {} ticks", self.ticks());
        log::info!(
            "Thread: {} idle ticks, {} kernel ticks",
            stats.idle_ticks,
            stats.kernel_ticks
        );
    }

    // ── Interrupt entry ─────────────────────────────────────────

    /// Common interrupt path: run the handler, acknowledge, then yield if
    /// the handler asked for it.
    pub fn handle_interrupt(&self, frame: &mut InterruptFrame) {
        self.gate.dispatch(frame);
        if self.gate.take_yield_on_return() {
            self.yield_now();
        }
    }

    // ── Wait lists (used by `sync`) ─────────────────────────────

    /// Queue the running thread on `waiters` behind every thread of the
    /// same or higher priority.
    pub(crate) fn enqueue_waiter(&self, waiters: &mut VecDeque<ThreadId>, list: WaitListId) {
        self.with_state(|st| {
            let cur = st.current;
            let priority = st.tcb(cur).priority;
            let at = waiters
                .iter()
                .position(|&t| st.priority_or_min(t) < priority)
                .unwrap_or(waiters.len());
            waiters.insert(at, cur);
            st.tcb_mut(cur).queue = QueueSlot::Waiting(list);
        });
    }

    /// Re-sort `waiters` by current effective priority and make the first
    /// one ready.
    pub(crate) fn wake_highest(&self, waiters: &mut VecDeque<ThreadId>) -> Option<ThreadId> {
        self.with_state(|st| {
            waiters
                .make_contiguous()
                .sort_by_key(|&t| Reverse(st.priority_or_min(t)));
            let next = waiters.pop_front()?;
            st.make_ready(next);
            Some(next)
        })
    }

    // ── Priority donation (used by `Lock`) ──────────────────────

    /// The running thread is about to block on `lock`: record that, and
    /// lend its priority down the chain of holders.
    pub(crate) fn donate(&self, lock: &Arc<LockCore>) {
        self.with_state(|st| {
            let donor = st.current;
            let priority = st.tcb(donor).priority;
            st.tcb_mut(donor).wait_on_lock = Some(Arc::downgrade(lock));

            let Some(holder) = lock.holder() else {
                return;
            };
            if let Some(tcb) = st.threads.get_mut(&holder) {
                if !tcb.donations.contains(&donor) {
                    tcb.donations.push(donor);
                }
            }

            // Each hop only raises a holder to `priority`, so the walk ends
            // even when the wait-for graph has a cycle.
            let mut next = Some(lock.clone());
            while let Some(lock) = next.take() {
                let Some(holder) = lock.holder() else {
                    break;
                };
                if holder == donor {
                    log::warn!("priority donation cycle through thread {}", donor);
                    break;
                }
                let Some(tcb) = st.threads.get(&holder) else {
                    break;
                };
                if tcb.priority >= priority {
                    break;
                }
                next = tcb.wait_on_lock.as_ref().and_then(Weak::upgrade);
                st.set_effective(holder, priority);
            }
        });
    }

    /// The running thread now holds `lock`; `waiters`, the threads queued
    /// on it, donate to the new holder.
    pub(crate) fn finish_acquire(&self, lock: &Arc<LockCore>, waiters: &VecDeque<ThreadId>) {
        self.with_state(|st| {
            let cur = st.current;
            st.tcb_mut(cur).wait_on_lock = None;
            lock.set_holder(Some(cur));
            if waiters.is_empty() {
                return;
            }

            let tcb = st.tcb_mut(cur);
            for &donor in waiters {
                if donor != cur && !tcb.donations.contains(&donor) {
                    tcb.donations.push(donor);
                }
            }
            st.refresh(cur);
        });
    }

    /// The running thread gives up `lock`: drop the donations that came
    /// through it and clear the holder.
    pub(crate) fn release_donations(&self, lock: &Arc<LockCore>) {
        self.with_state(|st| {
            let cur = st.current;
            let donors = core::mem::take(&mut st.tcb_mut(cur).donations);
            let kept: Vec<ThreadId> = donors
                .into_iter()
                .filter(|d| !st.threads.get(d).is_some_and(|t| waits_on(t, lock)))
                .collect();
            st.tcb_mut(cur).donations = kept;
            st.refresh(cur);
            lock.set_holder(None);
        });
    }
}

/// First code a new thread runs: enable interrupts, run the body, exit.
fn thread_main<P: Platform>(arg: usize) {
    // SAFETY: `create` passes the address of a `&'static Scheduler<P>`.
    let sched = unsafe { &*(arg as *const Scheduler<P>) };
    sched.gate.unmask();

    let body = sched.with_state(|st| {
        let cur = st.current;
        st.tcb_mut(cur).body.take()
    });
    if let Some(body) = body {
        body();
    }
    sched.exit();
}
