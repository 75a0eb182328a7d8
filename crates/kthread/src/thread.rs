//! Thread control blocks and kernel stacks.

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt;
use core::num::NonZeroU64;
use core::ptr::NonNull;

use crate::error::{Exhausted, ThreadError};
use crate::sync::lock::LockCore;

// ── Priorities ──────────────────────────────────────────────────

pub type Priority = u8;

/// Lowest priority; the idle thread runs here.
pub const PRI_MIN: Priority = 0;
/// Priority of `main` and the usual choice for new threads.
pub const PRI_DEFAULT: Priority = 31;
/// Highest priority.
pub const PRI_MAX: Priority = 63;

/// Longest thread name kept, in bytes.
pub const NAME_MAX: usize = 15;

pub(crate) fn check_priority(priority: Priority) {
    assert!(
        priority <= PRI_MAX,
        "priority {} outside {}..={}",
        priority,
        PRI_MIN,
        PRI_MAX
    );
}

// ── Identifiers ─────────────────────────────────────────────────

/// Unique, never reused thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    pub(crate) const fn new(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a semaphore's waiter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitListId(pub(crate) u64);

// ── States ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Owns the CPU. Exactly one thread is running at any time.
    Running,
    /// Runnable, waiting in the ready queue.
    Ready,
    /// Waiting for an event (semaphore, sleep, explicit unblock).
    Blocked,
    /// Finished; its stack is freed at the next scheduling decision.
    Dying,
}

/// Which ordered collection, if any, currently holds the thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueSlot {
    Unqueued,
    Ready,
    Waiting(WaitListId),
}

// ── Kernel stack ────────────────────────────────────────────────

/// Written at the lowest word of every kernel stack. A different value
/// means the stack ran into it.
pub const STACK_CANARY: u64 = 0xcd6a_bf4b;

const STACK_ALIGN: usize = 16;

/// A heap-allocated kernel stack with an overflow canary at its base.
pub struct KernelStack {
    base: NonNull<u8>,
    layout: Layout,
}

// The stack is plain memory owned by exactly one thread control block.
unsafe impl Send for KernelStack {}

impl KernelStack {
    /// Allocate a zeroed stack of `size` bytes.
    ///
    /// The memory is allocated directly on the heap instead of through a
    /// `Box<[u8; N]>` so the array never passes through the caller's stack.
    pub fn new(size: usize) -> Result<Self, ThreadError> {
        let exhausted = ThreadError::Allocation(Exhausted::Stack { size });
        if size < 2 * STACK_ALIGN {
            return Err(exhausted);
        }
        let layout = Layout::from_size_align(size, STACK_ALIGN).map_err(|_| exhausted)?;

        // SAFETY: `layout` has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).ok_or(exhausted)?;

        // SAFETY: the allocation is at least 16-byte aligned and large
        // enough for one u64.
        unsafe { base.as_ptr().cast::<u64>().write(STACK_CANARY) };

        Ok(Self { base, layout })
    }

    /// Lowest address of the stack (where the canary lives).
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// One past the highest address; stacks grow downward from here.
    pub fn top(&self) -> u64 {
        self.base.as_ptr() as u64 + self.layout.size() as u64
    }

    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// `false` once something has overwritten the canary.
    pub fn is_intact(&self) -> bool {
        // SAFETY: the canary word is inside our allocation.
        unsafe { self.base.as_ptr().cast::<u64>().read_volatile() == STACK_CANARY }
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this exact layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) };
    }
}

// ── Thread control block ────────────────────────────────────────

pub(crate) type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Everything the scheduler tracks about one kernel thread.
pub(crate) struct Tcb<C> {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    /// Priority the thread asked for.
    pub base_priority: Priority,
    /// `base_priority` raised by donations; what the scheduler orders by.
    pub priority: Priority,
    /// Lock this thread is blocked acquiring, if any.
    pub wait_on_lock: Option<Weak<LockCore>>,
    /// Threads currently donating their priority to this one.
    pub donations: Vec<ThreadId>,
    pub queue: QueueSlot,
    /// Boxed so its address survives moves of the thread table.
    pub context: Box<C>,
    /// `None` for the initial thread, which runs on the boot stack.
    pub stack: Option<KernelStack>,
    pub body: Option<ThreadBody>,
    /// Tick at which a sleeping thread becomes ready again.
    pub wake_tick: u64,
    pub nice: i32,
    pub exit_status: i32,
    /// Keep `exit_status` after reclaim until someone takes it.
    pub collect_exit: bool,
}

impl<C> Tcb<C> {
    pub fn new(
        id: ThreadId,
        name: &str,
        priority: Priority,
        context: C,
        stack: Option<KernelStack>,
        body: Option<ThreadBody>,
    ) -> Self {
        Self {
            id,
            name: truncate_name(name),
            status: ThreadStatus::Blocked,
            base_priority: priority,
            priority,
            wait_on_lock: None,
            donations: Vec::new(),
            queue: QueueSlot::Unqueued,
            context: Box::new(context),
            stack,
            body,
            wake_tick: 0,
            nice: 0,
            exit_status: 0,
            collect_exit: false,
        }
    }

    pub fn info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            base_priority: self.base_priority,
            priority: self.priority,
            donors: self.donations.len(),
            nice: self.nice,
        }
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(NAME_MAX);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Point-in-time copy of a thread's scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub status: ThreadStatus,
    pub base_priority: Priority,
    pub priority: Priority,
    pub donors: usize,
    pub nice: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_cut_at_fifteen_bytes() {
        assert_eq!(truncate_name("a-rather-long-thread-name"), "a-rather-long-t");
        assert_eq!(truncate_name("main"), "main");
        // Never split a multi-byte character.
        assert_eq!(truncate_name("ééééééééé").len(), 14);
    }

    #[test]
    fn stack_canary_detects_overwrite() {
        let stack = KernelStack::new(4096).unwrap();
        assert!(stack.is_intact());
        assert_eq!(stack.top() - stack.base() as u64, 4096);
        assert_eq!(stack.top() % 16, 0);

        unsafe { stack.base().write(0xff) };
        assert!(!stack.is_intact());
    }

    #[test]
    fn tiny_stack_is_an_allocation_error() {
        assert_eq!(
            KernelStack::new(8).err(),
            Some(ThreadError::Allocation(Exhausted::Stack { size: 8 }))
        );
    }
}
