//! Blocking synchronization primitives.
//!
//! All three take the scheduler explicitly: a thread that cannot proceed is
//! blocked through it and woken by whoever releases the resource. Waiters
//! are always woken highest effective priority first.
//!
//! Only [`Semaphore::try_down`] and [`Semaphore::up`] may be called from an
//! interrupt handler.

pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::Condition;
pub use lock::Lock;
pub use semaphore::Semaphore;
