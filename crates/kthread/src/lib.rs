//! Kernel thread core: scheduler, interrupt gate and synchronization.
//!
//! The crate owns every piece of scheduling state of the kernel. Hardware is
//! reached only through two traits:
//!
//! - [`Platform`]: interrupt flag, halt, end-of-interrupt, IDT gate updates.
//! - [`ExecutionContext`]: the saved-register snapshot and the switch itself.
//!
//! The kernel binary implements both for x86_64. Unit tests use the
//! simulated platform in `testing`.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod context;
pub mod error;
pub mod interrupt;
pub mod ready;
pub mod sched;
pub mod sync;
pub mod thread;

#[cfg(test)]
mod testing;

pub use config::{SchedConfig, SchedPolicy};
pub use context::ExecutionContext;
pub use error::{Exhausted, ThreadError};
pub use interrupt::{InterruptFrame, InterruptGate, IntrGuard, IntrLevel, Platform, VectorInfo};
pub use sched::{Scheduler, TickStats};
pub use sync::{Condition, Lock, Semaphore};
pub use thread::{
    KernelStack, PRI_DEFAULT, PRI_MAX, PRI_MIN, Priority, ThreadId, ThreadInfo, ThreadStatus,
};
