//! Recoverable scheduler errors.
//!
//! Broken invariants (double acquire, unblocking a running thread, ...) are
//! kernel bugs and panic. Running out of resources is the only failure a
//! caller is expected to handle.

use core::fmt;

/// The resource that ran out while creating a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exhausted {
    /// No memory for a kernel stack of this many bytes.
    Stack { size: usize },
    /// The thread table already holds `capacity` threads.
    ThreadTable { capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// Thread creation could not obtain its stack or a table slot.
    Allocation(Exhausted),
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::Allocation(Exhausted::Stack { size }) => {
                write!(f, "out of memory for a {size}-byte kernel stack")
            }
            ThreadError::Allocation(Exhausted::ThreadTable { capacity }) => {
                write!(f, "thread table full ({capacity} threads)")
            }
        }
    }
}

impl core::error::Error for ThreadError {}
