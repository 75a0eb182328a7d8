//! The context-switch boundary.

use crate::thread::KernelStack;

/// Saved CPU state of a thread that is not running, plus the operation that
/// swaps it with the running one.
///
/// This is the only place where raw register and stack-pointer state is
/// touched. The scheduler never inspects the context; it only hands stable
/// pointers to [`ExecutionContext::switch`].
///
/// # Safety
///
/// Implementors must guarantee that after `switch(from, to)` the thread
/// described by `to` continues exactly where it last switched away (or at
/// its prepared entry point), and that a later `switch(_, from)` resumes the
/// caller by returning from this call.
pub unsafe trait ExecutionContext: Send + Sized + 'static {
    /// The context of the code already running when the scheduler boots.
    /// Its registers are filled in by the first switch away from it.
    fn boot() -> Self;

    /// A context that, when first switched to, calls `entry(arg)` on
    /// `stack`. `entry` never returns.
    fn prepare(stack: &mut KernelStack, entry: fn(usize), arg: usize) -> Self;

    /// Save the running state into `from` and resume `to`.
    ///
    /// # Safety
    ///
    /// Interrupts must be masked, `from` must describe the running thread and
    /// `to` a suspended one. Both pointers must stay valid until `from` is
    /// resumed; no spin lock may be held across the call.
    unsafe fn switch(from: *mut Self, to: *const Self);
}
