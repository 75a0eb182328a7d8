//! Hardware Abstraction Layer.
//!
//! Legacy PC devices the scheduler core needs on x86_64: port I/O, the
//! 8259 interrupt controller pair, the 8254 interval timer, the COM1 UART
//! and interrupt descriptor table entries.
#![cfg_attr(not(test), no_std)]

pub mod cpu;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod port;
pub mod serial;

pub use serial::Serial;
