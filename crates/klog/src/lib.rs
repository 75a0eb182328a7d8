//! Kernel logging subsystem.
//!
//! A [`log::Log`] backend writing colored `[LEVEL] target: message` lines to
//! COM1. Kernel crates log through the `log` facade; this crate only owns
//! the sink plus `print!`/`println!` for raw console output.
#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};

use log::{Level, Log, Metadata, Record};

pub use log::{debug, error, info, trace, warn, LevelFilter};

fn label(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => " INFO",
        Level::Warn => " WARN",
        Level::Error => "ERROR",
    }
}

fn color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m", // Gray
        Level::Debug => "\x1b[36m", // Cyan
        Level::Info => "\x1b[32m",  // Green
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Error => "\x1b[31m", // Red
    }
}

/// Render one log line, trailing newline included.
pub fn write_record<W: Write>(
    out: &mut W,
    level: Level,
    target: &str,
    args: &fmt::Arguments,
) -> fmt::Result {
    write!(out, "{}[{}]\x1b[0m ", color(level), label(level))?;
    if !target.is_empty() {
        write!(out, "{target}: ")?;
    }
    writeln!(out, "{args}")
}

struct SerialSink;

impl Write for SerialSink {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        khal::serial::write_str(s);
        Ok(())
    }
}

struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // One line at a time: an interrupt handler logging while we hold
        // the port lock would spin forever.
        khal::cpu::without_interrupts(|| {
            let _ = write_record(&mut SerialSink, record.level(), record.target(), record.args());
        });
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Bring up COM1 and install the serial logger at `level`.
///
/// Calling it twice leaves the first logger in place.
pub fn init(level: LevelFilter) {
    let loopback_ok = khal::serial::init();
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
    if !loopback_ok {
        log::warn!(target: "klog", "COM1 loopback test failed");
    }
}

/// Print to serial without formatting
pub fn print(args: fmt::Arguments) {
    khal::cpu::without_interrupts(|| {
        let _ = khal::serial::write_fmt(args);
    });
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {
        $crate::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(level: Level, target: &str, args: fmt::Arguments) -> String {
        let mut out = String::new();
        write_record(&mut out, level, target, &args).unwrap();
        out
    }

    #[test]
    fn record_has_colored_label_and_target() {
        let line = render(Level::Info, "kthread::sched", format_args!("started {}", 2));
        assert_eq!(line, "\x1b[32m[ INFO]\x1b[0m kthread::sched: started 2\n");
    }

    #[test]
    fn empty_target_is_omitted() {
        let line = render(Level::Error, "", format_args!("boom"));
        assert_eq!(line, "\x1b[31m[ERROR]\x1b[0m boom\n");
    }
}
