//! 8254 Programmable Interval Timer, channel 0.
//!
//! Channel 0 drives IRQ 0. In rate-generator mode it counts down from a
//! 16-bit reload value at [`PIT_HZ`] and raises the IRQ every time it
//! wraps, so the interrupt rate is `PIT_HZ / reload`.

use crate::port::outb;

/// Input clock of the 8254.
pub const PIT_HZ: u32 = 1_193_180;

/// Timer interrupts per second.
pub const TIMER_FREQ: u32 = 100;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;

/// Channel 0, low byte then high byte, mode 2 (rate generator), binary.
const CMD_CH0_RATE: u8 = 0x34;

/// Reload value for `freq` interrupts per second, rounded to nearest.
///
/// The 16-bit counter limits `freq` to 19..=1000 on this input clock.
pub const fn reload_count(freq: u32) -> u16 {
    assert!(freq >= 19 && freq <= 1000, "timer frequency out of range");
    ((PIT_HZ + freq / 2) / freq) as u16
}

/// Program channel 0 to interrupt `freq` times per second.
pub fn init(freq: u32) {
    let [low, high] = reload_count(freq).to_le_bytes();
    unsafe {
        outb(PIT_COMMAND, CMD_CH0_RATE);
        outb(PIT_CHANNEL0, low);
        outb(PIT_CHANNEL0, high);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_rounds_to_nearest() {
        assert_eq!(reload_count(100), 11932);
        assert_eq!(reload_count(1000), 1193);
        assert_eq!(reload_count(19), 62799);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn too_slow_for_sixteen_bits() {
        reload_count(18);
    }
}
