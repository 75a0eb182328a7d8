//! Boot-time scheduler configuration.

/// Timer ticks a thread may run before it is preempted.
pub const TIME_SLICE: u32 = 4;

/// Timer interrupts per second.
pub const TIMER_FREQ: u32 = 100;

/// Size of each thread's kernel stack (32 KiB).
pub const DEFAULT_STACK_SIZE: usize = 4096 * 8;

/// Upper bound on live thread control blocks, including `main` and `idle`.
pub const DEFAULT_MAX_THREADS: usize = 64;

/// Which scheduling policy the kernel was booted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedPolicy {
    /// Strict priority with round robin among equal priorities.
    #[default]
    PriorityRoundRobin,
    /// Multilevel feedback queue. Only its interface exists; the scheduler
    /// falls back to priority round robin.
    Mlfqs,
}

impl SchedPolicy {
    /// Pick the policy from a kernel command line.
    ///
    /// Accepts `-o mlfqs` and `-o=mlfqs`; anything else keeps the default.
    pub fn from_cmdline(cmdline: &str) -> Self {
        let mut words = cmdline.split_whitespace();
        while let Some(word) = words.next() {
            let value = match word.strip_prefix("-o") {
                Some("") => words.next(),
                Some(rest) => rest.strip_prefix('='),
                None => None,
            };
            if value == Some("mlfqs") {
                return SchedPolicy::Mlfqs;
            }
        }
        SchedPolicy::PriorityRoundRobin
    }
}

/// Tunables handed to [`crate::Scheduler::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    pub time_slice: u32,
    /// Rate the platform timer was programmed at, in Hz.
    pub timer_freq: u32,
    pub stack_size: usize,
    pub max_threads: usize,
    pub policy: SchedPolicy,
}

impl SchedConfig {
    pub const fn new() -> Self {
        Self {
            time_slice: TIME_SLICE,
            timer_freq: TIMER_FREQ,
            stack_size: DEFAULT_STACK_SIZE,
            max_threads: DEFAULT_MAX_THREADS,
            policy: SchedPolicy::PriorityRoundRobin,
        }
    }

    pub const fn with_time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = ticks;
        self
    }

    pub const fn with_timer_freq(mut self, hz: u32) -> Self {
        self.timer_freq = hz;
        self
    }

    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub const fn with_max_threads(mut self, count: usize) -> Self {
        self.max_threads = count;
        self
    }

    pub const fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmdline_selects_mlfqs() {
        assert_eq!(SchedPolicy::from_cmdline("-q -o mlfqs run alarm"), SchedPolicy::Mlfqs);
        assert_eq!(SchedPolicy::from_cmdline("-o=mlfqs"), SchedPolicy::Mlfqs);
    }

    #[test]
    fn cmdline_defaults_to_round_robin() {
        assert_eq!(SchedPolicy::from_cmdline(""), SchedPolicy::PriorityRoundRobin);
        assert_eq!(SchedPolicy::from_cmdline("-o"), SchedPolicy::PriorityRoundRobin);
        assert_eq!(SchedPolicy::from_cmdline("-o fifo mlfqs"), SchedPolicy::PriorityRoundRobin);
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = SchedConfig::default().with_time_slice(2).with_max_threads(3);
        assert_eq!(config.time_slice, 2);
        assert_eq!(config.max_threads, 3);
        assert_eq!(config.stack_size, DEFAULT_STACK_SIZE);
        assert_eq!(config.timer_freq, TIMER_FREQ);
        assert_eq!(config.with_timer_freq(1000).timer_freq, 1000);
    }
}
