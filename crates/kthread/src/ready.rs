//! The ready queue.

use alloc::collections::VecDeque;

use crate::thread::{Priority, ThreadId};

/// Runnable threads, highest effective priority first and FIFO among equal
/// priorities.
///
/// Each entry carries the priority it was queued under. Whenever a queued
/// thread's effective priority changes the scheduler calls
/// [`ReadyQueue::reprioritize`], so the order holds in every state.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    entries: VecDeque<(ThreadId, Priority)>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Insert behind every thread of the same or higher priority.
    pub fn push(&mut self, thread: ThreadId, priority: Priority) {
        let at = self
            .entries
            .iter()
            .position(|&(_, p)| p < priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, (thread, priority));
    }

    pub fn pop(&mut self) -> Option<ThreadId> {
        self.entries.pop_front().map(|(thread, _)| thread)
    }

    /// Priority of the thread that would run next.
    pub fn front_priority(&self) -> Option<Priority> {
        self.entries.front().map(|&(_, p)| p)
    }

    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|&(t, _)| t == thread) {
            Some(at) => {
                self.entries.remove(at);
                true
            }
            None => false,
        }
    }

    /// Move a queued thread to the place its new priority puts it.
    pub fn reprioritize(&mut self, thread: ThreadId, priority: Priority) {
        if self.remove(thread) {
            self.push(thread, priority);
        }
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.entries.iter().any(|&(t, _)| t == thread)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, Priority)> + '_ {
        self.entries.iter().copied()
    }

    /// `true` when priorities never increase from front to back.
    pub fn is_sorted(&self) -> bool {
        self.entries
            .iter()
            .zip(self.entries.iter().skip(1))
            .all(|(a, b)| a.1 >= b.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tid(n: u64) -> ThreadId {
        ThreadId::new(n).unwrap()
    }

    #[test]
    fn equal_priorities_keep_arrival_order() {
        let mut queue = ReadyQueue::new();
        queue.push(tid(1), 31);
        queue.push(tid(2), 40);
        queue.push(tid(3), 31);
        queue.push(tid(4), 40);

        let order: Vec<_> = core::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![tid(2), tid(4), tid(1), tid(3)]);
    }

    #[test]
    fn reprioritize_moves_behind_new_peers() {
        let mut queue = ReadyQueue::new();
        queue.push(tid(1), 10);
        queue.push(tid(2), 20);
        queue.push(tid(3), 20);

        queue.reprioritize(tid(1), 20);
        assert_eq!(queue.iter().map(|(t, _)| t).collect::<Vec<_>>(), vec![tid(2), tid(3), tid(1)]);
        assert_eq!(queue.front_priority(), Some(20));

        // Not queued: nothing happens.
        queue.reprioritize(tid(9), 63);
        assert_eq!(queue.len(), 3);
        assert!(!queue.contains(tid(9)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(u8),
        Pop,
        Remove(usize),
        Reprioritize(usize, u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..=63).prop_map(Op::Push),
            Just(Op::Pop),
            any::<usize>().prop_map(Op::Remove),
            (any::<usize>(), 0u8..=63).prop_map(|(i, p)| Op::Reprioritize(i, p)),
        ]
    }

    proptest! {
        #[test]
        fn stays_sorted_under_any_operations(ops in prop::collection::vec(op(), 0..200)) {
            let mut queue = ReadyQueue::new();
            let mut next = 1;
            for op in ops {
                match op {
                    Op::Push(p) => {
                        queue.push(tid(next), p);
                        next += 1;
                    }
                    Op::Pop => {
                        queue.pop();
                    }
                    Op::Remove(i) if !queue.is_empty() => {
                        let (t, _) = queue.iter().nth(i % queue.len()).unwrap();
                        prop_assert!(queue.remove(t));
                    }
                    Op::Reprioritize(i, p) if !queue.is_empty() => {
                        let (t, _) = queue.iter().nth(i % queue.len()).unwrap();
                        queue.reprioritize(t, p);
                    }
                    _ => {}
                }
                prop_assert!(queue.is_sorted());
            }
        }

        #[test]
        fn pops_in_stable_priority_order(priorities in prop::collection::vec(0u8..=63, 0..64)) {
            let mut queue = ReadyQueue::new();
            for (i, &p) in priorities.iter().enumerate() {
                queue.push(tid(i as u64 + 1), p);
            }

            let mut expected: Vec<_> = priorities
                .iter()
                .enumerate()
                .map(|(i, &p)| (tid(i as u64 + 1), p))
                .collect();
            expected.sort_by(|a, b| b.1.cmp(&a.1));

            let popped: Vec<_> = core::iter::from_fn(|| queue.pop()).collect();
            prop_assert_eq!(popped, expected.into_iter().map(|(t, _)| t).collect::<Vec<_>>());
        }
    }
}
