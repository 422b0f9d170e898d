// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Round-robin run queue for preemptively switched tasks.
//!
//! The queue only decides *who* runs next. Saving and installing register
//! state is done by the caller, normally a timer interrupt handler that
//! rewrites the live interrupt context with the values returned in a
//! [`Switch`].
//!
//! The queue is not internally synchronized. Callers touch it either before
//! interrupts are enabled or from the one interrupt handler that rotates it.

use core::cell::Cell;

use crate::collections::list::{List, ListNode};

/// The outcome of a rotation: the task that was running and the task that
/// runs next.
pub struct Switch<'a, T: ?Sized> {
    pub from: &'a T,
    pub to: &'a T,
}

/// Tasks waiting to run, in arrival order, plus the task currently running.
pub struct RunQueue<'a, T: 'a + ?Sized + ListNode<'a, T>> {
    waiting: List<'a, T>,
    current: Cell<Option<&'a T>>,
}

impl<'a, T: ?Sized + ListNode<'a, T>> RunQueue<'a, T> {
    pub const fn new() -> RunQueue<'a, T> {
        RunQueue {
            waiting: List::new(),
            current: Cell::new(None),
        }
    }

    /// Adds a task at the tail of the queue.
    pub fn append(&self, task: &'a T) {
        self.waiting.push_tail(task);
    }

    pub fn current(&self) -> Option<&'a T> {
        self.current.get()
    }

    /// Makes the task at the head of the queue current without rotating
    /// anything back in. Used once, for the first dispatch.
    pub fn start(&self) -> Option<&'a T> {
        let first = self.waiting.pop_head();
        self.current.set(first);
        first
    }

    /// Moves the running task to the tail and makes the head current.
    ///
    /// Returns `None` when there is nothing to switch to, in which case the
    /// running task keeps the processor.
    pub fn rotate(&self) -> Option<Switch<'a, T>> {
        let from = self.current.get()?;
        let to = self.waiting.pop_head()?;
        self.waiting.push_tail(from);
        self.current.set(Some(to));
        Some(Switch { from, to })
    }

    /// Number of tasks waiting behind the current one.
    pub fn waiting(&self) -> usize {
        self.waiting.iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::list::ListLink;

    struct Task<'a> {
        id: u8,
        next: ListLink<'a, Task<'a>>,
    }

    impl<'a> Task<'a> {
        fn new(id: u8) -> Task<'a> {
            Task {
                id,
                next: ListLink::empty(),
            }
        }
    }

    impl<'a> ListNode<'a, Task<'a>> for Task<'a> {
        fn next(&'a self) -> &'a ListLink<'a, Task<'a>> {
            &self.next
        }
    }

    #[test]
    fn single_task_never_switches() {
        let a = Task::new(0);
        let queue = RunQueue::new();
        queue.append(&a);
        assert_eq!(queue.start().map(|t| t.id), Some(0));
        assert!(queue.rotate().is_none());
        assert_eq!(queue.current().map(|t| t.id), Some(0));
    }

    #[test]
    fn rotation_visits_tasks_in_arrival_order() {
        let a = Task::new(0);
        let b = Task::new(1);
        let c = Task::new(2);
        let queue = RunQueue::new();
        queue.append(&a);
        queue.append(&b);
        queue.append(&c);
        queue.start();
        assert_eq!(queue.waiting(), 2);

        let mut order = [0u8; 6];
        for slot in order.iter_mut() {
            let switch = queue.rotate().unwrap();
            assert_ne!(switch.from.id, switch.to.id);
            *slot = switch.to.id;
        }
        assert_eq!(order, [1, 2, 0, 1, 2, 0]);
        assert_eq!(queue.waiting(), 2);
    }

    #[test]
    fn two_tasks_share_ticks_evenly() {
        let a = Task::new(0);
        let b = Task::new(1);
        let queue = RunQueue::new();
        queue.append(&a);
        queue.append(&b);
        queue.start();

        for ticks in 0..64usize {
            // Replay `ticks` timer periods from a fresh start with A first.
            while queue.current().map(|t| t.id) != Some(0) {
                queue.rotate();
            }
            let mut counter = 0;
            for _ in 0..ticks {
                if queue.current().map(|t| t.id) == Some(1) {
                    counter += 1;
                }
                queue.rotate();
            }
            assert_eq!(counter, ticks / 2);
        }
    }
}
