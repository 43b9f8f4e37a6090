//! Predicate-based waiters for raw inbound lines.

use std::sync::mpsc::SyncSender;

type LinePredicate = Box<dyn Fn(&str) -> bool + Send>;

struct LineWaiter {
    id: u64,
    predicate: LinePredicate,
    completion: SyncSender<String>,
}

/// Registered line waiters.
///
/// Every waiter whose predicate accepts a line is completed by it and
/// removed, so one line can satisfy several overlapping waiters.
#[derive(Default)]
pub struct LineWaiters {
    waiters: Vec<LineWaiter>,
    next_id: u64,
}

impl LineWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. Returns its id.
    pub fn add(&mut self, predicate: LinePredicate, completion: SyncSender<String>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.waiters
            .push(LineWaiter {
                id,
                predicate,
                completion,
            });
        id
    }

    /// Offer a line to every waiter. Returns how many were completed.
    pub fn offer(&mut self, line: &str) -> usize {
        let mut matched = 0;
        // Newest first; removal keeps lower indices valid.
        for index in (0..self.waiters.len()).rev() {
            if (self.waiters[index].predicate)(line) {
                let waiter = self
                    .waiters
                    .remove(index);
                let _ = waiter
                    .completion
                    .try_send(line.to_string());
                matched += 1;
            }
        }
        matched
    }

    pub fn remove(&mut self, id: u64) {
        self.waiters
            .retain(|w| w.id != id);
    }

    /// Drop every waiter. Their receivers observe a disconnect.
    pub fn clear(&mut self) {
        self.waiters
            .clear();
    }

    pub fn len(&self) -> usize {
        self.waiters
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters
            .is_empty()
    }
}
