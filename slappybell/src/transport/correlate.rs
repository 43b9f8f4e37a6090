//! Matching inbound responses to outstanding requests.
//!
//! The device protocol carries no request identifiers, so the only available
//! strategy is order: the oldest outstanding request receives the next
//! response. [`Correlator`] keeps that strategy replaceable.

use std::collections::VecDeque;
use std::sync::mpsc::{SyncSender, TrySendError};

use log::debug;

use crate::error::{Error, Result};
use crate::protocol::Message;

/// Completion handle for a pending request.
pub type Completion = SyncSender<Result<Message>>;

/// Pairs responses with the requests waiting for them.
pub trait Correlator: Send {
    /// Register a request about to be sent. Returns its id.
    fn register(&mut self, completion: Completion) -> u64;

    /// Deliver a response. Returns it back when nothing claimed it.
    fn resolve(&mut self, response: Message) -> Option<Message>;

    /// Fail one request, e.g. when writing it failed.
    fn fail(&mut self, id: u64, error: Error);

    /// Forget a request that was never sent.
    fn cancel(&mut self, id: u64);

    /// Fail every outstanding request.
    fn fail_all(&mut self, reason: &str);

    /// Number of outstanding requests.
    fn len(&self) -> usize;

    /// Whether no request is outstanding.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct PendingRequest {
    id: u64,
    completion: Completion,
}

/// First-in, first-out correlation.
#[derive(Default)]
pub struct FifoCorrelator {
    queue: VecDeque<PendingRequest>,
    next_id: u64,
}

impl FifoCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Self {
        Self::default()
    }

    fn take(&mut self, id: u64) -> Option<PendingRequest> {
        let index = self
            .queue
            .iter()
            .position(|p| p.id == id)?;
        self.queue
            .remove(index)
    }
}

impl Correlator for FifoCorrelator {
    fn register(&mut self, completion: Completion) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.queue
            .push_back(PendingRequest { id, completion });
        id
    }

    fn resolve(&mut self, response: Message) -> Option<Message> {
        let Some(pending) = self
            .queue
            .pop_front()
        else {
            return Some(response);
        };

        // A disconnected receiver means the caller timed out and walked away.
        match pending
            .completion
            .try_send(Ok(response))
        {
            Ok(()) => {
                debug!("Response delivered to request #{}", pending.id);
                None
            },
            Err(TrySendError::Disconnected(Ok(response))) => Some(response),
            Err(_) => None,
        }
    }

    fn fail(&mut self, id: u64, error: Error) {
        if let Some(pending) = self.take(id) {
            let _ = pending
                .completion
                .try_send(Err(error));
        }
    }

    fn cancel(&mut self, id: u64) {
        self.take(id);
    }

    fn fail_all(&mut self, reason: &str) {
        for pending in self
            .queue
            .drain(..)
        {
            let _ = pending
                .completion
                .try_send(Err(Error::Disconnected(reason.to_string())));
        }
    }

    fn len(&self) -> usize {
        self.queue
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResultCode;
    use std::sync::mpsc;

    #[test]
    fn test_resolves_in_registration_order() {
        let mut fifo = FifoCorrelator::new();
        let (tx1, rx1) = mpsc::sync_channel(1);
        let (tx2, rx2) = mpsc::sync_channel(1);
        fifo.register(tx1);
        fifo.register(tx2);

        assert!(fifo.resolve(Message::response(ResultCode::Success, "first")).is_none());
        assert!(fifo.resolve(Message::response(ResultCode::Success, "second")).is_none());

        assert_eq!(rx1.recv().unwrap().unwrap().message(), "first");
        assert_eq!(rx2.recv().unwrap().unwrap().message(), "second");
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_response_without_request_is_orphan() {
        let mut fifo = FifoCorrelator::new();
        let orphan = fifo.resolve(Message::response(ResultCode::Success, "late"));
        assert_eq!(orphan.unwrap().message(), "late");
    }

    #[test]
    fn test_abandoned_request_yields_orphan() {
        let mut fifo = FifoCorrelator::new();
        let (tx, rx) = mpsc::sync_channel(1);
        fifo.register(tx);
        drop(rx);

        let orphan = fifo.resolve(Message::response(ResultCode::Success, "late"));
        assert!(orphan.is_some());
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_fail_and_cancel_target_one_request() {
        let mut fifo = FifoCorrelator::new();
        let (tx1, rx1) = mpsc::sync_channel(1);
        let (tx2, rx2) = mpsc::sync_channel(1);
        let (tx3, _rx3) = mpsc::sync_channel(1);
        let first = fifo.register(tx1);
        let second = fifo.register(tx2);
        let third = fifo.register(tx3);

        fifo.fail(second, Error::QueueClosed);
        fifo.cancel(third);
        assert_eq!(fifo.len(), 1);
        assert!(matches!(rx2.recv().unwrap(), Err(Error::QueueClosed)));

        fifo.cancel(first + 100);
        fifo.fail_all("port closed");
        assert!(matches!(rx1.recv().unwrap(), Err(Error::Disconnected(_))));
        assert!(fifo.is_empty());
    }
}
