//! Publish-request matching.
//!
//! A Publish request is a credit, not a query: it parks in a per-session
//! FIFO until some subscription owes a notification (or a keep-alive).
//! Subscriptions are scanned highest priority first, FIFO within equal
//! priority.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::types::StatusCode;

/// One parked Publish credit with everything needed to answer it later.
#[derive(Debug)]
pub struct ParkedPublish {
    /// Connection the response goes out on.
    pub connection_id: u64,
    /// Chunk-level request id for response framing.
    pub request_id: u32,
    /// Request handle echoed in the response header.
    pub request_handle: u32,
    /// Per-acknowledgement results computed on arrival.
    pub ack_results: Option<Vec<StatusCode>>,
    pub received_at: Instant,
}

/// Per-session FIFO of parked Publish requests.
#[derive(Debug, Default)]
pub struct PublishQueue {
    fifo: VecDeque<ParkedPublish>,
}

impl PublishQueue {
    /// Park a credit. When the queue is over `max_depth` the oldest credit
    /// is evicted and returned; the caller completes it with
    /// `Bad_TooManyPublishRequests`.
    pub fn park(&mut self, request: ParkedPublish, max_depth: usize) -> Option<ParkedPublish> {
        self.fifo.push_back(request);
        if self.fifo.len() > max_depth.max(1) {
            self.fifo.pop_front()
        } else {
            None
        }
    }

    /// Take the oldest credit.
    pub fn take(&mut self) -> Option<ParkedPublish> {
        self.fifo.pop_front()
    }

    pub fn len(&self) -> usize {
        self.fifo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fifo.is_empty()
    }

    /// Remove all credits, e.g. on session close. Returned in FIFO order
    /// for completion with `Bad_SessionClosed`.
    pub fn drain(&mut self) -> Vec<ParkedPublish> {
        self.fifo.drain(..).collect()
    }

    /// Drop credits that arrived on a now-dead connection; there is no
    /// transport left to answer them on.
    pub fn remove_by_connection(&mut self, connection_id: u64) -> usize {
        let before = self.fifo.len();
        self.fifo.retain(|parked| parked.connection_id != connection_id);
        before - self.fifo.len()
    }

    /// Remove credits carrying the given request handle (Cancel service).
    pub fn cancel_by_handle(&mut self, request_handle: u32) -> Vec<ParkedPublish> {
        let mut cancelled = Vec::new();
        self.fifo.retain_mut(|parked| {
            if parked.request_handle == request_handle {
                cancelled.push(ParkedPublish {
                    connection_id: parked.connection_id,
                    request_id: parked.request_id,
                    request_handle: parked.request_handle,
                    ack_results: parked.ack_results.take(),
                    received_at: parked.received_at,
                });
                false
            } else {
                true
            }
        });
        cancelled
    }
}

/// Order subscription ids for credit matching: higher priority first,
/// stable (creation) order within a priority class.
pub fn priority_order<I>(subscriptions: I) -> Vec<u32>
where
    I: IntoIterator<Item = (u32, u8)>,
{
    let mut entries: Vec<(u32, u8)> = subscriptions.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    entries.into_iter().map(|(id, _)| id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parked(handle: u32) -> ParkedPublish {
        ParkedPublish {
            connection_id: 1,
            request_id: handle,
            request_handle: handle,
            ack_results: None,
            received_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_order() {
        let mut queue = PublishQueue::default();
        queue.park(parked(1), 8);
        queue.park(parked(2), 8);
        assert_eq!(queue.take().unwrap().request_handle, 1);
        assert_eq!(queue.take().unwrap().request_handle, 2);
        assert!(queue.take().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overflow_evicts_oldest() {
        let mut queue = PublishQueue::default();
        assert!(queue.park(parked(1), 2).is_none());
        assert!(queue.park(parked(2), 2).is_none());
        let evicted = queue.park(parked(3), 2).unwrap();
        assert_eq!(evicted.request_handle, 1);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_by_handle_removes_matches() {
        let mut queue = PublishQueue::default();
        queue.park(parked(5), 8);
        queue.park(parked(6), 8);
        queue.park(parked(5), 8);
        let cancelled = queue.cancel_by_handle(5);
        assert_eq!(cancelled.len(), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn priority_order_highest_first_then_fifo() {
        let order = priority_order(vec![(10, 0), (11, 5), (12, 5), (13, 1)]);
        assert_eq!(order, vec![11, 12, 13, 10]);
    }
}
