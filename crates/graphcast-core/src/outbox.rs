//! Bounded per-member outbound queue.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::Notify;

/// What to do when a member's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Discard the oldest queued payload to make room for the new one.
    #[default]
    DropOldest,
    /// Treat overflow as fatal for the member and disconnect it.
    Disconnect,
}

/// Successful enqueue outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueued {
    Queued,
    /// Queued after discarding the oldest pending payload.
    DisplacedOldest,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    #[error("Outbound queue full")]
    Overflow,

    #[error("Outbound queue closed")]
    Closed,
}

struct Inner {
    queue: VecDeque<Bytes>,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO with a fixed capacity.
///
/// Producers never wait: a push either lands, displaces the oldest entry, or
/// fails, depending on the policy.
pub(crate) struct Outbox {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
    policy: OverflowPolicy,
}

impl Outbox {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn push(&self, payload: Bytes) -> Result<Enqueued, EnqueueError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }

        let outcome = if inner.queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    inner.queue.pop_front();
                    Enqueued::DisplacedOldest
                }
                OverflowPolicy::Disconnect => return Err(EnqueueError::Overflow),
            }
        } else {
            Enqueued::Queued
        };

        inner.queue.push_back(payload);
        drop(inner);

        self.notify.notify_one();
        Ok(outcome)
    }

    /// Wait for the next payload. Returns `None` once the outbox is closed.
    ///
    /// Only one task may call this at a time.
    pub(crate) async fn pop(&self) -> Option<Bytes> {
        loop {
            {
                let mut inner = self.lock();
                if inner.closed {
                    return None;
                }
                if let Some(payload) = inner.queue.pop_front() {
                    return Some(payload);
                }
            }
            // A push between the check above and this await leaves a permit.
            self.notify.notified().await;
        }
    }

    /// Close the outbox, discarding whatever is still queued.
    ///
    /// Returns the number of discarded payloads.
    pub(crate) fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let discarded = inner.queue.len();
        inner.queue.clear();
        drop(inner);

        self.notify.notify_one();
        discarded
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_push_pop_fifo() {
        let outbox = Outbox::new(4, OverflowPolicy::DropOldest);
        outbox.push(Bytes::from_static(b"a")).unwrap();
        outbox.push(Bytes::from_static(b"b")).unwrap();
        assert_eq!(outbox.len(), 2);

        assert_eq!(outbox.pop().await.unwrap(), Bytes::from_static(b"a"));
        assert_eq!(outbox.pop().await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(outbox.len(), 0);
    }

    #[tokio::test]
    async fn test_drop_oldest_keeps_newest() {
        let outbox = Outbox::new(2, OverflowPolicy::DropOldest);
        assert_eq!(outbox.push(Bytes::from_static(b"1")), Ok(Enqueued::Queued));
        assert_eq!(outbox.push(Bytes::from_static(b"2")), Ok(Enqueued::Queued));
        assert_eq!(
            outbox.push(Bytes::from_static(b"3")),
            Ok(Enqueued::DisplacedOldest)
        );

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox.pop().await.unwrap(), Bytes::from_static(b"2"));
        assert_eq!(outbox.pop().await.unwrap(), Bytes::from_static(b"3"));
    }

    #[test]
    fn test_disconnect_policy_rejects_overflow() {
        let outbox = Outbox::new(1, OverflowPolicy::Disconnect);
        outbox.push(Bytes::from_static(b"1")).unwrap();
        assert_eq!(
            outbox.push(Bytes::from_static(b"2")),
            Err(EnqueueError::Overflow)
        );
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let outbox = Outbox::new(0, OverflowPolicy::Disconnect);
        assert!(outbox.push(Bytes::from_static(b"1")).is_ok());
    }

    #[tokio::test]
    async fn test_close_discards_and_rejects() {
        let outbox = Outbox::new(4, OverflowPolicy::DropOldest);
        outbox.push(Bytes::from_static(b"a")).unwrap();
        outbox.push(Bytes::from_static(b"b")).unwrap();

        assert_eq!(outbox.close(), 2);
        assert!(outbox.pop().await.is_none());
        assert_eq!(
            outbox.push(Bytes::from_static(b"c")),
            Err(EnqueueError::Closed)
        );
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let outbox = Arc::new(Outbox::new(4, OverflowPolicy::DropOldest));

        let consumer = {
            let outbox = Arc::clone(&outbox);
            tokio::spawn(async move { outbox.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        outbox.push(Bytes::from_static(b"late")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Some(Bytes::from_static(b"late")));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let outbox = Arc::new(Outbox::new(4, OverflowPolicy::DropOldest));

        let consumer = {
            let outbox = Arc::clone(&outbox);
            tokio::spawn(async move { outbox.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        outbox.close();

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(got.is_none());
    }
}
