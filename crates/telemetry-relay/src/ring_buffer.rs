// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO shared by the rover listener and the earth forwarder.
//!
//! The buffer never blocks a producer. When it is full the oldest pending
//! element is evicted to make room, which trades completeness for freshness.
//! Consumers suspend on an empty buffer until an element arrives or the
//! buffer is closed.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

/// What happened to an element handed to the buffer.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome<T> {
    /// Stored without displacing anything.
    Accepted,
    /// Stored, and the returned element was evicted to make room.
    Evicted(T),
    /// The buffer is closed; the element is handed back untouched.
    Closed(T),
}

/// Result of waiting on the buffer for a bounded amount of time.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeued<T> {
    Item(T),
    /// Nothing arrived before the wait elapsed.
    Idle,
    /// The buffer is closed and drained.
    Closed,
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

pub struct RingBuffer<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty buffer. A capacity of zero is bumped to one so the
    /// buffer can always hold the most recent element.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // A panic while holding the lock can't leave the deque half-updated,
        // so keep going with whatever is inside.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends at the tail, evicting the head if the buffer is full.
    pub fn enqueue(&self, item: T) -> EnqueueOutcome<T> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return EnqueueOutcome::Closed(item);
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_back(item);
            match evicted {
                Some(old) => EnqueueOutcome::Evicted(old),
                None => EnqueueOutcome::Accepted,
            }
        };
        self.available.notify_one();
        outcome
    }

    /// Puts an element back at the head so it is the next one dequeued.
    ///
    /// Used for elements that were taken out and could not be delivered. If
    /// the buffer filled up in the meantime, the oldest element still waiting
    /// behind it is evicted instead of the requeued one.
    pub fn requeue_front(&self, item: T) -> EnqueueOutcome<T> {
        let outcome = {
            let mut inner = self.lock();
            if inner.closed {
                return EnqueueOutcome::Closed(item);
            }
            let evicted = if inner.items.len() >= self.capacity {
                inner.items.pop_front()
            } else {
                None
            };
            inner.items.push_front(item);
            match evicted {
                Some(old) => EnqueueOutcome::Evicted(old),
                None => EnqueueOutcome::Accepted,
            }
        };
        self.available.notify_one();
        outcome
    }

    pub fn try_dequeue(&self) -> Option<T> {
        self.lock().items.pop_front()
    }

    /// Removes the head, suspending while the buffer is empty.
    ///
    /// Returns `None` once the buffer is closed and every remaining element
    /// has been taken.
    pub async fn dequeue(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before checking so a close() between the check and the
            // await still wakes us.
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Like [`RingBuffer::dequeue`] but gives up after `wait`.
    pub async fn dequeue_within(&self, wait: Duration) -> Dequeued<T> {
        match tokio::time::timeout(wait, self.dequeue()).await {
            Ok(Some(item)) => Dequeued::Item(item),
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::Idle,
        }
    }

    /// Rejects further enqueues and wakes every suspended consumer.
    pub fn close(&self) {
        self.lock().closed = true;
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the pending elements, head first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().items.iter().cloned().collect()
    }
}
