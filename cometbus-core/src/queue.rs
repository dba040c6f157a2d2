// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Queue
//!
//! Per-session outbound queue. Routing code offers messages into it;
//! transports drain it with a blocking poll or a non-blocking flush.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::message::Message;
use crate::session::QueueSession;

/// Errors from queue operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is at capacity; the message was not enqueued.
    #[error("queue is full ({capacity} messages pending)")]
    Full { capacity: usize },

    /// Queue has been closed.
    #[error("queue is unavailable")]
    Unavailable,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum messages pending before `offer` fails.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig { capacity: 1000 }
    }
}

#[derive(Debug)]
struct QueueState {
    pending: VecDeque<Message>,
    last_activity: Instant,
    /// Pollers currently parked on this queue.
    waiting: usize,
    closed: bool,
}

/// Outbound message queue for one session.
#[derive(Debug)]
pub struct MessageQueue {
    session: QueueSession,
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

/// Decrements the parked-poller count however the poll future ends.
struct WaitGuard<'a>(&'a MessageQueue);

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state();
        state.waiting = state.waiting.saturating_sub(1);
        state.last_activity = Instant::now();
    }
}

impl MessageQueue {
    /// Creates an empty, open queue.
    pub fn new(session: QueueSession, config: &QueueConfig) -> Self {
        MessageQueue {
            session,
            capacity: config.capacity,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                last_activity: Instant::now(),
                waiting: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> &QueueSession {
        &self.session
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues a message and wakes any parked pollers.
    pub fn offer(&self, message: Message) -> Result<(), QueueError> {
        {
            let mut state = self.state();
            if state.closed {
                return Err(QueueError::Unavailable);
            }
            if state.pending.len() >= self.capacity {
                return Err(QueueError::Full {
                    capacity: self.capacity,
                });
            }
            state.pending.push_back(message);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Drains all pending messages without waiting.
    pub fn flush(&self) -> Result<Vec<Message>, QueueError> {
        let mut state = self.state();
        if state.closed {
            return Err(QueueError::Unavailable);
        }
        state.last_activity = Instant::now();
        Ok(state.pending.drain(..).collect())
    }

    /// Waits until at least one message is pending or `timeout` elapses, then
    /// drains everything pending. Returns an empty batch on timeout.
    ///
    /// Cancel-safe: messages are only removed after the wait completes.
    pub async fn poll(&self, timeout: Duration) -> Result<Vec<Message>, QueueError> {
        let deadline = Instant::now() + timeout;

        self.state().waiting += 1;
        let _guard = WaitGuard(self);

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an offer between the check and the
            // await is not lost.
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.closed {
                    return Err(QueueError::Unavailable);
                }
                if !state.pending.is_empty() {
                    state.last_activity = Instant::now();
                    return Ok(state.pending.drain(..).collect());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    /// Marks the session as alive.
    pub fn heartbeat(&self) {
        self.state().last_activity = Instant::now();
    }

    /// Returns true if the session has been idle for at least `expiry`.
    ///
    /// A queue with a parked poller is never stale.
    pub fn is_stale(&self, expiry: Duration) -> bool {
        let state = self.state();
        state.waiting == 0 && state.last_activity.elapsed() >= expiry
    }

    /// Closes the queue, drops pending messages and wakes parked pollers.
    pub fn close(&self) {
        {
            let mut state = self.state();
            state.closed = true;
            state.pending.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }
}

// INLINE_TEST_REQUIRED: Tests parked-poller accounting that is not observable through the public API
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_queue(capacity: usize) -> MessageQueue {
        MessageQueue::new(
            QueueSession::new("http-1", "client-1"),
            &QueueConfig { capacity },
        )
    }

    fn msg(text: &str) -> Message {
        Message::to("chat").with("text", text)
    }

    #[test]
    fn test_offer_and_flush_preserve_order() {
        let queue = test_queue(10);
        queue.offer(msg("a")).unwrap();
        queue.offer(msg("b")).unwrap();
        assert_eq!(queue.len(), 2);

        let drained = queue.flush().unwrap();
        assert_eq!(drained, vec![msg("a"), msg("b")]);
        assert!(queue.is_empty());

        // Flushing an empty queue is fine
        assert!(queue.flush().unwrap().is_empty());
    }

    #[test]
    fn test_offer_rejects_when_full() {
        let queue = test_queue(2);
        queue.offer(msg("a")).unwrap();
        queue.offer(msg("b")).unwrap();

        assert_eq!(
            queue.offer(msg("c")),
            Err(QueueError::Full { capacity: 2 })
        );
        assert_eq!(queue.len(), 2);

        // Draining frees capacity again
        queue.flush().unwrap();
        assert!(queue.offer(msg("c")).is_ok());
    }

    #[test]
    fn test_closed_queue_is_unavailable() {
        let queue = test_queue(10);
        queue.offer(msg("a")).unwrap();
        queue.close();

        assert!(queue.is_closed());
        assert!(queue.is_empty());
        assert_eq!(queue.offer(msg("b")), Err(QueueError::Unavailable));
        assert_eq!(queue.flush(), Err(QueueError::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_pending_immediately() {
        let queue = test_queue(10);
        queue.offer(msg("a")).unwrap();

        let start = Instant::now();
        let drained = queue.poll(Duration::from_secs(30)).await.unwrap();

        assert_eq!(drained, vec![msg("a")]);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_empty() {
        let queue = test_queue(10);

        let start = Instant::now();
        let drained = queue.poll(Duration::from_secs(5)).await.unwrap();

        assert!(drained.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wakes_on_offer() {
        let queue = Arc::new(test_queue(10));

        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            producer.offer(msg("late")).unwrap();
        });

        let start = Instant::now();
        let drained = queue.poll(Duration::from_secs(30)).await.unwrap();

        assert_eq!(drained, vec![msg("late")]);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_wakes_on_close() {
        let queue = Arc::new(test_queue(10));

        let closer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            closer.close();
        });

        let result = queue.poll(Duration::from_secs(30)).await;
        assert_eq!(result, Err(QueueError::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_tracks_heartbeat() {
        let queue = test_queue(10);
        let expiry = Duration::from_secs(60);

        assert!(!queue.is_stale(expiry));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(queue.is_stale(expiry));

        queue.heartbeat();
        assert!(!queue.is_stale(expiry));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parked_poller_keeps_queue_fresh() {
        let queue = Arc::new(test_queue(10));
        let expiry = Duration::from_secs(10);

        let poller = queue.clone();
        let handle = tokio::spawn(async move { poller.poll(Duration::from_secs(60)).await });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(queue.state().waiting, 1);
        assert!(!queue.is_stale(expiry));

        queue.offer(msg("a")).unwrap();
        let drained = handle.await.unwrap().unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(queue.state().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_poll_releases_waiter() {
        let queue = test_queue(10);

        let result = tokio::time::timeout(Duration::from_secs(1), queue.poll(Duration::from_secs(60))).await;
        assert!(result.is_err());
        assert_eq!(queue.state().waiting, 0);
    }
}
