// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Queue Sessions
//!
//! A session is one client (tab, page) inside one HTTP session. The registry
//! owns the queue of every live session and enforces idle expiry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::queue::{MessageQueue, QueueConfig};

/// Identifies one client's queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSession {
    session_id: String,
    client_id: String,
}

impl QueueSession {
    pub fn new(session_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        QueueSession {
            session_id: session_id.into(),
            client_id: client_id.into(),
        }
    }

    /// Resolves the session for a request, minting a new HTTP session id when
    /// the request carries none.
    ///
    /// Returns the session and whether the HTTP session id was newly created.
    pub fn create_or_get(http_session: Option<&str>, client_id: &str) -> (Self, bool) {
        match http_session.filter(|s| !s.is_empty()) {
            Some(existing) => (QueueSession::new(existing, client_id), false),
            None => (
                QueueSession::new(uuid::Uuid::new_v4().to_string(), client_id),
                true,
            ),
        }
    }

    /// HTTP session id (cookie value).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Client id within the HTTP session.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue id: `<session>-<client>`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.session_id, self.client_id)
    }
}

impl fmt::Display for QueueSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.session_id, self.client_id)
    }
}

/// Live queues indexed by session.
pub struct SessionRegistry {
    queues: RwLock<HashMap<QueueSession, Arc<MessageQueue>>>,
    config: QueueConfig,
}

impl SessionRegistry {
    pub fn new(config: QueueConfig) -> Self {
        SessionRegistry {
            queues: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns the session's queue, creating it if needed.
    ///
    /// A closed queue left behind is replaced by a fresh one.
    pub fn open(&self, session: &QueueSession) -> Arc<MessageQueue> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        let queue = queues
            .entry(session.clone())
            .or_insert_with(|| Arc::new(MessageQueue::new(session.clone(), &self.config)));
        if queue.is_closed() {
            *queue = Arc::new(MessageQueue::new(session.clone(), &self.config));
        }
        queue.heartbeat();
        queue.clone()
    }

    /// Looks up a live queue. Expired queues are removed and not returned.
    pub fn get(&self, session: &QueueSession, expiry: Duration) -> Option<Arc<MessageQueue>> {
        let queue = {
            let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
            queues.get(session).cloned()?
        };

        if queue.is_closed() || queue.is_stale(expiry) {
            let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
            // Only evict the instance we inspected; it may have been reopened since.
            if queues.get(session).is_some_and(|q| Arc::ptr_eq(q, &queue)) {
                queues.remove(session);
            }
            queue.close();
            return None;
        }
        Some(queue)
    }

    /// Removes and closes a session's queue. Returns true if one existed.
    pub fn close(&self, session: &QueueSession) -> bool {
        let removed = {
            let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
            queues.remove(session)
        };
        match removed {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }

    /// Removes every queue idle for at least `expiry`.
    ///
    /// Returns the sessions removed.
    pub fn cleanup_expired(&self, expiry: Duration) -> Vec<QueueSession> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());

        let expired: Vec<QueueSession> = queues
            .iter()
            .filter(|(_, q)| q.is_closed() || q.is_stale(expiry))
            .map(|(s, _)| s.clone())
            .collect();

        for session in &expired {
            if let Some(queue) = queues.remove(session) {
                queue.close();
            }
        }

        expired
    }

    /// Number of live queues.
    pub fn len(&self) -> usize {
        self.queues.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total messages pending across all queues.
    pub fn pending_count(&self) -> usize {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        queues.values().map(|q| q.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_format() {
        let session = QueueSession::new("abc", "7");
        assert_eq!(session.id(), "abc-7");
        assert_eq!(session.to_string(), "abc-7");
        assert_eq!(session.session_id(), "abc");
        assert_eq!(session.client_id(), "7");
    }

    #[test]
    fn test_create_or_get_reuses_http_session() {
        let (session, created) = QueueSession::create_or_get(Some("cookie-1"), "c1");
        assert!(!created);
        assert_eq!(session, QueueSession::new("cookie-1", "c1"));
    }

    #[test]
    fn test_create_or_get_mints_http_session() {
        let (first, created) = QueueSession::create_or_get(None, "c1");
        assert!(created);
        assert_eq!(first.client_id(), "c1");

        let (second, _) = QueueSession::create_or_get(Some(""), "c1");
        assert_ne!(first, second);
    }

    #[test]
    fn test_open_is_idempotent() {
        let registry = SessionRegistry::new(QueueConfig::default());
        let session = QueueSession::new("s", "c");

        let a = registry.open(&session);
        let b = registry.open(&session);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_close_removes_queue() {
        let registry = SessionRegistry::new(QueueConfig::default());
        let session = QueueSession::new("s", "c");

        let queue = registry.open(&session);
        assert!(registry.close(&session));
        assert!(queue.is_closed());
        assert!(registry.get(&session, Duration::from_secs(60)).is_none());
        assert!(!registry.close(&session));
    }

    #[test]
    fn test_get_drops_expired_queue() {
        let registry = SessionRegistry::new(QueueConfig::default());
        let session = QueueSession::new("s", "c");
        registry.open(&session);

        assert!(registry.get(&session, Duration::from_secs(60)).is_some());

        // Zero expiry means every idle queue is stale
        assert!(registry.get(&session, Duration::ZERO).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cleanup_expired() {
        let registry = SessionRegistry::new(QueueConfig::default());
        registry.open(&QueueSession::new("s", "1"));
        registry.open(&QueueSession::new("s", "2"));

        let removed = registry.cleanup_expired(Duration::from_secs(3600));
        assert!(removed.is_empty());
        assert_eq!(registry.len(), 2);

        let removed = registry.cleanup_expired(Duration::ZERO);
        assert_eq!(removed.len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_pending_count() {
        let registry = SessionRegistry::new(QueueConfig::default());
        let a = registry.open(&QueueSession::new("s", "1"));
        let b = registry.open(&QueueSession::new("s", "2"));

        a.offer(crate::message::Message::to("x")).unwrap();
        a.offer(crate::message::Message::to("y")).unwrap();
        b.offer(crate::message::Message::to("z")).unwrap();

        assert_eq!(registry.pending_count(), 3);
    }
}
