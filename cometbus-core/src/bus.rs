// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Server Bus
//!
//! Routes inbound messages to local services and to the queues of remote
//! sessions subscribed to a subject. Messages addressed to `ServerBus` are
//! bus commands (connect, subscribe, disconnect, heartbeat).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::message::{commands, parse_messages, parts, subjects, Message};
use crate::queue::{MessageQueue, QueueConfig, QueueError};
use crate::session::{QueueSession, SessionRegistry};

/// Errors from bus routing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The session has no live queue (never connected, expired or closed).
    #[error("queue unavailable for session {0}")]
    QueueUnavailable(String),

    /// The message cannot be routed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Delivery into a queue failed.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// A server-side service subscribed to a subject.
pub trait MessageCallback: Send + Sync {
    /// Handles one message sent by `sender`.
    fn callback(&self, bus: &ServerBus, sender: &QueueSession, message: &Message);
}

impl<F> MessageCallback for F
where
    F: Fn(&ServerBus, &QueueSession, &Message) + Send + Sync,
{
    fn callback(&self, bus: &ServerBus, sender: &QueueSession, message: &Message) {
        self(bus, sender, message)
    }
}

/// The server side of the bus.
pub struct ServerBus {
    sessions: SessionRegistry,
    session_timeout: Duration,
    /// Remote sessions subscribed to each subject.
    remote_subscriptions: RwLock<HashMap<String, HashSet<QueueSession>>>,
    local_services: RwLock<HashMap<String, Vec<Arc<dyn MessageCallback>>>>,
}

impl ServerBus {
    /// Creates a bus whose queues expire after `session_timeout` of inactivity.
    pub fn new(config: QueueConfig, session_timeout: Duration) -> Self {
        ServerBus {
            sessions: SessionRegistry::new(config),
            session_timeout,
            remote_subscriptions: RwLock::new(HashMap::new()),
            local_services: RwLock::new(HashMap::new()),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Registers a local service for `subject`.
    pub fn subscribe(&self, subject: &str, callback: impl MessageCallback + 'static) {
        let mut services = self.local_services.write().unwrap_or_else(|e| e.into_inner());
        services
            .entry(subject.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Removes all local services for `subject`. Returns how many were removed.
    pub fn unsubscribe_all(&self, subject: &str) -> usize {
        let mut services = self.local_services.write().unwrap_or_else(|e| e.into_inner());
        services.remove(subject).map(|v| v.len()).unwrap_or(0)
    }

    /// Returns true if any local service or remote session listens on `subject`.
    pub fn has_subscribers(&self, subject: &str) -> bool {
        let local = self
            .local_services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject)
            .is_some_and(|v| !v.is_empty());
        local
            || self
                .remote_subscriptions
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(subject)
                .is_some_and(|s| !s.is_empty())
    }

    /// Opens (or reuses) the session's queue.
    pub fn open_queue(&self, session: &QueueSession) -> Arc<MessageQueue> {
        let queue = self.sessions.open(session);
        debug!("Queue open for {}", session);
        queue
    }

    /// Returns the session's live queue, or `None` if missing or expired.
    pub fn get_queue(&self, session: &QueueSession) -> Option<Arc<MessageQueue>> {
        let queue = self.sessions.get(session, self.session_timeout);
        if queue.is_none() {
            self.drop_subscriptions(session);
        }
        queue
    }

    /// Closes the session's queue and drops its subscriptions.
    pub fn close_queue(&self, session: &QueueSession) -> bool {
        self.drop_subscriptions(session);
        self.sessions.close(session)
    }

    /// Removes queues idle for at least `expiry`, with their subscriptions.
    ///
    /// Returns the number of queues removed.
    pub fn cleanup_expired(&self, expiry: Duration) -> usize {
        let expired = self.sessions.cleanup_expired(expiry);
        for session in &expired {
            self.drop_subscriptions(session);
        }
        expired.len()
    }

    /// Number of live queues.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Messages waiting across all queues.
    pub fn pending_count(&self) -> usize {
        self.sessions.pending_count()
    }

    /// Delivers a message straight into one session's queue.
    pub fn send(&self, session: &QueueSession, message: Message) -> Result<(), BusError> {
        let queue = self
            .get_queue(session)
            .ok_or_else(|| BusError::QueueUnavailable(session.id()))?;
        queue.offer(message)?;
        Ok(())
    }

    /// Routes a message sent by `sender`.
    ///
    /// Returns the number of deliveries made (local services plus remote
    /// queues).
    pub fn store(&self, sender: &QueueSession, message: Message) -> Result<usize, BusError> {
        let subject = message
            .to_subject()
            .ok_or_else(|| BusError::InvalidMessage(format!("missing {}", parts::TO_SUBJECT)))?
            .to_string();

        if subject == subjects::SERVER_BUS {
            return self.handle_command(sender, &message).map(|_| 0);
        }

        if self.get_queue(sender).is_none() {
            return Err(BusError::QueueUnavailable(sender.id()));
        }

        Ok(self.publish(sender, &subject, message))
    }

    /// Parses a transport payload and stores every message in it, in order.
    ///
    /// Stops at the first message that fails. Returns the number of messages
    /// stored.
    pub fn store_payload(&self, sender: &QueueSession, payload: &[u8]) -> CoreResult<usize> {
        let messages = parse_messages(payload)?;
        let count = messages.len();
        for message in messages {
            self.store(sender, message)?;
        }
        Ok(count)
    }

    fn handle_command(&self, sender: &QueueSession, message: &Message) -> Result<(), BusError> {
        let command = message.command_type().ok_or_else(|| {
            BusError::InvalidMessage(format!("bus command without {}", parts::COMMAND_TYPE))
        })?;

        match command {
            commands::CONNECT_TO_QUEUE => {
                let queue = self.open_queue(sender);
                queue.offer(Message::finish_state_sync())?;
            }
            commands::DISCONNECT => {
                self.live_queue(sender)?;
                self.close_queue(sender);
                debug!("Session {} disconnected", sender);
            }
            commands::HEARTBEAT => {
                self.live_queue(sender)?.heartbeat();
            }
            commands::REMOTE_SUBSCRIBE => {
                self.live_queue(sender)?;
                let subject = Self::subscription_subject(message)?;
                let mut subscriptions = self
                    .remote_subscriptions
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                subscriptions
                    .entry(subject.to_string())
                    .or_default()
                    .insert(sender.clone());
                debug!("Session {} subscribed to {}", sender, subject);
            }
            commands::REMOTE_UNSUBSCRIBE => {
                self.live_queue(sender)?;
                let subject = Self::subscription_subject(message)?;
                let mut subscriptions = self
                    .remote_subscriptions
                    .write()
                    .unwrap_or_else(|e| e.into_inner());
                if let Some(set) = subscriptions.get_mut(subject) {
                    set.remove(sender);
                    if set.is_empty() {
                        subscriptions.remove(subject);
                    }
                }
            }
            other => {
                return Err(BusError::InvalidMessage(format!(
                    "unknown bus command: {}",
                    other
                )));
            }
        }
        Ok(())
    }

    fn live_queue(&self, session: &QueueSession) -> Result<Arc<MessageQueue>, BusError> {
        self.get_queue(session)
            .ok_or_else(|| BusError::QueueUnavailable(session.id()))
    }

    fn subscription_subject(message: &Message) -> Result<&str, BusError> {
        message
            .get_str(parts::SUBJECT)
            .ok_or_else(|| BusError::InvalidMessage(format!("subscription without {}", parts::SUBJECT)))
    }

    fn publish(&self, sender: &QueueSession, subject: &str, message: Message) -> usize {
        // Snapshot subscribers so callbacks can use the bus without deadlocking.
        let services: Vec<Arc<dyn MessageCallback>> = self
            .local_services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject)
            .cloned()
            .unwrap_or_default();
        let remotes: Vec<QueueSession> = self
            .remote_subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(subject)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();

        if services.is_empty() && remotes.is_empty() {
            warn!("No subscribers for subject {} (from {})", subject, sender);
            let error = Message::error(
                &format!("no subscribers to deliver to for subject: {}", subject),
                None,
            );
            if let Err(e) = self.send(sender, error) {
                warn!("Failed to report delivery error to {}: {}", sender, e);
            }
            return 0;
        }

        let mut delivered = 0;

        for service in &services {
            service.callback(self, sender, &message);
            delivered += 1;
        }

        for remote in &remotes {
            match self.send(remote, message.clone()) {
                Ok(()) => delivered += 1,
                Err(BusError::Queue(QueueError::Full { capacity })) => {
                    warn!(
                        "Dropping message on {} for {}: queue full ({})",
                        subject, remote, capacity
                    );
                }
                Err(e) => {
                    debug!("Skipping subscriber {} on {}: {}", remote, subject, e);
                }
            }
        }

        delivered
    }

    fn drop_subscriptions(&self, session: &QueueSession) {
        let mut subscriptions = self
            .remote_subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner());
        subscriptions.retain(|_, set| {
            set.remove(session);
            !set.is_empty()
        });
    }
}
