// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Client Bus Lifecycle
//!
//! State machine a client bus runs through, plus its reaction to transport
//! errors: reconnect with exponential backoff, then fall back to local-only
//! delivery once retries are exhausted.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::message::Message;
use crate::state::BusState;
use crate::transport_error::{RetryInfo, TransportError};

/// Lifecycle error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot move bus from {from} to {to}")]
    InvalidTransition { from: BusState, to: BusState },
}

/// Reconnect policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_delay: Duration,
    /// Retries allowed before falling back to local-only.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// What the caller should do after a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    /// A handler took over; nothing to do.
    Ignored,
    /// Reconnect after the given delay.
    Reconnect { after: Duration },
    /// Retries exhausted; the bus now runs local-only.
    FallBackToLocal,
}

/// Client bus lifecycle.
#[derive(Debug)]
pub struct BusLifecycle {
    state: BusState,
    policy: RetryPolicy,
    retry_count: u32,
    /// Outbound messages held until the bus is connected.
    deferred: VecDeque<Message>,
}

impl BusLifecycle {
    pub fn new(policy: RetryPolicy) -> Self {
        BusLifecycle {
            state: BusState::Uninitialized,
            policy,
            retry_count: 0,
            deferred: VecDeque::new(),
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Starts connecting. Only allowed from a startable state.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.transition(BusState::Connecting, BusState::is_startable_state)
    }

    /// Marks the connection as established and resets the retry count.
    pub fn connected(&mut self) -> Result<(), LifecycleError> {
        self.transition(BusState::Connected, |s| {
            matches!(s, BusState::Connecting | BusState::ConnectionInterrupted)
        })?;
        self.retry_count = 0;
        Ok(())
    }

    /// Stops the bus and drops deferred messages.
    pub fn stop(&mut self) {
        self.state = BusState::Uninitialized;
        self.retry_count = 0;
        self.deferred.clear();
    }

    /// Retry information for the next failed request.
    pub fn retry_info(&self) -> RetryInfo {
        RetryInfo::new(self.policy.delay_for(self.retry_count), self.retry_count)
    }

    /// Handles a failed request.
    ///
    /// `handler` sees the error first and may stop default handling, in which
    /// case the state is left untouched.
    pub fn on_transport_error<H>(&mut self, error: &mut TransportError, handler: H) -> LifecycleAction
    where
        H: FnOnce(&mut TransportError),
    {
        handler(error);
        if error.is_default_handling_stopped() {
            return LifecycleAction::Ignored;
        }

        if self.retry_count >= self.policy.max_retries {
            self.state = BusState::LocalOnly;
            self.retry_count = 0;
            return LifecycleAction::FallBackToLocal;
        }

        let after = error.retry_info().delay();
        self.retry_count += 1;
        self.state = BusState::ConnectionInterrupted;
        LifecycleAction::Reconnect { after }
    }

    /// Returns true if messages should also be delivered to local subscribers.
    pub fn should_shadow_deliver(&self) -> bool {
        self.state.is_shadow_deliverable()
    }

    /// Holds a message for sending once connected.
    pub fn defer(&mut self, message: Message) {
        self.deferred.push_back(message);
    }

    /// Releases deferred messages, in order, once connected. Returns nothing
    /// in any other state.
    pub fn take_deferred(&mut self) -> Vec<Message> {
        if self.state != BusState::Connected {
            return Vec::new();
        }
        self.deferred.drain(..).collect()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    fn transition(
        &mut self,
        to: BusState,
        allowed_from: impl Fn(BusState) -> bool,
    ) -> Result<(), LifecycleError> {
        if !allowed_from(self.state) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

impl Default for BusLifecycle {
    fn default() -> Self {
        BusLifecycle::new(RetryPolicy::default())
    }
}
