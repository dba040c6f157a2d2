// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bus States
//!
//! Lifecycle states of a client bus and the connection phase a request
//! declares.

use std::fmt;

/// Lifecycle state of a client bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    /// Never started, or stopped.
    Uninitialized,
    /// Running without a server; messages are delivered locally only.
    LocalOnly,
    /// Handshake with the server in progress.
    Connecting,
    /// Lost the server; reconnect pending.
    ConnectionInterrupted,
    /// Connected and exchanging messages with the server.
    Connected,
}

impl BusState {
    /// Returns true if the bus may be started from this state.
    pub fn is_startable_state(self) -> bool {
        matches!(self, BusState::Uninitialized | BusState::LocalOnly)
    }

    /// Returns true if messages should be delivered to local subscribers
    /// while in this state.
    pub fn is_shadow_deliverable(self) -> bool {
        matches!(self, BusState::LocalOnly | BusState::ConnectionInterrupted)
    }

    /// Canonical upper-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            BusState::Uninitialized => "UNINITIALIZED",
            BusState::LocalOnly => "LOCAL_ONLY",
            BusState::Connecting => "CONNECTING",
            BusState::ConnectionInterrupted => "CONNECTION_INTERRUPTED",
            BusState::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for BusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase a poll request declares through its `phase` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    /// Client is establishing its queue.
    Connecting,
    /// Client is tearing its queue down.
    Disconnecting,
    /// No phase given, or an unrecognised one.
    #[default]
    Unknown,
}

impl ConnectionPhase {
    /// Parses the request parameter. Matching is case-insensitive.
    pub fn from_param(param: Option<&str>) -> Self {
        match param.map(str::trim) {
            Some(p) if p.eq_ignore_ascii_case("connecting") => ConnectionPhase::Connecting,
            Some(p) if p.eq_ignore_ascii_case("disconnecting") => ConnectionPhase::Disconnecting,
            _ => ConnectionPhase::Unknown,
        }
    }

    /// Returns true for the transient phases in which a missing queue is expected.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ConnectionPhase::Connecting | ConnectionPhase::Disconnecting
        )
    }
}
