// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Errors
//!
//! A failed request as seen by a client bus, with the retry decision attached.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// Boxed source error carried by a [`TransportError`].
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Transport that produced the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    WebSocket,
}

/// Retry policy decided for a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryInfo {
    delay: Duration,
    retry_count: u32,
}

impl RetryInfo {
    pub fn new(delay: Duration, retry_count: u32) -> Self {
        RetryInfo { delay, retry_count }
    }

    /// Delay before the next attempt.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of retries already made.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

/// A failed bus request.
///
/// Handlers receive it mutably and may call
/// [`stop_default_error_handling`](TransportError::stop_default_error_handling)
/// to keep the bus from reacting to it.
#[derive(Debug)]
pub struct TransportError {
    kind: TransportKind,
    status_code: u16,
    source: Option<BoxError>,
    retry_info: RetryInfo,
    default_handling_stopped: bool,
}

impl TransportError {
    /// Creates an error for a failed HTTP request.
    pub fn http(status_code: u16, source: Option<BoxError>, retry_info: RetryInfo) -> Self {
        TransportError {
            kind: TransportKind::Http,
            status_code,
            source,
            retry_info,
            default_handling_stopped: false,
        }
    }

    /// Creates an error for a failed WebSocket channel. Status code is 0.
    pub fn websocket(source: Option<BoxError>, retry_info: RetryInfo) -> Self {
        TransportError {
            kind: TransportKind::WebSocket,
            status_code: 0,
            source,
            retry_info,
            default_handling_stopped: false,
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn is_http(&self) -> bool {
        self.kind == TransportKind::Http
    }

    pub fn is_websocket(&self) -> bool {
        self.kind == TransportKind::WebSocket
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// The underlying error, if any.
    pub fn exception(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// Message of the underlying error, or an empty string.
    pub fn error_message(&self) -> String {
        self.source
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default()
    }

    pub fn retry_info(&self) -> RetryInfo {
        self.retry_info
    }

    /// Suppresses the bus's default reaction to this error.
    pub fn stop_default_error_handling(&mut self) {
        self.default_handling_stopped = true;
    }

    pub fn is_default_handling_stopped(&self) -> bool {
        self.default_handling_stopped
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TransportKind::Http => write!(f, "http transport error (status {})", self.status_code)?,
            TransportKind::WebSocket => f.write_str("websocket transport error")?,
        }
        if let Some(source) = &self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
