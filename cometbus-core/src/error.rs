// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core Error Types
//!
//! Unified error type for callers that mix bus, queue and codec operations.

use thiserror::Error;

use crate::bus::BusError;
use crate::client::LifecycleError;
use crate::codec::CodecError;
use crate::message::MessageError;
use crate::queue::QueueError;

/// Unified error type for CometBus operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Queue rejected an operation.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Bus routing failed.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Envelope conversion failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Message payload could not be parsed.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// Client lifecycle transition was rejected.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

/// Result type for CometBus operations.
pub type CoreResult<T> = Result<T, CoreError>;
