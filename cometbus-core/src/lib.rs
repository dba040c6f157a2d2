// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! CometBus Core Library
//!
//! Session queues, server-side routing and the wire codec shared by the relay
//! and by REST glue that talks plain JSON.
//!
//! # Architecture
//!
//! - **Queues**: one [`MessageQueue`] per [`QueueSession`], with back-pressure and idle expiry
//! - **Server bus**: subject routing, remote subscriptions and bus commands
//! - **Codec**: tagged envelope JSON to plain JSON and back
//! - **Client lifecycle**: [`BusState`] machine with transport error handling

pub mod bus;
pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod queue;
pub mod session;
pub mod state;
pub mod transport_error;

pub use bus::{BusError, MessageCallback, ServerBus};
pub use client::{BusLifecycle, LifecycleAction, LifecycleError, RetryPolicy};
pub use codec::{to_envelope, to_envelope_value, to_plain, to_plain_value, CodecError};
pub use error::{CoreError, CoreResult};
pub use message::{encode_messages, parse_messages, Message, MessageError};
pub use queue::{MessageQueue, QueueConfig, QueueError};
pub use session::{QueueSession, SessionRegistry};
pub use state::{BusState, ConnectionPhase};
pub use transport_error::{RetryInfo, TransportError, TransportKind};
