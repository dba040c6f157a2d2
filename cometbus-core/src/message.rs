// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bus Messages
//!
//! A message is a JSON object of named parts. Transports exchange JSON arrays
//! of messages.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known message part names.
pub mod parts {
    pub const TO_SUBJECT: &str = "ToSubject";
    pub const COMMAND_TYPE: &str = "CommandType";
    pub const REPLY_TO: &str = "ReplyTo";
    pub const SUBJECT: &str = "Subject";
    pub const ERROR_MESSAGE: &str = "ErrorMessage";
    pub const ADDITIONAL_DETAILS: &str = "AdditionalDetails";
    pub const SESSION_ID: &str = "SessionID";
    pub const CLIENT_ID: &str = "ClientID";
}

/// Reserved subjects.
pub mod subjects {
    /// Server-side bus control channel.
    pub const SERVER_BUS: &str = "ServerBus";
    /// Client-side bus control channel.
    pub const CLIENT_BUS: &str = "ClientBus";
    /// Client-side error channel.
    pub const CLIENT_BUS_ERRORS: &str = "ClientBusErrors";
}

/// Command types understood on the bus control channels.
pub mod commands {
    pub const CONNECT_TO_QUEUE: &str = "ConnectToQueue";
    pub const FINISH_STATE_SYNC: &str = "FinishStateSync";
    pub const REMOTE_SUBSCRIBE: &str = "RemoteSubscribe";
    pub const REMOTE_UNSUBSCRIBE: &str = "RemoteUnsubscribe";
    pub const DISCONNECT: &str = "Disconnect";
    pub const HEARTBEAT: &str = "Heartbeat";
    pub const SESSION_EXPIRED: &str = "SessionExpired";
    pub const ASSOCIATE: &str = "Associate";
    pub const WEBSOCKET_CHANNEL_OPEN: &str = "WebsocketChannelOpen";
}

/// Errors from parsing a message payload.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a message object or an array of message objects")]
    NotAMessage,
}

/// A bus message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Creates a message addressed to `subject`.
    pub fn to(subject: &str) -> Self {
        let mut message = Message::default();
        message.set(parts::TO_SUBJECT, subject);
        message
    }

    /// Creates a control message for the client bus.
    pub fn command(subject: &str, command: &str) -> Self {
        Message::to(subject).with(parts::COMMAND_TYPE, command)
    }

    /// Tells the client that its session is gone and it must reconnect.
    pub fn session_expired() -> Self {
        Message::command(subjects::CLIENT_BUS, commands::SESSION_EXPIRED)
    }

    /// Tells the client that its queue is open and state sync is done.
    pub fn finish_state_sync() -> Self {
        Message::command(subjects::CLIENT_BUS, commands::FINISH_STATE_SYNC)
    }

    /// Tells the client that its WebSocket channel has taken over delivery.
    pub fn websocket_channel_open() -> Self {
        Message::command(subjects::CLIENT_BUS, commands::WEBSOCKET_CHANNEL_OPEN)
    }

    /// Error report for the client's error channel.
    pub fn error(error_message: &str, details: Option<&str>) -> Self {
        let mut message = Message::to(subjects::CLIENT_BUS_ERRORS)
            .with(parts::SUBJECT, subjects::CLIENT_BUS_ERRORS)
            .with(parts::ERROR_MESSAGE, error_message);
        if let Some(details) = details {
            message.set(parts::ADDITIONAL_DETAILS, details);
        }
        message
    }

    /// Builder form of [`set`](Message::set).
    pub fn with(mut self, part: &str, value: impl Into<Value>) -> Self {
        self.set(part, value);
        self
    }

    pub fn set(&mut self, part: &str, value: impl Into<Value>) {
        self.0.insert(part.to_string(), value.into());
    }

    pub fn get(&self, part: &str) -> Option<&Value> {
        self.0.get(part)
    }

    /// Returns a part if it is a string.
    pub fn get_str(&self, part: &str) -> Option<&str> {
        self.0.get(part).and_then(Value::as_str)
    }

    pub fn to_subject(&self) -> Option<&str> {
        self.get_str(parts::TO_SUBJECT)
    }

    pub fn command_type(&self) -> Option<&str> {
        self.get_str(parts::COMMAND_TYPE)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for Message {
    type Error = MessageError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Message(map)),
            _ => Err(MessageError::NotAMessage),
        }
    }
}

/// Parses a transport payload: either one message object or an array of them.
pub fn parse_messages(payload: &[u8]) -> Result<Vec<Message>, MessageError> {
    match serde_json::from_slice::<Value>(payload)? {
        Value::Array(items) => items.into_iter().map(Message::try_from).collect(),
        object @ Value::Object(_) => Ok(vec![Message::try_from(object)?]),
        _ => Err(MessageError::NotAMessage),
    }
}

/// Serializes messages as the JSON array transports write.
pub fn encode_messages(messages: &[Message]) -> String {
    Value::Array(messages.iter().cloned().map(Message::into_value).collect()).to_string()
}
