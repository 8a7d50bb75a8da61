//! Wire protocol: JSON events exchanged over the WebSocket.
//!
//! Every frame is an object `{"event": "<name>", "data": <payload>}`.
//! Inbound frames decode into the closed [`ClientIntent`] enum, so dispatch is
//! an exhaustive `match` rather than a lookup by event name.

use crate::db::StoredMessage;
use crate::error::HandlerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An intent sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientIntent {
    Join(JoinRequest),
    SendMessage(SendRequest),
    MessagesRead(ConversationPair),
    Typing(ConversationPair),
    StopTyping(ConversationPair),
    Leave,
}

/// `join` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub credential: String,
}

/// `send_message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
}

/// Payload shared by `messages_read`, `typing` and `stop_typing`.
///
/// For `messages_read` the requester is `to`: it marks messages it received
/// from `from` as read.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ConversationPair {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

/// Just the tag of a frame, used to attribute parse failures.
#[derive(Deserialize)]
struct EventTag {
    event: String,
}

impl ClientIntent {
    /// Decode and validate one inbound frame.
    pub fn parse(text: &str) -> Result<Self, HandlerError> {
        let intent: ClientIntent =
            serde_json::from_str(text).map_err(|e| HandlerError::Malformed(e.to_string()))?;
        intent.validate()?;
        Ok(intent)
    }

    /// Best-effort event name of a frame that failed to parse.
    pub fn peek_event(text: &str) -> Option<String> {
        serde_json::from_str::<EventTag>(text).ok().map(|t| t.event)
    }

    /// Wire name of this intent.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::SendMessage(_) => "send_message",
            Self::MessagesRead(_) => "messages_read",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop_typing",
            Self::Leave => "leave",
        }
    }

    fn validate(&self) -> Result<(), HandlerError> {
        match self {
            Self::Join(req) => {
                require("name", &req.name)?;
                require("credential", &req.credential)
            }
            Self::SendMessage(req) => {
                require("from", &req.from)?;
                require("to", &req.to)?;
                require("body", &req.body)
            }
            Self::MessagesRead(pair) | Self::Typing(pair) | Self::StopTyping(pair) => {
                require("from", &pair.from)?;
                require("to", &pair.to)
            }
            Self::Leave => Ok(()),
        }
    }
}

fn require(field: &'static str, value: &str) -> Result<(), HandlerError> {
    if value.is_empty() {
        Err(HandlerError::MissingField(field))
    } else {
        Ok(())
    }
}

/// One row of the presence roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub name: String,
    pub online: bool,
    #[serde(rename = "lastSeenAt")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// An event pushed to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    JoinSuccess {
        name: String,
    },
    JoinError {
        reason: &'static str,
        message: String,
    },
    Users(Vec<RosterEntry>),
    MessageHistory(Vec<StoredMessage>),
    ReceiveMessage(StoredMessage),
    MessageDelivered {
        #[serde(rename = "messageId")]
        message_id: i64,
    },
    MessagesRead {
        from: String,
        to: String,
        #[serde(rename = "messageIds")]
        message_ids: Vec<i64>,
    },
    Typing {
        from: String,
    },
    StopTyping {
        from: String,
    },
    Error {
        event: Option<String>,
        code: &'static str,
        message: String,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinSuccess { .. } => "join_success",
            Self::JoinError { .. } => "join_error",
            Self::Users(_) => "users",
            Self::MessageHistory(_) => "message_history",
            Self::ReceiveMessage(_) => "receive_message",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessagesRead { .. } => "messages_read",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop_typing",
            Self::Error { .. } => "error",
        }
    }
}
