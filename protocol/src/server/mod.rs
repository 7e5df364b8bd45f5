mod tests;

use serde::Deserialize;

use crate::ParseError;
use crate::model::{Message, PresenceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// The server accepted our join and assigned us a user id
    JoinAck { user_id: String },
    JoinRejected { reason: String },
    Message(Message),
    Typing {
        user_id: String,
        display_name: String,
        is_typing: bool,
        text: String,
    },
    /// Join/leave narration with the current room population
    System {
        text: String,
        user_count: Option<u32>,
        presence: PresenceKind,
    },
    /// Any event this client does not understand
    Raw(String),
}

/// JSON shape of inbound events
#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
enum WireEvent {
    #[serde(rename_all = "camelCase")]
    Joined { user_id: String },

    JoinRejected {
        #[serde(default)]
        reason: String,
    },

    Message(Message),

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: String,
        #[serde(default)]
        display_name: String,
        is_typing: bool,
        #[serde(default)]
        text: String,
    },

    #[serde(rename_all = "camelCase")]
    System {
        text: String,
        #[serde(default)]
        user_count: Option<u32>,
        #[serde(default)]
        presence: PresenceKind,
    },

    #[serde(other)]
    Unknown,
}

/// Parse a single text frame from the server into a ServerMessage
pub fn parse_server_message(frame: &str) -> Result<ServerMessage, ParseError> {
    let frame = frame.trim();

    if frame.is_empty() {
        return Err(ParseError::EmptyMessage);
    }

    let event: WireEvent =
        serde_json::from_str(frame).map_err(|e| ParseError::InvalidFormat(e.to_string()))?;

    let message = match event {
        WireEvent::Joined { user_id } => {
            if user_id.is_empty() {
                return Err(ParseError::MissingField("userId".to_string()));
            }
            ServerMessage::JoinAck { user_id }
        }
        WireEvent::JoinRejected { reason } => ServerMessage::JoinRejected { reason },
        WireEvent::Message(message) => ServerMessage::Message(message),
        WireEvent::UserTyping {
            user_id,
            display_name,
            is_typing,
            text,
        } => ServerMessage::Typing {
            user_id,
            display_name,
            is_typing,
            text,
        },
        WireEvent::System {
            text,
            user_count,
            presence,
        } => ServerMessage::System {
            text,
            user_count,
            presence,
        },
        WireEvent::Unknown => ServerMessage::Raw(frame.to_string()),
    };

    Ok(message)
}
