//! Room data model shared by the wire protocol and the client session

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::ParseError;

/// What a [`Message`] carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    System,
}

/// A single entry of the room's message log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<InlineImage>,
    /// Server timestamp in milliseconds. Not used for ordering.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_system_join_event: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_count: Option<u32>,
}

impl Message {
    /// Whether this message was sent by `user_id`
    pub fn is_from(&self, user_id: &str) -> bool {
        self.kind != MessageKind::System && self.sender_id == user_id
    }

    /// Room population suffix shown after a join narration
    ///
    /// Returns `None` for anything that is not a join event with a known,
    /// non-zero population.
    pub fn occupancy_note(&self) -> Option<String> {
        if self.kind != MessageKind::System || !self.is_system_join_event {
            return None;
        }

        match self.user_count? {
            0 => None,
            1 => Some("They're the only one here.".to_string()),
            n => Some(format!("There are now {} people in the room.", n)),
        }
    }
}

/// An image embedded directly in a message
///
/// `data` holds the base64 payload. On the wire the image travels as a
/// `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Encode raw bytes as an inline image
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, STANDARD.encode(bytes))
    }

    /// Decode the base64 payload back into bytes
    pub fn decode(&self) -> Result<Vec<u8>, ParseError> {
        STANDARD
            .decode(&self.data)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid base64 payload: {}", e)))
    }

    /// Render as `data:MIME;base64,DATA`
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    /// Parse a `data:MIME;base64,DATA` URL
    pub fn parse_data_url(url: &str) -> Result<Self, ParseError> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| ParseError::InvalidFormat("data URL must start with data:".to_string()))?;

        let (header, data) = rest
            .split_once(',')
            .ok_or_else(|| ParseError::MissingField("data URL payload".to_string()))?;

        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| ParseError::InvalidFormat("data URL is not base64".to_string()))?;

        if mime_type.is_empty() {
            return Err(ParseError::MissingField("data URL mime type".to_string()));
        }

        Ok(Self::new(mime_type, data))
    }
}

impl TryFrom<String> for InlineImage {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_data_url(&value)
    }
}

impl From<InlineImage> for String {
    fn from(image: InlineImage) -> Self {
        image.to_data_url()
    }
}

/// A peer that is currently typing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingPeer {
    pub display_name: String,
    pub preview_text: String,
}

/// State of the channel to the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Disconnected => "Disconnected",
        };
        f.write_str(label)
    }
}

/// What a presence system event narrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Joined,
    Left,
    #[default]
    #[serde(other)]
    Other,
}
