use serde::Serialize;

use crate::model::InlineImage;

/// Commands that clients can send to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientCommand {
    /// {"event":"join-room","displayName":NAME}
    #[serde(rename_all = "camelCase")]
    JoinRoom { display_name: String },

    /// {"event":"send-message","text":TEXT}
    SendMessage { text: String },

    /// {"event":"send-image","image":DATA_URL}
    SendImage { image: InlineImage },

    /// {"event":"typing","isTyping":BOOL,"text":PREVIEW}
    #[serde(rename_all = "camelCase")]
    Typing { is_typing: bool, text: String },

    /// {"event":"leave-room"}
    LeaveRoom,
}

/// Client command addressed to a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientMessage {
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(flatten)]
    pub command: ClientCommand,
}

impl ClientMessage {
    pub fn new(room_id: impl Into<String>, command: ClientCommand) -> Self {
        Self {
            room_id: room_id.into(),
            command,
        }
    }

    /// Serialize to wire format: a single JSON text frame
    pub fn to_wire_format(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn is_join(&self) -> bool {
        matches!(self.command, ClientCommand::JoinRoom { .. })
    }
}
