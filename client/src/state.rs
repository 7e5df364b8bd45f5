use std::collections::BTreeMap;

use pixelchat_protocol::{ConnectionStatus, Message, TypingPeer};

use crate::session::SessionState;

/// Read-only view of a room session, published after every change
#[derive(Debug, Clone, Default)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub state: SessionState,
    pub connection_status: ConnectionStatus,
    /// Ids the server assigned us, oldest first. Reconnects may add more.
    pub self_user_ids: Vec<String>,
    pub messages: Vec<Message>,
    pub typing_users: BTreeMap<String, TypingPeer>,
    pub revision: u64,
}

impl RoomSnapshot {
    /// Our current user id, once the join was acknowledged
    pub fn self_user_id(&self) -> Option<&str> {
        self.self_user_ids.last().map(String::as_str)
    }

    /// Whether `message` was sent by this session
    pub fn is_own(&self, message: &Message) -> bool {
        self.self_user_ids.iter().any(|id| message.is_from(id))
    }

    /// Name to show above a message bubble
    pub fn sender_label<'a>(&self, message: &'a Message) -> &'a str {
        if self.is_own(message) {
            "You"
        } else {
            &message.sender_name
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}
