//! RoomSession - the authoritative client-side view of a room

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use pixelchat_media::{ImageTranscoder, TranscodeError, Transcoded};
use pixelchat_protocol::{
    ConnectionStatus, InlineImage, Message, MessageKind, PresenceKind, TypingPeer,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::room::RoomIdentity;
use crate::state::RoomSnapshot;
use crate::typing::TypingIntent;

/// Lifecycle of a session. `Left` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Joining,
    Joined,
    Left,
}

/// Something the session wants sent to the room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Image(InlineImage),
    Typing(TypingIntent),
    Leave,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    peer: TypingPeer,
    last_seen: Instant,
}

/// Client-side state of one room
///
/// The message log only grows in the order the channel delivers events.
/// Own messages are not echoed locally; they show up when the server
/// relays them back, so they are ordered like everyone else's.
///
/// Operations return the [`Outbound`] intent to transmit, if any, and never
/// fail for expected conditions such as empty input or events after leaving.
#[derive(Debug)]
pub struct RoomSession {
    identity: RoomIdentity,
    state: SessionState,
    connection_status: ConnectionStatus,
    self_user_ids: Vec<String>,

    messages: Vec<Message>,
    /// Message id -> position in `messages`
    message_index: HashMap<String, usize>,
    typing: BTreeMap<String, TypingEntry>,

    transcoder: ImageTranscoder,
    typing_timeout: Duration,

    revision: u64,
}

impl RoomSession {
    pub fn new(identity: RoomIdentity, config: &SessionConfig) -> Self {
        Self {
            identity,
            state: SessionState::Joining,
            connection_status: ConnectionStatus::Connecting,
            self_user_ids: Vec::new(),
            messages: Vec::new(),
            message_index: HashMap::new(),
            typing: BTreeMap::new(),
            transcoder: ImageTranscoder::new(config.max_image_dimension),
            typing_timeout: config.typing_timeout,
            revision: 0,
        }
    }

    // === Accessors ===

    pub fn identity(&self) -> &RoomIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_left(&self) -> bool {
        self.state == SessionState::Left
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Our current user id, once the join was acknowledged
    pub fn self_user_id(&self) -> Option<&str> {
        self.self_user_ids.last().map(String::as_str)
    }

    /// Whether `message` was sent by this session
    pub fn is_own(&self, message: &Message) -> bool {
        self.self_user_ids.iter().any(|id| message.is_from(id))
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn typing_users(&self) -> impl Iterator<Item = (&str, &TypingPeer)> {
        self.typing
            .iter()
            .map(|(user_id, entry)| (user_id.as_str(), &entry.peer))
    }

    pub fn typing_peer(&self, user_id: &str) -> Option<&TypingPeer> {
        self.typing.get(user_id).map(|entry| &entry.peer)
    }

    pub fn transcoder(&self) -> ImageTranscoder {
        self.transcoder
    }

    /// Increases on every observable change
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.identity.room_id().to_string(),
            state: self.state,
            connection_status: self.connection_status,
            self_user_ids: self.self_user_ids.clone(),
            messages: self.messages.clone(),
            typing_users: self
                .typing_users()
                .map(|(user_id, peer)| (user_id.to_string(), peer.clone()))
                .collect(),
            revision: self.revision,
        }
    }

    /// Fails with `PostLeaveEvent` once the room was left
    pub fn ensure_active(&self) -> Result<(), SessionError> {
        if self.is_left() {
            Err(SessionError::PostLeaveEvent)
        } else {
            Ok(())
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn can_send(&self, what: &'static str) -> bool {
        match self.state {
            SessionState::Joined => true,
            state => {
                tracing::debug!(room = self.identity.room_id(), ?state, what, "Not joined, dropping send");
                false
            }
        }
    }

    // === Outbound intents ===

    /// Request a text message. The log is untouched until the server relays it.
    pub fn send_text(&mut self, text: &str) -> Option<Outbound> {
        if text.trim().is_empty() || !self.can_send("text") {
            return None;
        }

        Some(Outbound::Text(text.to_string()))
    }

    /// Transcode `bytes` in place and request an image message
    pub fn send_image(&mut self, bytes: &[u8]) -> Result<Option<Outbound>, SessionError> {
        let result = self.transcoder.transcode(bytes);
        self.image_ready(result)
    }

    /// Completion of a transcode started for [`RoomSession::send_image`]
    ///
    /// A failed transcode is reported to the caller and leaves the session
    /// untouched. A result arriving after leaving is discarded.
    pub fn image_ready(
        &mut self,
        result: Result<Transcoded, TranscodeError>,
    ) -> Result<Option<Outbound>, SessionError> {
        let transcoded = match result {
            Ok(transcoded) => transcoded,
            Err(e) => {
                tracing::warn!(room = self.identity.room_id(), error = %e, "Dropping unusable image");
                return Err(SessionError::InvalidImage(e));
            }
        };

        if !self.can_send("image") {
            return Ok(None);
        }

        Ok(Some(Outbound::Image(transcoded.image)))
    }

    /// Tell the room whether we are typing. Never touches our own peer set.
    pub fn set_typing_status(&mut self, intent: TypingIntent) -> Option<Outbound> {
        if !self.can_send("typing") {
            return None;
        }

        Some(Outbound::Typing(intent.normalized()))
    }

    /// Leave the room. Only the first call has an effect.
    pub fn leave_room(&mut self) -> Option<Outbound> {
        if self.is_left() {
            return None;
        }

        tracing::info!(room = self.identity.room_id(), "Leaving room");
        self.state = SessionState::Left;
        self.typing.clear();
        self.touch();
        Some(Outbound::Leave)
    }

    // === Inbound events ===

    /// The server accepted the join and told us who we are
    pub fn on_join_ack(&mut self, user_id: &str) {
        if self.ensure_active().is_err() {
            return;
        }

        if !self.self_user_ids.iter().any(|id| id == user_id) {
            self.self_user_ids.push(user_id.to_string());
        }
        self.typing.remove(user_id);

        if self.state == SessionState::Joining {
            tracing::info!(room = self.identity.room_id(), user_id, "Joined room");
            self.state = SessionState::Joined;
        } else {
            tracing::debug!(room = self.identity.room_id(), user_id, "Join acknowledged again");
        }
        self.touch();
    }

    /// Append a delivered message; a redelivered id replaces the earlier copy
    pub fn on_message_received(&mut self, message: Message) {
        if self.ensure_active().is_err() {
            return;
        }

        if message.kind != MessageKind::System {
            self.typing.remove(&message.sender_id);
        }

        let existing = self
            .message_index
            .get(&message.id)
            .copied()
            .filter(|_| !message.id.is_empty());

        match existing {
            Some(position) => {
                tracing::debug!(id = %message.id, "Replacing redelivered message");
                self.messages[position] = message;
            }
            None => {
                if !message.id.is_empty() {
                    self.message_index
                        .insert(message.id.clone(), self.messages.len());
                }
                self.messages.push(message);
            }
        }
        self.touch();
    }

    /// Insert, refresh, or (with `None`) remove a typing peer
    ///
    /// Reads the runtime clock, the same one the session loop prunes with.
    pub fn on_typing_update(&mut self, user_id: &str, peer: Option<TypingPeer>) {
        self.on_typing_update_at(user_id, peer, tokio::time::Instant::now().into_std());
    }

    pub fn on_typing_update_at(&mut self, user_id: &str, peer: Option<TypingPeer>, now: Instant) {
        if self.ensure_active().is_err() || self.self_user_ids.iter().any(|id| id == user_id) {
            return;
        }

        match peer {
            Some(peer) => {
                self.typing.insert(
                    user_id.to_string(),
                    TypingEntry {
                        peer,
                        last_seen: now,
                    },
                );
            }
            None => {
                if self.typing.remove(user_id).is_none() {
                    return;
                }
            }
        }
        self.touch();
    }

    /// Append a join/leave narration carrying the room population
    pub fn on_presence_system_event(
        &mut self,
        text: &str,
        user_count: Option<u32>,
        presence: PresenceKind,
    ) {
        if self.ensure_active().is_err() {
            return;
        }

        let message = Message {
            id: format!("system-{}", uuid::Uuid::new_v4()),
            sender_id: String::new(),
            sender_name: String::new(),
            kind: MessageKind::System,
            text: Some(text.to_string()),
            image: None,
            timestamp: now_millis(),
            is_system_join_event: presence == PresenceKind::Joined,
            user_count,
        };

        self.message_index
            .insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
        self.touch();
    }

    /// Track the channel state. Typing state does not survive a drop.
    pub fn on_connection_status_changed(&mut self, status: ConnectionStatus) {
        if self.ensure_active().is_err() || self.connection_status == status {
            return;
        }

        tracing::info!(
            room = self.identity.room_id(),
            from = %self.connection_status,
            to = %status,
            "Connection status changed"
        );

        self.connection_status = status;
        if status == ConnectionStatus::Disconnected {
            self.typing.clear();
        }
        self.touch();
    }

    /// Evict typing peers not heard from within the typing timeout
    ///
    /// Returns the number of peers removed.
    pub fn prune_typing(&mut self, now: Instant) -> usize {
        let timeout = self.typing_timeout;
        let before = self.typing.len();

        self.typing.retain(|user_id, entry| {
            let alive = now.saturating_duration_since(entry.last_seen) <= timeout;
            if !alive {
                tracing::debug!(user_id = %user_id, "Evicting stale typing peer");
            }
            alive
        });

        let removed = before - self.typing.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
