use crate::error::SessionError;

/// The room a session is bound to
///
/// Immutable for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomIdentity {
    room_id: String,
    display_name: String,
}

impl RoomIdentity {
    /// Both the room id and the display name are required
    pub fn new(
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Result<Self, SessionError> {
        let room_id = room_id.into().trim().to_string();
        let display_name = display_name.into().trim().to_string();

        if room_id.is_empty() {
            return Err(SessionError::JoinRejected("missing room id".to_string()));
        }
        if display_name.is_empty() {
            return Err(SessionError::JoinRejected("missing display name".to_string()));
        }

        Ok(Self {
            room_id,
            display_name,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}
