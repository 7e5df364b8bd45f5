use pixelchat_media::TranscodeError;
use thiserror::Error;

/// Conditions surfaced by a room session
///
/// Only `JoinRejected` and `ChannelUnavailable` (during the join handshake)
/// stop a session from starting. Everything else is reported to the caller
/// of a single operation and leaves the session running.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The picked file could not be turned into an attachment
    #[error("Invalid image: {0}")]
    InvalidImage(#[from] TranscodeError),

    /// Missing room identity or the server refused the join
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    /// The transport is gone or never answered the join
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// An inbound event arrived after the room was left
    #[error("Event received after leaving the room")]
    PostLeaveEvent,

    /// The session loop has stopped
    #[error("Session closed")]
    SessionClosed,
}
