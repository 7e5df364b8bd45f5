//! Room session client for pixelchat.
//!
//! A [`RoomSession`] owns the client-side view of one chat room: the message
//! log in channel delivery order, who is typing, and the connection status.
//! [`join_room`] runs a session on its own task, fed by a [`Channel`] and
//! driven through a cloneable [`RoomHandle`]:
//!
//! ```text
//! input ─> RoomHandle ─> session loop ─> ChannelAdapter ─> transport
//!                             ▲                                │
//!                             └──────── ChannelAdapter <───────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! let config = SessionConfig::from_env();
//! let (channel, socket) = spawn_connection("wss://chat.example/ws", &config).await?;
//! let identity = RoomIdentity::new("lobby", "Alice")?;
//! let room = join_room(channel, identity, config).await?;
//!
//! room.set_typing_status("hel")?;
//! room.send_text("hello")?;
//! room.send_image(std::fs::read("cat.jpg")?).await?;
//!
//! for message in room.snapshot().messages {
//!     println!("{}", message.text.unwrap_or_default());
//! }
//! ```

pub mod adapter;
mod config;
mod connection;
mod error;
mod handle;
mod receiver;
mod room;
pub mod session;
mod state;
mod typing;

pub use pixelchat_media::{ImageTranscoder, TranscodeError, Transcoded};
pub use pixelchat_protocol::{
    ClientCommand, ClientMessage, ConnectionStatus, InlineImage, Message, MessageKind,
    PresenceKind, ServerMessage, TypingPeer,
};

pub use adapter::{Channel, ChannelAdapter, Dispatch, RemoteEnd, TransportEvent};
pub use config::SessionConfig;
pub use connection::{Connection, ReconnectPolicy, spawn_connection};
pub use error::SessionError;
pub use handle::RoomHandle;
pub use receiver::join_room;
pub use room::RoomIdentity;
pub use session::{Outbound, RoomSession, SessionState};
pub use state::RoomSnapshot;
pub use typing::{TypingCoalescer, TypingIntent};
