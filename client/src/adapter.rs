//! ChannelAdapter - glue between a RoomSession and the transport

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, anyhow};
use pixelchat_protocol::{ClientCommand, ClientMessage, ConnectionStatus, ServerMessage, TypingPeer};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::room::RoomIdentity;
use crate::session::{Outbound, RoomSession};

/// Something the transport reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(ServerMessage),
}

/// The session side of an opaque bidirectional transport
///
/// Whatever moves frames (the websocket [`Connection`](crate::connection),
/// a test harness, a browser bridge) holds the matching [`RemoteEnd`].
#[derive(Debug)]
pub struct Channel {
    outgoing: mpsc::Sender<ClientMessage>,
    incoming: mpsc::Receiver<TransportEvent>,
}

/// The transport side of a [`Channel`]
#[derive(Debug)]
pub struct RemoteEnd {
    /// Commands the session wants delivered, in order
    pub outgoing: mpsc::Receiver<ClientMessage>,
    /// Events to hand to the session, in delivery order
    pub incoming: mpsc::Sender<TransportEvent>,
}

impl Channel {
    pub fn new(
        outgoing: mpsc::Sender<ClientMessage>,
        incoming: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outgoing, incoming }
    }

    /// A connected channel/remote pair with `buffer` slots each way
    pub fn pair(buffer: usize) -> (Self, RemoteEnd) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(buffer);
        let (incoming_tx, incoming_rx) = mpsc::channel(buffer);

        (
            Self::new(outgoing_tx, incoming_rx),
            RemoteEnd {
                outgoing: outgoing_rx,
                incoming: incoming_tx,
            },
        )
    }
}

/// What dispatching a transport event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Joined,
    JoinRejected(String),
    /// Understood but irrelevant to the session
    Ignored,
    /// Arrived after leaving the room
    Dropped,
}

/// Maps session intents to transport commands and transport events to
/// session calls, one to one
///
/// Sending never waits for transport capacity. Commands the channel cannot
/// take yet wait in a local backlog, where consecutive typing updates
/// collapse into the latest one.
#[derive(Debug)]
pub struct ChannelAdapter {
    room_id: String,
    display_name: String,
    channel: Channel,
    backlog: VecDeque<ClientMessage>,
}

impl ChannelAdapter {
    pub fn new(channel: Channel, identity: &RoomIdentity) -> Self {
        Self {
            room_id: identity.room_id().to_string(),
            display_name: identity.display_name().to_string(),
            channel,
            backlog: VecDeque::new(),
        }
    }

    /// Ask the server to let us into the room
    pub async fn join(&self) -> Result<()> {
        let join = ClientCommand::JoinRoom {
            display_name: self.display_name.clone(),
        };
        self.channel
            .outgoing
            .send(ClientMessage::new(self.room_id.clone(), join))
            .await
            .map_err(|_| anyhow!("Channel closed"))
    }

    /// Deliver one session intent as one transport command
    pub fn send(&mut self, outbound: Outbound) -> Result<()> {
        let message = ClientMessage::new(self.room_id.clone(), command_for(outbound));

        let replaces_pending_typing = matches!(message.command, ClientCommand::Typing { .. })
            && matches!(
                self.backlog.back(),
                Some(ClientMessage {
                    command: ClientCommand::Typing { .. },
                    ..
                })
            );
        if replaces_pending_typing {
            self.backlog.pop_back();
        }
        self.backlog.push_back(message);

        self.pump()
    }

    /// Commands still waiting for transport capacity
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn has_backlog(&self) -> bool {
        !self.backlog.is_empty()
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<ClientMessage> {
        self.channel.outgoing.clone()
    }

    /// Spend a reserved slot on the oldest pending command, then move as much
    /// of the rest as fits
    pub(crate) fn flush(&mut self, permit: mpsc::OwnedPermit<ClientMessage>) -> Result<()> {
        if let Some(message) = self.backlog.pop_front() {
            permit.send(message);
        }
        self.pump()
    }

    /// Wait up to `limit` for the backlog to reach the transport
    pub async fn drain(&mut self, limit: Duration) {
        let outgoing = self.channel.outgoing.clone();
        let backlog = &mut self.backlog;
        let flush = async move {
            while let Some(message) = backlog.pop_front() {
                if outgoing.send(message).await.is_err() {
                    backlog.clear();
                }
            }
        };

        if tokio::time::timeout(limit, flush).await.is_err() {
            tracing::warn!(
                room = %self.room_id,
                pending = self.backlog.len(),
                "Transport did not take pending commands"
            );
            self.backlog.clear();
        }
    }

    fn pump(&mut self) -> Result<()> {
        while let Some(message) = self.backlog.pop_front() {
            match self.channel.outgoing.try_send(message) {
                Ok(()) => {}
                Err(TrySendError::Full(message)) => {
                    self.backlog.push_front(message);
                    break;
                }
                Err(TrySendError::Closed(_)) => {
                    self.backlog.clear();
                    return Err(anyhow!("Channel closed"));
                }
            }
        }
        Ok(())
    }

    /// Next transport event, `None` once the transport is gone
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.channel.incoming.recv().await
    }

    /// Apply one transport event to the session
    pub fn dispatch(&self, session: &mut RoomSession, event: TransportEvent) -> Dispatch {
        if let Err(e) = session.ensure_active() {
            tracing::debug!(room = %self.room_id, event = ?event, error = %e, "Dropping event");
            return Dispatch::Dropped;
        }

        match event {
            TransportEvent::Connected => {
                session.on_connection_status_changed(ConnectionStatus::Connected);
            }
            TransportEvent::Disconnected => {
                session.on_connection_status_changed(ConnectionStatus::Disconnected);
            }
            TransportEvent::Message(message) => return self.dispatch_message(session, message),
        }

        Dispatch::Applied
    }

    fn dispatch_message(&self, session: &mut RoomSession, message: ServerMessage) -> Dispatch {
        match message {
            ServerMessage::JoinAck { user_id } => {
                session.on_join_ack(&user_id);
                return Dispatch::Joined;
            }
            ServerMessage::JoinRejected { reason } => return Dispatch::JoinRejected(reason),
            ServerMessage::Message(message) => {
                session.on_message_received(message);
            }
            ServerMessage::Typing {
                user_id,
                display_name,
                is_typing,
                text,
            } => {
                let peer = is_typing.then_some(TypingPeer {
                    display_name,
                    preview_text: text,
                });
                session.on_typing_update(&user_id, peer);
            }
            ServerMessage::System {
                text,
                user_count,
                presence,
            } => {
                session.on_presence_system_event(&text, user_count, presence);
            }
            ServerMessage::Raw(raw) => {
                tracing::trace!(room = %self.room_id, raw = %raw, "Ignoring unknown event");
                return Dispatch::Ignored;
            }
        }

        Dispatch::Applied
    }
}

fn command_for(outbound: Outbound) -> ClientCommand {
    match outbound {
        Outbound::Text(text) => ClientCommand::SendMessage { text },
        Outbound::Image(image) => ClientCommand::SendImage { image },
        Outbound::Typing(intent) => ClientCommand::Typing {
            is_typing: intent.is_typing,
            text: intent.preview_text,
        },
        Outbound::Leave => ClientCommand::LeaveRoom,
    }
}
