//! The session loop: single owner and writer of a RoomSession

use pixelchat_media::{TranscodeError, Transcoded};
use pixelchat_protocol::{ClientMessage, ConnectionStatus};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, MissedTickBehavior};

use crate::adapter::{Channel, ChannelAdapter, Dispatch, TransportEvent};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::handle::{Intent, RoomHandle};
use crate::room::RoomIdentity;
use crate::session::{Outbound, RoomSession};
use crate::state::RoomSnapshot;

/// Join `identity`'s room over `channel` and start the session loop
///
/// Resolves once the server acknowledged the join. Fails with
/// `JoinRejected` when the server refuses and with `ChannelUnavailable`
/// when the channel closes or stays silent past `join_timeout`.
pub async fn join_room(
    channel: Channel,
    identity: RoomIdentity,
    config: SessionConfig,
) -> Result<RoomHandle, SessionError> {
    let mut session = RoomSession::new(identity, &config);
    let mut adapter = ChannelAdapter::new(channel, session.identity());

    adapter
        .join()
        .await
        .map_err(|e| SessionError::ChannelUnavailable(e.to_string()))?;

    tokio::time::timeout(config.join_timeout, await_join(&mut adapter, &mut session))
        .await
        .map_err(|_| {
            SessionError::ChannelUnavailable("timed out waiting for join acknowledgement".into())
        })??;

    let (tx, intents) = mpsc::unbounded_channel();
    let (snapshots, snapshot_rx) = watch::channel(session.snapshot());
    let (completions_tx, completions) = mpsc::unbounded_channel();

    let receiver = Receiver {
        published: session.revision(),
        outgoing: adapter.sender(),
        session,
        adapter,
        intents,
        snapshots,
        completions_tx,
        completions,
        sweep_interval: config.typing_sweep_interval(),
        flush_timeout: config.join_timeout,
    };
    tokio::spawn(receiver.run());

    Ok(RoomHandle::new(tx, snapshot_rx))
}

async fn await_join(
    adapter: &mut ChannelAdapter,
    session: &mut RoomSession,
) -> Result<(), SessionError> {
    loop {
        let Some(event) = adapter.recv().await else {
            return Err(SessionError::ChannelUnavailable(
                "transport closed before join".into(),
            ));
        };

        match adapter.dispatch(session, event) {
            Dispatch::Joined => return Ok(()),
            Dispatch::JoinRejected(reason) => {
                tracing::warn!(room = session.identity().room_id(), reason = %reason, "Join rejected");
                return Err(SessionError::JoinRejected(reason));
            }
            _ => {}
        }
    }
}

/// A finished transcode posted back into the loop
struct Completion {
    result: Result<Transcoded, TranscodeError>,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Owns the session and serializes every mutation of it
struct Receiver {
    session: RoomSession,
    adapter: ChannelAdapter,
    outgoing: mpsc::Sender<ClientMessage>,
    intents: mpsc::UnboundedReceiver<Intent>,
    snapshots: watch::Sender<RoomSnapshot>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    sweep_interval: Duration,
    flush_timeout: Duration,
    published: u64,
}

impl Receiver {
    /// Run until the room is left, then give the transport a bounded chance
    /// to take whatever is still queued (the leave command included)
    async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut transport_open = true;

        loop {
            tokio::select! {
                intent = self.intents.recv() => match intent {
                    Some(intent) => self.handle_intent(intent),
                    None => {
                        tracing::debug!(room = self.session.identity().room_id(), "All handles dropped");
                        self.handle_intent(Intent::Leave);
                    }
                },
                event = self.adapter.recv(), if transport_open => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        tracing::warn!(room = self.session.identity().room_id(), "Transport closed");
                        transport_open = false;
                        self.session
                            .on_connection_status_changed(ConnectionStatus::Disconnected);
                    }
                },
                permit = self.outgoing.clone().reserve_owned(), if self.adapter.has_backlog() => {
                    let flushed = permit
                        .map_err(|_| anyhow::anyhow!("Channel closed"))
                        .and_then(|permit| self.adapter.flush(permit));
                    if let Err(e) = flushed {
                        tracing::warn!(room = self.session.identity().room_id(), error = %e, "Failed to send");
                    }
                }
                Some(completion) = self.completions.recv() => {
                    self.handle_completion(completion);
                }
                _ = sweep.tick() => {
                    self.session.prune_typing(Instant::now().into_std());
                }
            }

            self.publish();

            if self.session.is_left() {
                break;
            }
        }

        let Receiver {
            mut adapter,
            intents,
            flush_timeout,
            ..
        } = self;
        drop(intents);

        if adapter.has_backlog() {
            adapter.drain(flush_timeout).await;
        }
    }

    fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::SendText(text) => {
                if let Some(outbound) = self.session.send_text(&text) {
                    let _ = self.transmit(outbound);
                }
            }
            Intent::SendImage { bytes, reply } => {
                let transcoder = self.session.transcoder();
                let completions = self.completions_tx.clone();

                tokio::task::spawn_blocking(move || {
                    let result = transcoder.transcode(&bytes);
                    if completions.send(Completion { result, reply }).is_err() {
                        tracing::debug!("Session ended before image was ready");
                    }
                });
            }
            Intent::SetTyping(intent) => {
                if let Some(outbound) = self.session.set_typing_status(intent) {
                    let _ = self.transmit(outbound);
                }
            }
            Intent::Leave => {
                if let Some(outbound) = self.session.leave_room() {
                    let _ = self.transmit(outbound);
                }
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion { result, reply } = completion;

        let outcome = match self.session.image_ready(result) {
            Ok(Some(outbound)) => self.transmit(outbound),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        // The caller may have stopped waiting
        let _ = reply.send(outcome);
    }

    fn handle_event(&mut self, event: TransportEvent) {
        if let Dispatch::JoinRejected(reason) = self.adapter.dispatch(&mut self.session, event) {
            tracing::warn!(
                room = self.session.identity().room_id(),
                reason = %reason,
                "Rejoin rejected"
            );
        }
    }

    /// Queue an intent for the transport without waiting for capacity.
    /// Failures are not retried here.
    fn transmit(&mut self, outbound: Outbound) -> Result<(), SessionError> {
        self.adapter.send(outbound).map_err(|e| {
            tracing::warn!(room = self.session.identity().room_id(), error = %e, "Failed to send");
            SessionError::ChannelUnavailable(e.to_string())
        })
    }

    fn publish(&mut self) {
        let revision = self.session.revision();
        if revision != self.published {
            self.published = revision;
            self.snapshots.send_replace(self.session.snapshot());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{RemoteEnd, TransportEvent};
    use crate::session::SessionState;
    use pixelchat_protocol::{
        ClientCommand, ClientMessage, Message, MessageKind, PresenceKind, ServerMessage,
    };
    use std::io::Cursor;

    fn identity() -> RoomIdentity {
        RoomIdentity::new("lobby", "Alice").unwrap()
    }

    async fn expect_command(remote: &mut RemoteEnd) -> ClientCommand {
        let message: ClientMessage = remote.outgoing.recv().await.expect("command");
        assert_eq!(message.room_id, "lobby");
        message.command
    }

    async fn server(remote: &RemoteEnd, message: ServerMessage) {
        remote
            .incoming
            .send(TransportEvent::Message(message))
            .await
            .unwrap();
    }

    /// Join with a scripted server that acknowledges as `me`
    async fn joined() -> (RoomHandle, RemoteEnd) {
        let (channel, mut remote) = Channel::pair(16);
        let join = tokio::spawn(join_room(channel, identity(), SessionConfig::default()));

        assert_eq!(
            expect_command(&mut remote).await,
            ClientCommand::JoinRoom {
                display_name: "Alice".to_string()
            }
        );
        remote.incoming.send(TransportEvent::Connected).await.unwrap();
        server(&remote, ServerMessage::JoinAck { user_id: "me".into() }).await;

        (join.await.unwrap().unwrap(), remote)
    }

    fn chat(id: &str, sender: &str, text: &str) -> ServerMessage {
        ServerMessage::Message(Message {
            id: id.to_string(),
            sender_id: sender.to_string(),
            sender_name: sender.to_string(),
            kind: MessageKind::Text,
            text: Some(text.to_string()),
            image: None,
            timestamp: 0,
            is_system_join_event: false,
            user_count: None,
        })
    }

    async fn wait_for(
        handle: &RoomHandle,
        mut ready: impl FnMut(&RoomSnapshot) -> bool,
    ) -> RoomSnapshot {
        let mut rx = handle.subscribe();
        let snapshot = rx.wait_for(|s| ready(s)).await.unwrap();
        snapshot.clone()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([9, 9, 9, 255]));
        let mut out = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[tokio::test]
    async fn test_join_handshake() {
        let (handle, _remote) = joined().await;
        let snapshot = handle.snapshot();

        assert_eq!(snapshot.state, SessionState::Joined);
        assert_eq!(snapshot.connection_status, ConnectionStatus::Connected);
        assert_eq!(snapshot.self_user_id(), Some("me"));
    }

    #[tokio::test]
    async fn test_join_rejected() {
        let (channel, mut remote) = Channel::pair(16);
        let join = tokio::spawn(join_room(channel, identity(), SessionConfig::default()));

        expect_command(&mut remote).await;
        server(&remote, ServerMessage::JoinRejected { reason: "banned".into() }).await;

        assert!(matches!(
            join.await.unwrap(),
            Err(SessionError::JoinRejected(reason)) if reason == "banned"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_timeout() {
        let (channel, _remote) = Channel::pair(16);
        let result = join_room(channel, identity(), SessionConfig::default()).await;

        assert!(matches!(result, Err(SessionError::ChannelUnavailable(_))));
    }

    #[tokio::test]
    async fn test_join_transport_closed() {
        let (channel, remote) = Channel::pair(16);
        let RemoteEnd { outgoing, incoming } = remote;
        drop(incoming);

        let result = join_room(channel, identity(), SessionConfig::default()).await;
        assert!(matches!(result, Err(SessionError::ChannelUnavailable(_))));
        drop(outgoing);
    }

    #[tokio::test]
    async fn test_text_appears_only_when_relayed() {
        let (handle, mut remote) = joined().await;

        handle.send_text("   ").unwrap();
        handle.send_text("hello").unwrap();
        assert_eq!(
            expect_command(&mut remote).await,
            ClientCommand::SendMessage {
                text: "hello".to_string()
            }
        );
        assert!(handle.messages().is_empty());

        server(&remote, chat("m1", "bob", "before yours")).await;
        server(&remote, chat("m2", "me", "hello")).await;

        let snapshot = wait_for(&handle, |s| s.messages.len() == 2).await;
        assert_eq!(snapshot.messages[0].id, "m1");
        assert!(snapshot.is_own(&snapshot.messages[1]));
        assert!(!snapshot.is_own(&snapshot.messages[0]));
    }

    #[tokio::test]
    async fn test_send_image() {
        let (handle, mut remote) = joined().await;

        handle.send_image(png(300, 100)).await.unwrap();

        match expect_command(&mut remote).await {
            ClientCommand::SendImage { image } => {
                let bytes = image.decode().unwrap();
                let decoded = image::load_from_memory(&bytes).unwrap();
                assert_eq!((decoded.width(), decoded.height()), (128, 43));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_image_reported() {
        let (handle, mut remote) = joined().await;

        let result = handle.send_image(b"not a picture".to_vec()).await;
        assert!(matches!(result, Err(SessionError::InvalidImage(_))));

        handle.send_text("still here").unwrap();
        assert_eq!(
            expect_command(&mut remote).await,
            ClientCommand::SendMessage {
                text: "still here".to_string()
            }
        );

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, SessionState::Joined);
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test]
    async fn test_typing_intents() {
        let (handle, mut remote) = joined().await;

        handle.set_typing_status("he").unwrap();
        handle.set_typing_status("").unwrap();

        assert_eq!(
            expect_command(&mut remote).await,
            ClientCommand::Typing {
                is_typing: true,
                text: "he".to_string()
            }
        );
        assert_eq!(
            expect_command(&mut remote).await,
            ClientCommand::Typing {
                is_typing: false,
                text: String::new()
            }
        );
        assert!(handle.snapshot().typing_users.is_empty());
    }

    #[tokio::test]
    async fn test_leave_twice_sends_one_leave() {
        let (handle, mut remote) = joined().await;

        handle.leave_room().unwrap();
        let _ = handle.leave_room();
        handle.closed().await;

        let mut commands = Vec::new();
        while let Some(message) = remote.outgoing.recv().await {
            commands.push(message.command);
        }

        assert_eq!(commands, vec![ClientCommand::LeaveRoom]);
        assert_eq!(handle.snapshot().state, SessionState::Left);
        assert!(matches!(handle.send_text("hi"), Err(SessionError::SessionClosed)));
    }

    /// A joined session loop that the test drives by hand
    fn joined_receiver() -> (Receiver, RemoteEnd, watch::Receiver<RoomSnapshot>) {
        let (channel, remote) = Channel::pair(16);
        let config = SessionConfig::default();
        let mut session = RoomSession::new(identity(), &config);
        session.on_join_ack("me");

        let adapter = ChannelAdapter::new(channel, session.identity());
        let (_tx, intents) = mpsc::unbounded_channel();
        let (snapshots, snapshot_rx) = watch::channel(session.snapshot());
        let (completions_tx, completions) = mpsc::unbounded_channel();

        let receiver = Receiver {
            published: session.revision(),
            outgoing: adapter.sender(),
            session,
            adapter,
            intents,
            snapshots,
            completions_tx,
            completions,
            sweep_interval: config.typing_sweep_interval(),
            flush_timeout: config.join_timeout,
        };
        (receiver, remote, snapshot_rx)
    }

    #[tokio::test]
    async fn test_events_after_leave_not_applied() {
        let (mut receiver, mut remote, snapshots) = joined_receiver();

        receiver.handle_intent(Intent::Leave);
        receiver.publish();
        let revision = receiver.session.revision();

        remote
            .incoming
            .send(TransportEvent::Message(chat("m1", "bob", "late")))
            .await
            .unwrap();
        let event = receiver.adapter.recv().await.unwrap();
        receiver.handle_event(event);
        receiver.publish();

        assert_eq!(receiver.session.revision(), revision);
        let snapshot = snapshots.borrow().clone();
        assert_eq!(snapshot.state, SessionState::Left);
        assert!(snapshot.messages.is_empty());
        assert_eq!(expect_command(&mut remote).await, ClientCommand::LeaveRoom);
    }

    #[tokio::test]
    async fn test_undrained_transport_does_not_stall_session() {
        let (handle, mut remote) = joined().await;

        // Far more typing updates than the channel holds, none of them read
        for len in 1..=70 {
            handle.set_typing_status(&"a".repeat(len)).unwrap();
        }
        server(&remote, chat("m1", "bob", "still listening")).await;

        let applied =
            tokio::time::timeout(Duration::from_secs(2), wait_for(&handle, |s| s.messages.len() == 1))
                .await;
        assert!(applied.is_ok());

        handle.leave_room().unwrap();
        let left = tokio::time::timeout(
            Duration::from_secs(2),
            wait_for(&handle, |s| s.state == SessionState::Left),
        )
        .await;
        assert!(left.is_ok());

        let mut commands = Vec::new();
        while let Some(message) = remote.outgoing.recv().await {
            commands.push(message.command);
        }
        assert!(commands.len() < 70);
        assert_eq!(
            &commands[commands.len() - 2..],
            &[
                ClientCommand::Typing {
                    is_typing: true,
                    text: "a".repeat(70)
                },
                ClientCommand::LeaveRoom,
            ]
        );
        handle.closed().await;
    }

    #[tokio::test]
    async fn test_dropping_handles_leaves() {
        let (handle, mut remote) = joined().await;
        drop(handle);

        assert_eq!(expect_command(&mut remote).await, ClientCommand::LeaveRoom);
        assert!(remote.outgoing.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_clears_typing_keeps_log() {
        let (handle, remote) = joined().await;

        server(&remote, chat("m1", "bob", "hi")).await;
        server(
            &remote,
            ServerMessage::Typing {
                user_id: "carol".into(),
                display_name: "Carol".into(),
                is_typing: true,
                text: "hey".into(),
            },
        )
        .await;
        wait_for(&handle, |s| s.typing_users.contains_key("carol")).await;

        remote.incoming.send(TransportEvent::Disconnected).await.unwrap();

        let snapshot = wait_for(&handle, |s| !s.is_connected()).await;
        assert!(snapshot.typing_users.is_empty());
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.state, SessionState::Joined);
    }

    #[tokio::test]
    async fn test_transport_closed_marks_disconnected() {
        let (handle, remote) = joined().await;
        drop(remote);

        let snapshot = wait_for(&handle, |s| {
            s.connection_status == ConnectionStatus::Disconnected
        })
        .await;
        assert_eq!(snapshot.state, SessionState::Joined);
    }

    #[tokio::test]
    async fn test_presence_narration() {
        let (handle, remote) = joined().await;

        server(
            &remote,
            ServerMessage::System {
                text: "Bob joined the room.".into(),
                user_count: Some(1),
                presence: PresenceKind::Joined,
            },
        )
        .await;

        let snapshot = wait_for(&handle, |s| !s.messages.is_empty()).await;
        assert_eq!(
            snapshot.messages[0].occupancy_note().as_deref(),
            Some("They're the only one here.")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_typing_peer_evicted() {
        let (handle, remote) = joined().await;

        server(
            &remote,
            ServerMessage::Typing {
                user_id: "bob".into(),
                display_name: "Bob".into(),
                is_typing: true,
                text: "hel".into(),
            },
        )
        .await;
        wait_for(&handle, |s| s.typing_users.contains_key("bob")).await;

        tokio::time::sleep(Duration::from_secs(8)).await;

        let snapshot = wait_for(&handle, |s| s.typing_users.is_empty()).await;
        assert!(snapshot.typing_users.is_empty());
    }
}
