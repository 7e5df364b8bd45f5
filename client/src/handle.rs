use pixelchat_protocol::{ConnectionStatus, Message};
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::SessionError;
use crate::state::RoomSnapshot;
use crate::typing::{TypingCoalescer, TypingIntent};

/// User intents queued for the session loop
#[derive(Debug)]
pub(crate) enum Intent {
    SendText(String),
    SendImage {
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    SetTyping(TypingIntent),
    Leave,
}

/// Cloneable handle to a running room session
///
/// Intents are queued to the session loop; state is read from the latest
/// published [`RoomSnapshot`]. Dropping every handle leaves the room.
#[derive(Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<Intent>,
    snapshot: watch::Receiver<RoomSnapshot>,
    coalescer: TypingCoalescer,
}

impl RoomHandle {
    pub(crate) fn new(
        tx: mpsc::UnboundedSender<Intent>,
        snapshot: watch::Receiver<RoomSnapshot>,
    ) -> Self {
        Self {
            tx,
            snapshot,
            coalescer: TypingCoalescer,
        }
    }

    fn send(&self, intent: Intent) -> Result<(), SessionError> {
        self.tx
            .send(intent)
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Send a chat message. Blank text is ignored.
    pub fn send_text(&self, text: &str) -> Result<(), SessionError> {
        self.send(Intent::SendText(text.to_string()))
    }

    /// Shrink and send a picture
    ///
    /// Resolves once the image was queued for the transport, or with
    /// `InvalidImage` when it could not be decoded.
    pub async fn send_image(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Intent::SendImage { bytes, reply })?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Report the current contents of the input box
    pub fn set_typing_status(&self, text: &str) -> Result<(), SessionError> {
        self.send(Intent::SetTyping(self.coalescer.on_input_change(text)))
    }

    pub fn leave_room(&self) -> Result<(), SessionError> {
        self.send(Intent::Leave)
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.snapshot.borrow().messages.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.snapshot.borrow().connection_status
    }

    /// Watch snapshots as they are published
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session loop has stopped
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
