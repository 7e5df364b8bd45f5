use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use pixelchat_protocol::{ClientMessage, parse_server_message};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::adapter::{Channel, RemoteEnd, TransportEvent};
use crate::config::SessionConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Slots in each direction between the socket task and the session
const CHANNEL_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: Option<usize>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the attempt following one that waited `delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay)
    }
}

/// Connect to a room server and run the socket on its own task
///
/// Reconnects follow `config.reconnect`. The returned [`Channel`] reports
/// `Connected`/`Disconnected` around reconnects and closes once
/// reconnecting gives up. The task ends after the session drops its side
/// and the close handshake has been sent, so awaiting the handle flushes
/// a final `leave-room`.
pub async fn spawn_connection(
    url: &str,
    config: &SessionConfig,
) -> Result<(Channel, JoinHandle<()>)> {
    let connection = Connection::connect(url.to_string(), config.reconnect.clone()).await?;
    let (channel, remote) = Channel::pair(CHANNEL_BUFFER);

    let task = tokio::spawn(connection.run(remote));
    Ok((channel, task))
}

/// Websocket to the room server
///
/// Remembers the last join so it can be replayed after a reconnect.
pub struct Connection {
    ws_stream: WsStream,
    url: String,
    reconnect_policy: ReconnectPolicy,
    join: Option<ClientMessage>,
}

impl Connection {
    pub async fn connect(url: String, policy: ReconnectPolicy) -> Result<Self> {
        let ws_stream = Self::establish_connection(&url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;

        Ok(Self {
            ws_stream,
            url,
            reconnect_policy: policy,
            join: None,
        })
    }

    async fn establish_connection(url: &str) -> Result<WsStream> {
        let (ws_stream, _) = connect_async(url)
            .await
            .with_context(|| "WebSocket handshake failed")?;
        Ok(ws_stream)
    }

    async fn reconnect(&mut self) -> Result<()> {
        let mut delay = self.reconnect_policy.initial_delay;
        let mut attempt = 1;

        loop {
            if let Some(max) = self.reconnect_policy.max_attempts
                && attempt > max {
                    anyhow::bail!("Failed to reconnect after {} attempts to {}", max, self.url);
                }

            tokio::time::sleep(delay).await;

            match Self::establish_connection(&self.url).await {
                Ok(ws_stream) => {
                    self.ws_stream = ws_stream;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = ?self.reconnect_policy.max_attempts,
                        error = %e,
                        "Reconnection attempt failed"
                    );
                    attempt += 1;
                    delay = self.reconnect_policy.next_delay(delay);
                }
            }
        }
    }

    /// Pump frames both ways until the session hangs up or reconnecting fails
    pub async fn run(mut self, remote: RemoteEnd) {
        let RemoteEnd {
            mut outgoing,
            incoming,
        } = remote;

        if incoming.send(TransportEvent::Connected).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                command = outgoing.recv() => {
                    let Some(command) = command else {
                        if let Err(e) = self.ws_stream.close(None).await {
                            tracing::debug!(error = %e, "Close handshake failed");
                        }
                        return;
                    };

                    if let Err(e) = self.send(&command).await {
                        tracing::warn!(error = %e, "Send failed, attempting reconnect");
                        if !self.recover(&incoming).await {
                            return;
                        }
                        // The join was already replayed by recover
                        if !command.is_join()
                            && let Err(e) = self.send(&command).await
                        {
                            tracing::error!(error = %e, "Send failed after reconnect");
                        }
                    }
                }
                frame = self.ws_stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => match parse_server_message(&text) {
                            Ok(message) => {
                                if incoming.send(TransportEvent::Message(message)).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, frame = %text, "Failed to parse server frame");
                            }
                        },
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = self.ws_stream.send(Message::Pong(data)).await {
                                tracing::warn!(error = %e, "Failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            if !self.recover(&incoming).await {
                                return;
                            }
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => {
                            tracing::error!(error = %e, "WebSocket error, attempting reconnect");
                            if !self.recover(&incoming).await {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Report the drop, reconnect, and rejoin. False when giving up.
    async fn recover(&mut self, incoming: &mpsc::Sender<TransportEvent>) -> bool {
        if incoming.send(TransportEvent::Disconnected).await.is_err() {
            return false;
        }

        if let Err(e) = self.reconnect().await {
            tracing::error!(error = %e, "Connection lost and reconnection failed");
            return false;
        }

        if incoming.send(TransportEvent::Connected).await.is_err() {
            return false;
        }

        if let Some(join) = self.join.clone()
            && let Err(e) = self.send(&join).await
        {
            tracing::error!(error = %e, "Failed to rejoin after reconnect");
        }
        true
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = message
            .to_wire_format()
            .context("Failed to encode message")?;

        if message.is_join() {
            self.join = Some(message.clone());
        }

        self.ws_stream
            .send(Message::Text(text))
            .await
            .context("Failed to send message")?;
        Ok(())
    }
}
