//! The push channel: one WebSocket to the annotation backend.
//!
//! Outgoing [`ClientEvent`]s are queued on an unbounded channel and written
//! by a background task; incoming frames are parsed into
//! [`ServerPush`](crate::protocol::ServerPush)es and posted to the session's
//! inbox. The task reconnects with exponential backoff and stops when the
//! [`SocketChannel`] handle is dropped.
//!
//! Frames are bare `{"event", "data"}` JSON text messages. There is no
//! Engine.IO handshake or Socket.IO packet framing, so a Flask-SocketIO
//! namespace cannot be reached directly; the backend must expose a plain
//! WebSocket endpoint (default `/ws`) speaking this envelope.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::protocol::{self, ClientEvent};
use crate::session::{Inbound, Inbox};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("push channel is closed")]
    Closed,

    #[error("failed to encode {event}: {source}")]
    Encode {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Anything that can carry requests to the backend.
pub trait EventSink {
    fn send(&self, event: ClientEvent) -> Result<(), ChannelError>;
}

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Handle to the background socket task. Dropping it tears the task down.
pub struct SocketChannel {
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl SocketChannel {
    /// Start the socket task on `runtime`. Pushes and connection state
    /// changes are posted to `inbox`.
    pub fn spawn(runtime: &Handle, url: String, inbox: Inbox, reconnect: ReconnectConfig) -> Self {
        let (outgoing, queue) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        runtime.spawn(run(url, queue, inbox, reconnect, cancel.clone()));
        Self { outgoing, cancel }
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl EventSink for SocketChannel {
    fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        let name = event.name();
        let text = event.to_json().map_err(|source| ChannelError::Encode { event: name, source })?;
        self.outgoing.send(text).map_err(|_| ChannelError::Closed)?;
        tracing::debug!(event = name, "Queued request");
        Ok(())
    }
}

/// Connect, retrying with backoff. `None` once cancelled.
async fn connect_with_backoff(url: &str, config: &ReconnectConfig, cancel: &CancellationToken) -> Option<Socket> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = connect_async(url) => {
                match result {
                    Ok((socket, _response)) => {
                        tracing::info!(attempt, "Connected to {url}");
                        return Some(socket);
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            delay_ms = delay.as_millis() as u64,
                            "Connect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = next_delay(delay, config);
    }
}

/// Why a connected session ended.
enum Ended {
    Cancelled,
    QueueClosed,
    Dropped,
}

async fn pump(
    socket: Socket,
    queue: &mut mpsc::UnboundedReceiver<String>,
    inbox: &Inbox,
    cancel: &CancellationToken,
) -> Ended {
    let (mut write, mut read) = socket.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                return Ended::Cancelled;
            }
            next = queue.recv() => {
                let Some(text) = next else {
                    return Ended::QueueClosed;
                };
                if let Err(e) = write.send(Message::Text(text)).await {
                    tracing::warn!(error = %e, "Failed to send request");
                    return Ended::Dropped;
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match protocol::parse_push(&text) {
                        Ok(push) => {
                            tracing::debug!(event = ?push.event, status = push.status, "Push received");
                            inbox.post(Inbound::Push(push));
                        }
                        Err(e) => tracing::warn!(error = %e, "Ignoring unreadable push"),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ended::Dropped,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Push channel error");
                        return Ended::Dropped;
                    }
                }
            }
        }
    }
}

async fn run(
    url: String,
    mut queue: mpsc::UnboundedReceiver<String>,
    inbox: Inbox,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    loop {
        let Some(socket) = connect_with_backoff(&url, &reconnect, &cancel).await else {
            break;
        };
        inbox.post(Inbound::Connected);

        match pump(socket, &mut queue, &inbox, &cancel).await {
            Ended::Cancelled | Ended::QueueClosed => break,
            Ended::Dropped => {
                tracing::info!("Push channel dropped; reconnecting");
                inbox.post(Inbound::Disconnected);
            }
        }
    }
    tracing::info!("Push channel closed");
}
