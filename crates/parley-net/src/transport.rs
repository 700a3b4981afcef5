//! Transport handle and broker handshake.
//!
//! [`Transport::connect`] opens exactly one WebSocket, performs the
//! `CONNECT`/`CONNECTED` exchange within the handshake timeout, and
//! spawns the per-connection I/O task. External code talks to the task
//! through typed command and event channels.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use parley_shared::constants::{
    DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_HEARTBEAT_MISS_THRESHOLD, DEFAULT_HEARTBEAT_SECS,
    TRANSPORT_CHANNEL_CAPACITY,
};
use parley_shared::envelope::{Envelope, Op};
use parley_shared::protocol::WireFrame;
use parley_shared::{LinkError, SendError};

use crate::link::run_link;

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands sent *into* the I/O task.
#[derive(Debug)]
pub(crate) enum TransportCommand {
    /// Publish a chat frame to a broker destination.
    Publish {
        destination: String,
        frame: WireFrame,
    },
    /// Ask the broker to deliver frames published to a destination.
    Subscribe(String),
    /// Gracefully close the socket and end the task.
    Disconnect,
}

/// Events sent *from* the I/O task to the session.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A chat frame arrived on a subscription.
    Frame {
        destination: Option<String>,
        frame: WireFrame,
    },
    /// The link died. The task has already exited; reconnecting is the
    /// caller's decision.
    Down(LinkError),
}

/// Timing knobs for one connection. Interval values are configuration,
/// not contract.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Bidirectional heartbeat period.
    pub heartbeat: Duration,
    /// Missed periods of silence before the link is declared lost.
    pub heartbeat_miss_threshold: u32,
    /// Bound on the dial + `CONNECT`/`CONNECTED` exchange.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            heartbeat_miss_threshold: DEFAULT_HEARTBEAT_MISS_THRESHOLD,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Handle to one live broker connection.
///
/// Publish and subscribe are non-blocking command sends; the handle never
/// waits for the socket. Dropping the handle asks the task to close.
#[derive(Debug)]
pub struct Transport {
    cmd_tx: mpsc::Sender<TransportCommand>,
}

impl Transport {
    /// Open a connection and complete the broker handshake.
    ///
    /// Returns the handle plus the event receiver. Exactly one underlying
    /// socket is opened per call. Failure taxonomy: `Unreachable` (dial),
    /// `HandshakeRejected` (broker `ERROR` during handshake), `Timeout`.
    pub async fn connect(
        endpoint: &str,
        credential: &str,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), LinkError> {
        let ws = tokio::time::timeout(
            config.handshake_timeout,
            establish(endpoint, credential),
        )
        .await
        .map_err(|_| LinkError::Timeout)??;

        info!(endpoint, "Broker handshake complete");

        let (cmd_tx, cmd_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(TRANSPORT_CHANNEL_CAPACITY);

        tokio::spawn(run_link(ws, cmd_rx, event_tx, config));

        Ok((Self { cmd_tx }, event_rx))
    }

    /// Publish a chat frame to `destination`. Non-blocking; fails fast if
    /// the I/O task is gone or its queue is full.
    pub fn publish(&self, destination: impl Into<String>, frame: WireFrame) -> Result<(), SendError> {
        self.cmd_tx
            .try_send(TransportCommand::Publish {
                destination: destination.into(),
                frame,
            })
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    /// Subscribe to a broker destination.
    pub fn subscribe(&self, destination: impl Into<String>) -> Result<(), SendError> {
        self.cmd_tx
            .try_send(TransportCommand::Subscribe(destination.into()))
            .map_err(|e| SendError::Transport(e.to_string()))
    }

    /// Gracefully close the connection.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(TransportCommand::Disconnect).await;
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.try_send(TransportCommand::Disconnect);
    }
}

/// Dial the endpoint and run the `CONNECT`/`CONNECTED` exchange.
async fn establish(endpoint: &str, credential: &str) -> Result<WsStream, LinkError> {
    let (mut ws, _) = connect_async(endpoint)
        .await
        .map_err(|e| LinkError::Unreachable(e.to_string()))?;

    let connect = Envelope::connect(credential)
        .to_json()
        .map_err(|e| LinkError::Protocol(e.to_string()))?;
    ws.send(Message::Text(connect))
        .await
        .map_err(|e| LinkError::Unreachable(e.to_string()))?;

    // Wait for CONNECTED; anything else before it is a rejection.
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => match Envelope::from_json(&text) {
                Ok(env) if env.op == Op::Connected => return Ok(ws),
                Ok(env) if env.op == Op::Error => {
                    return Err(LinkError::HandshakeRejected(
                        env.body.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                Ok(env) => {
                    debug!(op = ?env.op, "Ignoring pre-handshake envelope");
                }
                Err(e) => {
                    warn!(error = %e, "Malformed envelope during handshake");
                }
            },
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(other)) => {
                debug!(frame = ?other, "Ignoring non-text frame during handshake");
            }
            Some(Err(e)) => return Err(LinkError::Unreachable(e.to_string())),
            None => return Err(LinkError::Closed),
        }
    }
}
