//! The per-connection I/O task.
//!
//! Multiplexes outbound commands, inbound socket frames and the
//! heartbeat timers. Any inbound traffic counts as liveness; a silent
//! link past the miss threshold is declared lost even though the socket
//! is technically still open. The task never retries: it emits one
//! [`TransportEvent::Down`] and exits.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use parley_shared::envelope::{Envelope, Op};
use parley_shared::protocol::{ErrorPayload, WireFrame};
use parley_shared::LinkError;

use crate::transport::{TransportCommand, TransportConfig, TransportEvent, WsStream};

pub(crate) async fn run_link(
    mut ws: WsStream,
    mut cmd_rx: mpsc::Receiver<TransportCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    config: TransportConfig,
) {
    let liveness_window = config.heartbeat * config.heartbeat_miss_threshold;
    let mut last_rx = Instant::now();
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + config.heartbeat, config.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        let liveness_deadline = last_rx + liveness_window;

        tokio::select! {
            // Silence past the miss threshold: the link is gone.
            _ = tokio::time::sleep_until(liveness_deadline) => {
                warn!(window = ?liveness_window, "No broker traffic inside the liveness window");
                let _ = event_tx.send(TransportEvent::Down(LinkError::HeartbeatLost)).await;
                break;
            }

            // Outbound heartbeat on a fixed period.
            _ = heartbeat.tick() => {
                let env = Envelope::heartbeat();
                if let Err(e) = send_envelope(&mut ws, &env).await {
                    warn!(error = %e, "Heartbeat send failed");
                    let _ = event_tx.send(TransportEvent::Down(LinkError::Closed)).await;
                    break;
                }
            }

            // --- Commands from the session ---
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(TransportCommand::Publish { destination, frame }) => {
                        match Envelope::send(&destination, &frame) {
                            Ok(env) => {
                                if let Err(e) = send_envelope(&mut ws, &env).await {
                                    warn!(destination = %destination, error = %e, "Publish failed");
                                    let _ = event_tx
                                        .send(TransportEvent::Down(LinkError::Closed))
                                        .await;
                                    break;
                                }
                                debug!(destination = %destination, "Frame published");
                            }
                            Err(e) => {
                                warn!(destination = %destination, error = %e, "Frame serialization failed");
                            }
                        }
                    }
                    Some(TransportCommand::Subscribe(destination)) => {
                        let env = Envelope::subscribe(&destination);
                        if let Err(e) = send_envelope(&mut ws, &env).await {
                            warn!(destination = %destination, error = %e, "Subscribe failed");
                            let _ = event_tx.send(TransportEvent::Down(LinkError::Closed)).await;
                            break;
                        }
                        debug!(destination = %destination, "Subscribed");
                    }
                    Some(TransportCommand::Disconnect) | None => {
                        info!("Transport shutdown requested");
                        let _ = ws.close(None).await;
                        break;
                    }
                }
            }

            // --- Socket frames ---
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        if handle_text(&text, &event_tx).await.is_err() {
                            // Receiver dropped: session is gone.
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_rx = Instant::now();
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(Message::Binary(data))) => {
                        last_rx = Instant::now();
                        debug!(len = data.len(), "Dropping unexpected binary frame");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Broker closed the connection");
                        let _ = event_tx.send(TransportEvent::Down(LinkError::Closed)).await;
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Socket error");
                        let _ = event_tx.send(TransportEvent::Down(LinkError::Closed)).await;
                        break;
                    }
                    None => {
                        let _ = event_tx.send(TransportEvent::Down(LinkError::Closed)).await;
                        break;
                    }
                }
            }
        }
    }

    debug!("Transport I/O task terminated");
}

async fn send_envelope(
    ws: &mut WsStream,
    env: &Envelope,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = match env.to_json() {
        Ok(json) => json,
        Err(e) => {
            // Envelope types always serialize; treat a failure as a bug,
            // not a link fault.
            warn!(error = %e, "Envelope serialization failed");
            return Ok(());
        }
    };
    ws.send(Message::Text(json)).await
}

/// Classify one inbound text envelope. Malformed input is dropped and
/// logged, never fatal. Returns `Err` only when the event receiver is
/// gone.
async fn handle_text(text: &str, event_tx: &mpsc::Sender<TransportEvent>) -> Result<(), ()> {
    let env = match Envelope::from_json(text) {
        Ok(env) => env,
        Err(e) => {
            warn!(error = %e, "Dropping malformed envelope");
            return Ok(());
        }
    };

    match env.op {
        Op::Message => match env.frame() {
            Some(Ok(frame)) => event_tx
                .send(TransportEvent::Frame {
                    destination: env.destination,
                    frame,
                })
                .await
                .map_err(|_| ()),
            Some(Err(e)) => {
                warn!(error = %e, "Dropping MESSAGE envelope with malformed body");
                Ok(())
            }
            None => {
                warn!("Dropping MESSAGE envelope without body");
                Ok(())
            }
        },
        Op::Heartbeat => {
            debug!("Broker heartbeat");
            Ok(())
        }
        // Post-handshake broker errors ride the same sum type the
        // dispatcher already refuses to append to streams.
        Op::Error => event_tx
            .send(TransportEvent::Frame {
                destination: None,
                frame: WireFrame::Error(ErrorPayload {
                    message: env.body.unwrap_or_else(|| "unspecified".to_string()),
                }),
            })
            .await
            .map_err(|_| ()),
        other => {
            debug!(op = ?other, "Ignoring unexpected envelope direction");
            Ok(())
        }
    }
}
