//! End-to-end session tests against an in-process broker.

use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;

use parley_client::{ChatSession, SessionConfig};
use parley_shared::envelope::{Envelope, Op};
use parley_shared::protocol::{MessagePayload, WireFrame};
use parley_shared::types::{ConnectionState, DeliveryState, UserId};
use parley_shared::{LinkError, SendError};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

fn config(broker_url: &str) -> SessionConfig {
    let mut config = SessionConfig::new(
        broker_url,
        // The HTTP service is not involved in these tests.
        "http://127.0.0.1:1",
        "tok",
        UserId::from("7"),
    );
    config.transport.heartbeat = Duration::from_secs(5);
    config.transport.handshake_timeout = Duration::from_millis(500);
    config.reconnect_delay = Duration::from_millis(100);
    config
}

/// Accept one connection and answer the CONNECT handshake.
async fn handshake(stream: TcpStream) -> WebSocketStream<TcpStream> {
    let mut ws = accept_async(stream).await.unwrap();
    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let env = Envelope::from_json(&text).unwrap();
        if env.op == Op::Connect {
            let reply = Envelope::connected().to_json().unwrap();
            ws.send(Message::Text(reply)).await.unwrap();
            return ws;
        }
    }
    panic!("connection ended before CONNECT");
}

async fn wait_until(what: &str, mut probe: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !probe() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_compose_and_echo_merge_into_one_confirmed_entry() {
    init_logging();
    let (listener, url) = bind().await;

    // Echo broker: replays every published MESSAGE back to the private
    // inbox with a server id and time attached.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = handshake(stream).await;
        let mut inbox: Option<String> = None;
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let env = Envelope::from_json(&text).unwrap();
            match env.op {
                Op::Subscribe => inbox = env.destination,
                Op::Send => {
                    if let Some(Ok(WireFrame::Message(payload))) = env.frame() {
                        let echoed = WireFrame::Message(MessagePayload {
                            id: Some("S1".into()),
                            time: Some(Utc::now()),
                            ..payload
                        });
                        let dest = inbox.clone().expect("subscribe before send");
                        let reply = Envelope::message(dest, &echoed).unwrap().to_json().unwrap();
                        ws.send(Message::Text(reply)).await.unwrap();
                    }
                }
                _ => {}
            }
        }
    });

    let session = ChatSession::new(config(&url));
    session.connect().await.unwrap();
    assert_eq!(session.connection_state(), ConnectionState::Connected);

    let chat = UserId::from("42");
    let message = session.compose_message(&chat, "hi").unwrap();
    assert_eq!(message.delivery, DeliveryState::Pending);
    assert_eq!(session.messages(&chat).unwrap().len(), 1);

    wait_until("echo confirmation", || {
        session
            .messages(&chat)
            .is_some_and(|msgs| msgs.iter().any(|m| m.delivery == DeliveryState::Confirmed))
    })
    .await;

    let visible = session.messages(&chat).unwrap();
    assert_eq!(visible.len(), 1, "echo must merge, not duplicate");
    assert_eq!(visible[0].body, "hi");
    assert_eq!(visible[0].server_id.as_deref(), Some("S1"));
    assert_eq!(visible[0].local_id, message.local_id);

    // The echo also refreshed the directory preview.
    let directory = session.directory();
    assert_eq!(directory[0].chat_id, chat);
    assert_eq!(directory[0].last_message_preview.as_deref(), Some("hi"));

    session.disconnect().await;
}

#[tokio::test]
async fn test_handshake_timeout_fails_the_session() {
    init_logging();
    let (listener, url) = bind().await;

    // Accepts the socket but never answers CONNECT.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let session = ChatSession::new(config(&url));
    let err = session.connect().await.unwrap_err();
    assert_eq!(err, LinkError::Timeout);
    assert_eq!(session.connection_state(), ConnectionState::Failed);

    // Fails fast, no blocking on reconnection.
    assert_eq!(
        session.send(&UserId::from("42"), "hi"),
        Err(SendError::NotConnected)
    );
}

#[tokio::test]
async fn test_reconnect_keeps_streams_and_resubscribes_once() {
    init_logging();
    let (listener, url) = bind().await;
    let (tx, mut rx) = mpsc::channel::<u32>(1);

    tokio::spawn(async move {
        // First connection: wait for the published chat message, then
        // drop the link.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = handshake(stream).await;
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let env = Envelope::from_json(&text).unwrap();
            if env.op == Op::Send {
                if let Some(Ok(WireFrame::Message(_))) = env.frame() {
                    break;
                }
            }
        }
        drop(ws);

        // Second connection: count re-subscriptions for a while.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = handshake(stream).await;
        let mut subscribes = 0u32;
        let window = tokio::time::sleep(Duration::from_millis(600));
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if Envelope::from_json(&text).unwrap().op == Op::Subscribe {
                            subscribes += 1;
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                },
            }
        }
        tx.send(subscribes).await.unwrap();
    });

    let session = ChatSession::new(config(&url));
    session.connect().await.unwrap();

    let chat = UserId::from("42");
    let message = session.compose_message(&chat, "hi").unwrap();
    assert_eq!(message.delivery, DeliveryState::Pending);

    // The broker drops the link after reading the message; the session
    // must come back on its own.
    wait_until("link loss", || {
        session.connection_state() != ConnectionState::Connected
    })
    .await;
    wait_until("reconnection", || {
        session.connection_state() == ConnectionState::Connected
    })
    .await;

    // No data was discarded across the drop.
    let visible = session.messages(&chat).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].local_id, message.local_id);

    let subscribes = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("broker never reported")
        .unwrap();
    assert_eq!(subscribes, 1, "inbox must be re-subscribed exactly once");

    session.disconnect().await;
}

#[tokio::test]
async fn test_error_frame_is_a_warning_not_a_message() {
    init_logging();
    let (listener, url) = bind().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = handshake(stream).await;
        let mut inbox: Option<String> = None;
        while let Some(Ok(Message::Text(text))) = ws.next().await {
            let env = Envelope::from_json(&text).unwrap();
            match env.op {
                Op::Subscribe => {
                    inbox = env.destination;
                    // Push one message, then a server-side error frame.
                    let dest = inbox.clone().unwrap();
                    let frame = WireFrame::message(UserId::from("42"), UserId::from("7"), "bonjour");
                    let reply = Envelope::message(dest.clone(), &frame).unwrap().to_json().unwrap();
                    ws.send(Message::Text(reply)).await.unwrap();

                    let error = WireFrame::Error(parley_shared::protocol::ErrorPayload {
                        message: "rate limited".into(),
                    });
                    let reply = Envelope::message(dest, &error).unwrap().to_json().unwrap();
                    ws.send(Message::Text(reply)).await.unwrap();
                }
                _ => {}
            }
        }
    });

    let session = ChatSession::new(config(&url));
    session.connect().await.unwrap();

    let chat = UserId::from("42");
    wait_until("inbound message", || session.directory().len() == 1).await;
    wait_until("error warning", || !session.warnings().is_empty()).await;

    // The warning never landed in any stream; the chat was not even open,
    // and opening state is untouched.
    assert!(session.messages(&chat).is_none());
    assert_eq!(session.warnings(), vec!["rate limited".to_string()]);

    session.disconnect().await;
}
