//! Broker framing beneath the chat payload.
//!
//! The broker speaks a compact STOMP-flavored envelope over the socket:
//! a handshake (`CONNECT`/`CONNECTED`), destination-addressed
//! `SUBSCRIBE`/`SEND`/`MESSAGE` ops, and `HEARTBEAT` keepalives. Chat
//! payloads ([`WireFrame`]) travel as JSON text in the envelope body.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::WireFrame;

/// Header carrying the bearer credential on `CONNECT`.
pub const AUTHORIZATION_HEADER: &str = "authorization";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    /// Client → broker: open a session, credential in headers.
    Connect,
    /// Broker → client: handshake accepted.
    Connected,
    /// Client → broker: deliver frames published to `destination`.
    Subscribe,
    /// Client → broker: publish the body frame to `destination`.
    Send,
    /// Broker → client: a frame fanned out to a subscription.
    Message,
    /// Either direction: liveness probe, no body.
    Heartbeat,
    /// Broker → client: session-level failure, diagnostic in body.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Envelope {
    pub op: Op,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl Envelope {
    fn bare(op: Op) -> Self {
        Self {
            op,
            destination: None,
            headers: HashMap::new(),
            body: None,
        }
    }

    pub fn connect(credential: &str) -> Self {
        let mut env = Self::bare(Op::Connect);
        env.headers.insert(
            AUTHORIZATION_HEADER.to_string(),
            format!("Bearer {credential}"),
        );
        env
    }

    pub fn connected() -> Self {
        Self::bare(Op::Connected)
    }

    pub fn subscribe(destination: impl Into<String>) -> Self {
        let mut env = Self::bare(Op::Subscribe);
        env.destination = Some(destination.into());
        env
    }

    pub fn send(
        destination: impl Into<String>,
        frame: &WireFrame,
    ) -> Result<Self, serde_json::Error> {
        let mut env = Self::bare(Op::Send);
        env.destination = Some(destination.into());
        env.body = Some(frame.to_json()?);
        Ok(env)
    }

    pub fn message(
        destination: impl Into<String>,
        frame: &WireFrame,
    ) -> Result<Self, serde_json::Error> {
        let mut env = Self::bare(Op::Message);
        env.destination = Some(destination.into());
        env.body = Some(frame.to_json()?);
        Ok(env)
    }

    pub fn heartbeat() -> Self {
        Self::bare(Op::Heartbeat)
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut env = Self::bare(Op::Error);
        env.body = Some(message.into());
        env
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parse the chat frame carried in the body, if any.
    pub fn frame(&self) -> Option<Result<WireFrame, serde_json::Error>> {
        self.body.as_deref().map(WireFrame::from_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    #[test]
    fn test_envelope_roundtrip() {
        let frame = WireFrame::message(UserId::from("7"), UserId::from("42"), "salut");
        let env = Envelope::send("/app/chat", &frame).unwrap();
        let restored = Envelope::from_json(&env.to_json().unwrap()).unwrap();
        assert_eq!(env, restored);
        assert_eq!(restored.frame().unwrap().unwrap(), frame);
    }

    #[test]
    fn test_connect_carries_bearer_credential() {
        let env = Envelope::connect("tok-123");
        assert_eq!(env.op, Op::Connect);
        assert_eq!(
            env.headers.get(AUTHORIZATION_HEADER).map(String::as_str),
            Some("Bearer tok-123")
        );
    }

    #[test]
    fn test_ops_serialize_screaming() {
        let value: serde_json::Value =
            serde_json::from_str(&Envelope::heartbeat().to_json().unwrap()).unwrap();
        assert_eq!(value["op"], "HEARTBEAT");
        assert!(value.get("destination").is_none());
        assert!(value.get("body").is_none());
    }
}
