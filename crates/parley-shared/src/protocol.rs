use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Chat payload exchanged over the broker, tagged by its `status` field.
///
/// The tag is part of the wire contract: `MESSAGE` frames carry user
/// content, `JOIN` announces presence, `ERROR` carries a human-readable
/// diagnostic and must never be appended to any chat sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status")]
pub enum WireFrame {
    #[serde(rename = "MESSAGE")]
    Message(MessagePayload),
    #[serde(rename = "JOIN")]
    Join(JoinPayload),
    #[serde(rename = "ERROR")]
    Error(ErrorPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    /// Server-assigned message id; absent on frames the client publishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Server receive time; absent on frames the client publishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

impl MessagePayload {
    /// The non-self participant, i.e. the chat this frame belongs to.
    pub fn counterpart_of(&self, self_id: &UserId) -> &UserId {
        if &self.sender_id == self_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Presence announcement, sent once per successful handshake with empty
/// body and no receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub sender_id: UserId,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

impl WireFrame {
    pub fn message(sender: UserId, receiver: UserId, body: impl Into<String>) -> Self {
        Self::Message(MessagePayload {
            sender_id: sender,
            receiver_id: receiver,
            message: body.into(),
            id: None,
            time: None,
        })
    }

    pub fn join(sender: UserId) -> Self {
        Self::Join(JoinPayload {
            sender_id: sender,
            message: String::new(),
        })
    }

    /// Serialize to the JSON text carried in an envelope body.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from envelope body text. Unknown `status` tags fail here and
    /// are dropped by the caller.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_roundtrip() {
        let frame = WireFrame::message(UserId::from("7"), UserId::from("42"), "salut");
        let json = frame.to_json().unwrap();
        let restored = WireFrame::from_json(&json).unwrap();
        assert_eq!(frame, restored);
    }

    #[test]
    fn test_status_tag_and_camel_case_on_the_wire() {
        let frame = WireFrame::message(UserId::from("7"), UserId::from("42"), "salut");
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "MESSAGE");
        assert_eq!(value["senderId"], "7");
        assert_eq!(value["receiverId"], "42");
        assert_eq!(value["message"], "salut");
    }

    #[test]
    fn test_join_frame_has_empty_body() {
        let frame = WireFrame::join(UserId::from("7"));
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["status"], "JOIN");
        assert_eq!(value["message"], "");
        assert!(value.get("receiverId").is_none());
    }

    #[test]
    fn test_server_echo_parses_id_and_time() {
        let json = r#"{
            "status": "MESSAGE",
            "senderId": "7",
            "receiverId": "42",
            "message": "salut",
            "id": "S1",
            "time": "2024-05-01T10:00:00Z"
        }"#;
        match WireFrame::from_json(json).unwrap() {
            WireFrame::Message(m) => {
                assert_eq!(m.id.as_deref(), Some("S1"));
                assert!(m.time.is_some());
            }
            other => panic!("expected MESSAGE frame, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json = r#"{"status": "TYPING", "senderId": "7"}"#;
        assert!(WireFrame::from_json(json).is_err());
    }

    #[test]
    fn test_counterpart_resolution() {
        let me = UserId::from("7");
        let frame = MessagePayload {
            sender_id: UserId::from("7"),
            receiver_id: UserId::from("42"),
            message: "x".into(),
            id: None,
            time: None,
        };
        assert_eq!(frame.counterpart_of(&me).as_str(), "42");

        let inbound = MessagePayload {
            sender_id: UserId::from("42"),
            receiver_id: UserId::from("7"),
            message: "y".into(),
            id: None,
            time: None,
        };
        assert_eq!(inbound.counterpart_of(&me).as_str(), "42");
    }
}
