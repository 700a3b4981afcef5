//! Outbound message composition.
//!
//! Validates user input, materializes the optimistic local copy, and
//! hands the frame to the publish path. A synchronous publish failure
//! marks the local entry failed; it is never silently dropped, and there
//! is no automatic retry.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use parley_shared::protocol::WireFrame;
use parley_shared::types::{ChatMessage, DeliveryState, UserId};
use parley_shared::{SendError, ValidationError};

use crate::stream::MessageStream;

/// Validate `body` and publish it to the stream's chat.
///
/// On success the returned message is `Pending` and already inserted in
/// the stream; if `publish` fails it is returned (and kept) as `Failed`.
pub fn compose(
    stream: &mut MessageStream,
    self_id: &UserId,
    body: &str,
    publish: impl FnOnce(WireFrame) -> Result<(), SendError>,
) -> Result<ChatMessage, ValidationError> {
    if body.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let chat = stream.chat().clone();
    let mut message = ChatMessage {
        local_id: Uuid::new_v4(),
        server_id: None,
        sender: self_id.clone(),
        receiver: chat.clone(),
        body: body.to_string(),
        sent_at: Utc::now(),
        is_own: true,
        delivery: DeliveryState::Pending,
    };

    stream.insert_local(message.clone());

    let frame = WireFrame::message(self_id.clone(), chat.clone(), body);
    match publish(frame) {
        Ok(()) => {
            info!(chat = %chat, local = %message.local_id, "Message published");
        }
        Err(e) => {
            warn!(chat = %chat, local = %message.local_id, error = %e, "Publish failed");
            stream.mark_failed(message.local_id);
            message.delivery = DeliveryState::Failed;
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn me() -> UserId {
        UserId::from("7")
    }

    fn stream() -> MessageStream {
        MessageStream::new(UserId::from("42"), 8, Duration::from_millis(150))
    }

    #[test]
    fn test_blank_body_is_rejected_before_publish() {
        let mut s = stream();
        let mut published = false;
        let result = compose(&mut s, &me(), "   \n\t", |_| {
            published = true;
            Ok(())
        });
        assert_eq!(result.unwrap_err(), ValidationError::Empty);
        assert!(!published);
        assert!(s.is_empty());
    }

    #[test]
    fn test_successful_compose_inserts_pending_entry() {
        let mut s = stream();
        let message = compose(&mut s, &me(), "salut", |frame| {
            match frame {
                WireFrame::Message(p) => {
                    assert_eq!(p.sender_id, me());
                    assert_eq!(p.receiver_id, UserId::from("42"));
                    assert_eq!(p.message, "salut");
                    assert!(p.id.is_none());
                }
                other => panic!("expected MESSAGE frame, got {other:?}"),
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(message.delivery, DeliveryState::Pending);
        assert!(message.is_own);
        assert_eq!(s.len(), 1);
        assert_eq!(s.messages()[0].local_id, message.local_id);
    }

    #[test]
    fn test_failed_publish_keeps_entry_marked_failed() {
        let mut s = stream();
        let message = compose(&mut s, &me(), "salut", |_| Err(SendError::NotConnected)).unwrap();

        assert_eq!(message.delivery, DeliveryState::Failed);
        assert_eq!(s.len(), 1);
        assert_eq!(s.messages()[0].delivery, DeliveryState::Failed);
    }
}
