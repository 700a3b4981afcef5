//! Per-chat ordered message sequence.
//!
//! One [`MessageStream`] exists per open chat. It merges the history
//! fetch with live push frames into a single sequence totally ordered by
//! `(sent_at, local_id)`, reconciles server echoes against optimistic
//! local entries, and yields a scroll anchor after every change.

use std::time::Duration;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use parley_shared::protocol::MessagePayload;
use parley_shared::types::{ChatId, ChatMessage, DeliveryState, UserId};

use crate::api::HistoryRow;

/// Pointer to the newest message after an open or append, emitted so the
/// UI layer can decide whether to auto-scroll. `settle` bounds flicker on
/// rapid bursts; the core itself never scrolls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollAnchor {
    pub chat: ChatId,
    pub message: Uuid,
    pub settle: Duration,
}

/// What a live frame did to the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The frame confirmed an optimistic pending entry.
    Confirmed(Uuid),
    /// The frame became a new entry.
    Appended(Uuid),
    /// The frame's server id was already present; dropped.
    Duplicate,
}

#[derive(Debug)]
pub struct MessageStream {
    chat: ChatId,
    /// Invariant: sorted by `ChatMessage::order_key`, no duplicate
    /// `server_id`.
    messages: Vec<ChatMessage>,
    pending_window: usize,
    settle: Duration,
}

impl MessageStream {
    pub fn new(chat: ChatId, pending_window: usize, settle: Duration) -> Self {
        Self {
            chat,
            messages: Vec::new(),
            pending_window,
            settle,
        }
    }

    /// Build the sequence from a history fetch (ascending chronological
    /// order per the endpoint contract; re-sorted here regardless).
    pub fn from_history(
        chat: ChatId,
        rows: &[HistoryRow],
        self_id: &UserId,
        pending_window: usize,
        settle: Duration,
    ) -> Self {
        let mut stream = Self::new(chat, pending_window, settle);
        for row in rows {
            stream.insert_sorted(ChatMessage {
                local_id: Uuid::new_v4(),
                server_id: Some(row.id.clone()),
                sender: row.sender_id.clone(),
                receiver: row.receiver_id.clone(),
                body: row.message.clone(),
                sent_at: row.time,
                is_own: &row.sender_id == self_id,
                delivery: DeliveryState::Confirmed,
            });
        }
        stream
    }

    pub fn chat(&self) -> &ChatId {
        &self.chat
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }

    /// Anchor to the newest entry, if any.
    pub fn anchor(&self) -> Option<ScrollAnchor> {
        self.messages.last().map(|m| ScrollAnchor {
            chat: self.chat.clone(),
            message: m.local_id,
            settle: self.settle,
        })
    }

    /// Insert a locally created message (optimistic outbound copy).
    pub fn insert_local(&mut self, message: ChatMessage) {
        self.insert_sorted(message);
    }

    /// Mark a local entry failed. The entry stays visible; it is never
    /// dropped.
    pub fn mark_failed(&mut self, local_id: Uuid) -> bool {
        match self.messages.iter_mut().find(|m| m.local_id == local_id) {
            Some(m) => {
                m.delivery = DeliveryState::Failed;
                true
            }
            None => false,
        }
    }

    /// Merge a live frame into the sequence.
    ///
    /// A frame whose `id` is already present is dropped. An own frame is
    /// first reconciled against the pending window (same receiver and
    /// body, closest send time): a hit confirms that entry and attaches
    /// the server id instead of duplicating it. Everything else becomes a
    /// new entry in order.
    pub fn append_live(&mut self, payload: &MessagePayload, self_id: &UserId) -> AppendOutcome {
        if let Some(id) = payload.id.as_deref() {
            if self.messages.iter().any(|m| m.server_id.as_deref() == Some(id)) {
                debug!(chat = %self.chat, server_id = id, "Dropping duplicate frame");
                return AppendOutcome::Duplicate;
            }
        }

        let own = &payload.sender_id == self_id;
        if own {
            if let Some(idx) = self.find_pending_match(payload) {
                let entry = &mut self.messages[idx];
                entry.server_id = payload.id.clone();
                entry.delivery = DeliveryState::Confirmed;
                debug!(chat = %self.chat, local = %entry.local_id, "Echo confirmed pending entry");
                return AppendOutcome::Confirmed(entry.local_id);
            }
        }

        let message = ChatMessage {
            local_id: Uuid::new_v4(),
            server_id: payload.id.clone(),
            sender: payload.sender_id.clone(),
            receiver: payload.receiver_id.clone(),
            body: payload.message.clone(),
            sent_at: payload.time.unwrap_or_else(Utc::now),
            is_own: own,
            delivery: DeliveryState::Confirmed,
        };
        let local_id = message.local_id;
        self.insert_sorted(message);
        AppendOutcome::Appended(local_id)
    }

    /// Closest unconfirmed own entry matching the echo, searched over at
    /// most `pending_window` candidates so merge cost stays bounded.
    fn find_pending_match(&self, payload: &MessagePayload) -> Option<usize> {
        let candidates: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, m)| m.is_own && m.delivery == DeliveryState::Pending)
            .take(self.pending_window)
            .filter(|(_, m)| m.body == payload.message && m.receiver == payload.receiver_id)
            .map(|(i, _)| i)
            .collect();

        match payload.time {
            Some(t) => candidates
                .into_iter()
                .min_by_key(|&i| (self.messages[i].sent_at - t).abs()),
            None => candidates
                .into_iter()
                .max_by_key(|&i| self.messages[i].sent_at),
        }
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let key = message.order_key();
        let idx = self.messages.partition_point(|m| m.order_key() <= key);
        self.messages.insert(idx, message);
    }
}
