//! Counterpart directory.
//!
//! Maintains the mapping of counterpart user → chat summary and
//! reconciles it with the server summary snapshot and with live
//! traffic. Summaries are only ever inserted or updated, never deleted
//! in-session.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use parley_shared::protocol::MessagePayload;
use parley_shared::types::{ChatId, ChatSummary, SearchResult, UserId};

use crate::api::SummaryRow;

#[derive(Debug, Default)]
pub struct ChatDirectory {
    entries: HashMap<ChatId, ChatSummary>,
    next_seq: u64,
    /// Set when the summary snapshot could not be fetched; the directory
    /// stays usable (empty or stale) and the flag clears on the next
    /// successful load.
    degraded: bool,
}

impl ChatDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile with the server summary snapshot. Rows upsert existing
    /// entries; entries absent from the snapshot are kept.
    pub fn load(&mut self, rows: &[SummaryRow]) {
        for row in rows {
            let seq = self.next_seq_for(&row.user_id);
            let entry = self
                .entries
                .entry(row.user_id.clone())
                .or_insert_with(|| ChatSummary {
                    chat_id: row.user_id.clone(),
                    display_name: row.name.clone(),
                    avatar_ref: None,
                    last_message_preview: None,
                    last_activity_at: None,
                    seq,
                });
            entry.display_name = row.name.clone();
            entry.avatar_ref = row.avatar.clone();
            entry.last_message_preview = row.last_message.clone();
            entry.last_activity_at = row.time;
        }
        self.degraded = false;
        debug!(chats = self.entries.len(), "Directory loaded from summary");
    }

    pub fn mark_degraded(&mut self) {
        self.degraded = true;
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Record activity on a chat: update the preview and activity time,
    /// creating a placeholder entry when the counterpart is unknown.
    pub fn touch(&mut self, chat: &ChatId, preview: impl Into<String>, at: DateTime<Utc>) {
        let seq = self.next_seq_for(chat);
        let entry = self.entries.entry(chat.clone()).or_insert_with(|| ChatSummary {
            chat_id: chat.clone(),
            display_name: chat.to_string(),
            avatar_ref: None,
            last_message_preview: None,
            last_activity_at: None,
            seq,
        });
        entry.last_message_preview = Some(preview.into());
        entry.last_activity_at = Some(at);
    }

    /// Update from a live frame, keyed by the non-self participant,
    /// whether or not that chat is currently open.
    pub fn upsert_from_message(&mut self, payload: &MessagePayload, self_id: &UserId) {
        let chat = payload.counterpart_of(self_id).clone();
        let at = payload.time.unwrap_or_else(Utc::now);
        self.touch(&chat, payload.message.clone(), at);
    }

    /// Promote a search selection to a directory entry with empty
    /// history. Idempotent: an existing chat is returned unchanged.
    /// The boolean reports whether an entry was created.
    pub fn promote(&mut self, result: &SearchResult) -> (ChatSummary, bool) {
        if let Some(existing) = self.entries.get(&result.user_id) {
            return (existing.clone(), false);
        }
        let summary = ChatSummary {
            chat_id: result.user_id.clone(),
            display_name: result.display_name.clone(),
            avatar_ref: result.avatar_ref.clone(),
            last_message_preview: None,
            last_activity_at: None,
            seq: self.next_seq_for(&result.user_id),
        };
        self.entries.insert(result.user_id.clone(), summary.clone());
        debug!(chat = %result.user_id, "Search result promoted to chat");
        (summary, true)
    }

    pub fn get(&self, chat: &ChatId) -> Option<&ChatSummary> {
        self.entries.get(chat)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot ordered most-recent-activity-first; ties break by
    /// insertion order.
    pub fn ordered(&self) -> Vec<ChatSummary> {
        let mut all: Vec<&ChatSummary> = self.entries.values().collect();
        all.sort_by(|a, b| {
            b.last_activity_at
                .cmp(&a.last_activity_at)
                .then(a.seq.cmp(&b.seq))
        });
        all.into_iter().cloned().collect()
    }

    fn next_seq_for(&mut self, chat: &ChatId) -> u64 {
        if let Some(existing) = self.entries.get(chat) {
            return existing.seq;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
