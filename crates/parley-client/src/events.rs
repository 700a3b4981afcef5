use tokio::sync::broadcast;

use parley_shared::types::{ChatId, ConnectionState, UserId};

use crate::stream::ScrollAnchor;

/// State-change notifications fanned out to UI subscribers.
///
/// Lagging receivers drop their oldest events; emission never blocks the
/// session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    /// The directory ordering, a preview or the degraded flag changed.
    DirectoryChanged,
    /// An open chat's sequence changed (new entry or confirmed echo).
    MessageReceived { chat: ChatId },
    /// Pointer to the newest message, used by the UI to decide whether to
    /// auto-scroll. The core never scrolls.
    ScrollAnchor(ScrollAnchor),
    /// A counterpart announced presence.
    Presence { user: UserId },
    /// A session-level warning (broker error frame, degraded fetch).
    Warning(String),
}

pub(crate) fn emit(tx: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    if tx.send(event).is_err() {
        // A send error only means nobody is subscribed right now.
        tracing::debug!("No session event subscribers");
    }
}
