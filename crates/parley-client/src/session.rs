//! Session manager: connection lifecycle, reconnection policy, and the
//! single inbound dispatcher.
//!
//! One [`ChatSession`] exists per authenticated user. It exclusively
//! owns the [`ConnectionState`] and the single transport; the directory
//! and all open streams live behind the same mutex so inbound frames and
//! user actions serialize. The transport's I/O task feeds the supervisor
//! task, which dispatches frames and drives reconnection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use parley_net::{Transport, TransportConfig, TransportEvent};
use parley_shared::constants::{
    DEFAULT_PENDING_WINDOW, DEFAULT_RECONNECT_DELAY_SECS, DEFAULT_SCROLL_SETTLE_MS,
    SEND_DESTINATION, SESSION_EVENT_CAPACITY,
};
use parley_shared::protocol::WireFrame;
use parley_shared::types::{
    ChatId, ChatMessage, ChatSummary, ConnectionState, DeliveryState, SearchResult, UserId,
};
use parley_shared::{FetchError, LinkError, SendError, ValidationError};

use crate::api::HistoryApi;
use crate::composer;
use crate::directory::ChatDirectory;
use crate::events::{self, SessionEvent};
use crate::stream::{AppendOutcome, MessageStream};

/// Knobs for one session. Interval values are configuration, not
/// contract.
#[derive(Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint of the broker.
    pub broker_url: String,
    /// Base URL of the HTTP message service.
    pub api_base: String,
    /// Opaque bearer credential; refreshing it is not this crate's job.
    pub credential: String,
    /// This session's user.
    pub user_id: UserId,
    pub transport: TransportConfig,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Unconfirmed own messages searched per echo reconciliation.
    pub pending_window: usize,
    /// Settle duration attached to scroll anchors.
    pub scroll_settle: Duration,
}

impl SessionConfig {
    pub fn new(
        broker_url: impl Into<String>,
        api_base: impl Into<String>,
        credential: impl Into<String>,
        user_id: UserId,
    ) -> Self {
        Self {
            broker_url: broker_url.into(),
            api_base: api_base.into(),
            credential: credential.into(),
            user_id,
            transport: TransportConfig::default(),
            reconnect_delay: Duration::from_secs(DEFAULT_RECONNECT_DELAY_SECS),
            pending_window: DEFAULT_PENDING_WINDOW,
            scroll_settle: Duration::from_millis(DEFAULT_SCROLL_SETTLE_MS),
        }
    }
}

/// Everything the dispatcher and the callers mutate, behind one lock.
pub(crate) struct SessionShared {
    pub(crate) connection: ConnectionState,
    pub(crate) transport: Option<Transport>,
    pub(crate) directory: ChatDirectory,
    pub(crate) streams: HashMap<ChatId, MessageStream>,
    pub(crate) warnings: Vec<String>,
    /// Bumped on every open/close; an in-flight history fetch applies its
    /// result only if the generation still matches (discard-on-cancel).
    pub(crate) open_generation: u64,
    /// Bumped on every successful connect(); a superseded supervisor task
    /// must not act on events from a previous connection epoch.
    pub(crate) epoch: u64,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            transport: None,
            directory: ChatDirectory::new(),
            streams: HashMap::new(),
            warnings: Vec::new(),
            open_generation: 0,
            epoch: 0,
        }
    }
}

/// The messaging session facade handed to the UI layer.
pub struct ChatSession {
    config: SessionConfig,
    api: HistoryApi,
    shared: Arc<Mutex<SessionShared>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ChatSession {
    /// Create a session in `Disconnected` state. Nothing touches the
    /// network until [`connect`](Self::connect).
    pub fn new(config: SessionConfig) -> Self {
        let api = HistoryApi::new(&config.api_base, &config.credential);
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            config,
            api,
            shared: Arc::new(Mutex::new(SessionShared::new())),
            events,
        }
    }

    /// Connect and seed the directory. A failed summary fetch degrades
    /// the directory instead of failing the start.
    pub async fn start(config: SessionConfig) -> Result<Self, LinkError> {
        let session = Self::new(config);
        session.connect().await?;
        if let Err(e) = session.load_directory().await {
            warn!(error = %e, "Summary load failed; starting with an empty directory");
        }
        Ok(session)
    }

    /// Establish the broker connection.
    ///
    /// A handshake failure or timeout lands in `Failed` (reconnection is
    /// reserved for sessions that were established first). On success the
    /// private inbox subscription and the presence announce go out, and
    /// the supervisor task takes over the link.
    pub async fn connect(&self) -> Result<(), LinkError> {
        {
            let mut shared = self.lock();
            match shared.connection {
                ConnectionState::Connected
                | ConnectionState::Connecting
                | ConnectionState::Reconnecting => {
                    debug!(state = %shared.connection, "connect() ignored");
                    return Ok(());
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    shared.connection = ConnectionState::Connecting;
                }
            }
        }
        events::emit(
            &self.events,
            SessionEvent::ConnectionChanged(ConnectionState::Connecting),
        );

        match Transport::connect(
            &self.config.broker_url,
            &self.config.credential,
            self.config.transport.clone(),
        )
        .await
        {
            Ok((transport, event_rx)) => {
                announce(&transport, &self.config.user_id);
                let epoch = {
                    let mut shared = self.lock();
                    shared.transport = Some(transport);
                    shared.connection = ConnectionState::Connected;
                    shared.epoch += 1;
                    shared.epoch
                };
                events::emit(
                    &self.events,
                    SessionEvent::ConnectionChanged(ConnectionState::Connected),
                );
                info!(user = %self.config.user_id, "Session connected");

                tokio::spawn(supervise(
                    self.shared.clone(),
                    self.events.clone(),
                    self.config.clone(),
                    epoch,
                    event_rx,
                ));
                Ok(())
            }
            Err(e) => {
                {
                    let mut shared = self.lock();
                    shared.connection = ConnectionState::Failed;
                }
                events::emit(
                    &self.events,
                    SessionEvent::ConnectionChanged(ConnectionState::Failed),
                );
                warn!(error = %e, "Session handshake failed");
                Err(e)
            }
        }
    }

    /// Gracefully close the connection. In-memory chat state is kept.
    pub async fn disconnect(&self) {
        let transport = {
            let mut shared = self.lock();
            shared.connection = ConnectionState::Disconnected;
            shared.transport.take()
        };
        events::emit(
            &self.events,
            SessionEvent::ConnectionChanged(ConnectionState::Disconnected),
        );
        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        info!("Session disconnected");
    }

    /// Publish a raw message frame. Fails fast when not connected;
    /// callers must not block waiting for reconnection.
    pub fn send(&self, receiver: &UserId, body: &str) -> Result<(), SendError> {
        let shared = self.lock();
        send_frame(
            &shared,
            WireFrame::message(self.config.user_id.clone(), receiver.clone(), body),
        )
    }

    /// Compose a user-authored message: validate, insert the optimistic
    /// local copy, publish. A synchronous publish failure is returned as
    /// a `Failed` entry, never an error and never dropped.
    pub fn compose_message(
        &self,
        chat: &ChatId,
        body: &str,
    ) -> Result<ChatMessage, ValidationError> {
        let mut guard = self.lock();
        let shared = &mut *guard;

        let connection = shared.connection;
        let transport = shared.transport.as_ref();
        let stream = shared.streams.entry(chat.clone()).or_insert_with(|| {
            MessageStream::new(
                chat.clone(),
                self.config.pending_window,
                self.config.scroll_settle,
            )
        });

        let message = composer::compose(stream, &self.config.user_id, body, |frame| {
            if connection != ConnectionState::Connected {
                return Err(SendError::NotConnected);
            }
            transport
                .ok_or(SendError::NotConnected)?
                .publish(SEND_DESTINATION, frame)
        })?;

        let anchor = shared.streams.get(chat).and_then(|s| s.anchor());
        shared
            .directory
            .touch(chat, message.body.clone(), message.sent_at);
        drop(guard);

        events::emit(&self.events, SessionEvent::DirectoryChanged);
        if let Some(anchor) = anchor {
            events::emit(&self.events, SessionEvent::ScrollAnchor(anchor));
        }
        Ok(message)
    }

    /// Open a chat: fetch its history, merge any unconfirmed local
    /// entries that survived from a previous open, install the sequence
    /// and return a snapshot of it.
    ///
    /// Navigating away before the fetch lands cancels it: the stale
    /// result is discarded, never applied.
    pub async fn open_chat(&self, chat: &ChatId) -> Result<Vec<ChatMessage>, FetchError> {
        let generation = {
            let mut shared = self.lock();
            shared.open_generation += 1;
            shared.open_generation
        };

        let rows = self
            .api
            .fetch_history(&self.config.user_id, chat)
            .await?;

        let mut shared = self.lock();
        if shared.open_generation != generation {
            debug!(chat = %chat, "History fetch superseded; discarding");
            return Err(FetchError::Cancelled);
        }

        let mut stream = MessageStream::from_history(
            chat.clone(),
            &rows,
            &self.config.user_id,
            self.config.pending_window,
            self.config.scroll_settle,
        );
        if let Some(old) = shared.streams.remove(chat) {
            for message in old.into_messages() {
                if message.delivery != DeliveryState::Confirmed {
                    stream.insert_local(message);
                }
            }
        }

        let snapshot = stream.messages().to_vec();
        let anchor = stream.anchor();
        shared.streams.insert(chat.clone(), stream);
        drop(shared);

        info!(chat = %chat, messages = snapshot.len(), "Chat opened");
        if let Some(anchor) = anchor {
            events::emit(&self.events, SessionEvent::ScrollAnchor(anchor));
        }
        Ok(snapshot)
    }

    /// Evict a chat's in-memory sequence. History remains retrievable by
    /// reopening; the directory entry is untouched.
    pub fn close_chat(&self, chat: &ChatId) {
        let mut shared = self.lock();
        shared.open_generation += 1;
        if shared.streams.remove(chat).is_some() {
            debug!(chat = %chat, "Chat closed, sequence evicted");
        }
    }

    /// One-shot directory sync from the summary endpoint. A failure
    /// leaves the directory empty-but-usable and degraded.
    pub async fn load_directory(&self) -> Result<(), FetchError> {
        match self.api.fetch_summary(&self.config.user_id).await {
            Ok(rows) => {
                {
                    let mut shared = self.lock();
                    shared.directory.load(&rows);
                }
                events::emit(&self.events, SessionEvent::DirectoryChanged);
                Ok(())
            }
            Err(e) => {
                let warning = format!("chat summary unavailable: {e}");
                {
                    let mut shared = self.lock();
                    shared.directory.mark_degraded();
                    shared.warnings.push(warning.clone());
                }
                events::emit(&self.events, SessionEvent::Warning(warning));
                Err(e)
            }
        }
    }

    /// Counterpart candidates for a search query.
    pub async fn search_counterparts(&self, query: &str) -> Result<Vec<SearchResult>, FetchError> {
        self.api.search(query).await
    }

    /// Promote a search selection into the directory (idempotent).
    pub fn promote_search_result(&self, result: &SearchResult) -> ChatSummary {
        let (summary, created) = {
            let mut shared = self.lock();
            shared.directory.promote(result)
        };
        if created {
            events::emit(&self.events, SessionEvent::DirectoryChanged);
        }
        summary
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Directory snapshot, most-recent-activity-first.
    pub fn directory(&self) -> Vec<ChatSummary> {
        self.lock().directory.ordered()
    }

    pub fn directory_degraded(&self) -> bool {
        self.lock().directory.is_degraded()
    }

    /// Snapshot of an open chat's sequence, if the chat is open.
    pub fn messages(&self, chat: &ChatId) -> Option<Vec<ChatMessage>> {
        self.lock().streams.get(chat).map(|s| s.messages().to_vec())
    }

    /// Session-level warnings recorded so far (broker error frames,
    /// degraded fetches).
    pub fn warnings(&self) -> Vec<String> {
        self.lock().warnings.clone()
    }

    pub fn user_id(&self) -> &UserId {
        &self.config.user_id
    }

    /// Subscribe to state-change events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, SessionShared> {
        lock_shared(&self.shared)
    }
}

fn lock_shared(shared: &Mutex<SessionShared>) -> MutexGuard<'_, SessionShared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send_frame(shared: &SessionShared, frame: WireFrame) -> Result<(), SendError> {
    if shared.connection != ConnectionState::Connected {
        return Err(SendError::NotConnected);
    }
    shared
        .transport
        .as_ref()
        .ok_or(SendError::NotConnected)?
        .publish(SEND_DESTINATION, frame)
}

/// Subscribe the private inbox and announce presence. Runs once per
/// successful handshake.
fn announce(transport: &Transport, user: &UserId) {
    if let Err(e) = transport.subscribe(user.inbox_destination()) {
        warn!(error = %e, "Inbox subscription failed");
    }
    if let Err(e) = transport.publish(SEND_DESTINATION, WireFrame::join(user.clone())) {
        warn!(error = %e, "Presence announce failed");
    }
}

/// Route one inbound frame. The directory update and the open stream's
/// append happen under the same lock acquisition, so the preview and the
/// visible history cannot disagree across frames.
pub(crate) fn dispatch_frame(
    shared: &mut SessionShared,
    frame: WireFrame,
    self_id: &UserId,
    events: &broadcast::Sender<SessionEvent>,
) {
    match frame {
        WireFrame::Message(payload) => {
            let chat = payload.counterpart_of(self_id).clone();
            shared.directory.upsert_from_message(&payload, self_id);

            let anchor = match shared.streams.get_mut(&chat) {
                Some(stream) => match stream.append_live(&payload, self_id) {
                    AppendOutcome::Duplicate => None,
                    AppendOutcome::Confirmed(_) | AppendOutcome::Appended(_) => stream.anchor(),
                },
                None => None,
            };

            events::emit(events, SessionEvent::DirectoryChanged);
            if let Some(anchor) = anchor {
                events::emit(events, SessionEvent::MessageReceived { chat });
                events::emit(events, SessionEvent::ScrollAnchor(anchor));
            }
        }
        WireFrame::Join(payload) => {
            info!(user = %payload.sender_id, "Counterpart announced presence");
            events::emit(
                events,
                SessionEvent::Presence {
                    user: payload.sender_id,
                },
            );
        }
        WireFrame::Error(payload) => {
            // Never applied to any stream; recorded and surfaced only.
            warn!(message = %payload.message, "Broker error frame");
            shared.warnings.push(payload.message.clone());
            events::emit(events, SessionEvent::Warning(payload.message));
        }
    }
}

/// Drain transport events; on link loss, run the reconnection policy.
async fn supervise(
    shared: Arc<Mutex<SessionShared>>,
    events: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
    epoch: u64,
    mut event_rx: mpsc::Receiver<TransportEvent>,
) {
    loop {
        let event = match event_rx.recv().await {
            Some(event) => event,
            None => TransportEvent::Down(LinkError::Closed),
        };

        match event {
            TransportEvent::Frame { frame, .. } => {
                let mut guard = lock_shared(&shared);
                if guard.epoch != epoch {
                    return;
                }
                dispatch_frame(&mut guard, frame, &config.user_id, &events);
            }
            TransportEvent::Down(error) => {
                {
                    let mut guard = lock_shared(&shared);
                    if guard.epoch != epoch || guard.connection == ConnectionState::Disconnected {
                        return;
                    }
                    // Open chats keep their last-known state; nothing is
                    // discarded on a link loss.
                    guard.transport = None;
                    guard.connection = ConnectionState::Reconnecting;
                }
                events::emit(
                    &events,
                    SessionEvent::ConnectionChanged(ConnectionState::Reconnecting),
                );
                warn!(error = %error, "Link lost; reconnecting");

                match reconnect(&shared, &events, &config, epoch).await {
                    Some(rx) => event_rx = rx,
                    None => return,
                }
            }
        }
    }
}

/// Fixed-delay reconnection, retried indefinitely while the credential
/// is held. Returns the new event receiver, or `None` if the session was
/// disconnected meanwhile.
async fn reconnect(
    shared: &Arc<Mutex<SessionShared>>,
    events: &broadcast::Sender<SessionEvent>,
    config: &SessionConfig,
    epoch: u64,
) -> Option<mpsc::Receiver<TransportEvent>> {
    loop {
        tokio::time::sleep(config.reconnect_delay).await;
        {
            let mut guard = lock_shared(shared);
            if guard.epoch != epoch || guard.connection == ConnectionState::Disconnected {
                return None;
            }
            guard.connection = ConnectionState::Connecting;
        }
        events::emit(
            events,
            SessionEvent::ConnectionChanged(ConnectionState::Connecting),
        );

        match Transport::connect(&config.broker_url, &config.credential, config.transport.clone())
            .await
        {
            Ok((transport, event_rx)) => {
                announce(&transport, &config.user_id);
                {
                    let mut guard = lock_shared(shared);
                    if guard.epoch != epoch || guard.connection == ConnectionState::Disconnected {
                        return None;
                    }
                    guard.transport = Some(transport);
                    guard.connection = ConnectionState::Connected;
                }
                events::emit(
                    events,
                    SessionEvent::ConnectionChanged(ConnectionState::Connected),
                );
                info!("Reconnected; inbox subscription re-established");
                return Some(event_rx);
            }
            Err(e) => {
                warn!(error = %e, "Reconnection attempt failed");
                let mut guard = lock_shared(shared);
                if guard.epoch != epoch || guard.connection == ConnectionState::Disconnected {
                    return None;
                }
                guard.connection = ConnectionState::Reconnecting;
                drop(guard);
                events::emit(
                    events,
                    SessionEvent::ConnectionChanged(ConnectionState::Reconnecting),
                );
            }
        }
    }
}
