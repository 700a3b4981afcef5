/// Destination the client publishes outbound chat frames to.
pub const SEND_DESTINATION: &str = "/app/chat";

/// Default bidirectional heartbeat period in seconds.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 10;

/// Missed heartbeat periods before the link is declared lost.
pub const DEFAULT_HEARTBEAT_MISS_THRESHOLD: u32 = 3;

/// Default handshake timeout in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// Default delay between reconnection attempts in seconds (fixed, not
/// exponential).
pub const DEFAULT_RECONNECT_DELAY_SECS: u64 = 5;

/// How many unconfirmed own messages per chat are searched when
/// reconciling a server echo against an optimistic local entry.
pub const DEFAULT_PENDING_WINDOW: usize = 8;

/// Scroll-anchor settle duration in milliseconds, bounding auto-scroll
/// flicker on rapid bursts.
pub const DEFAULT_SCROLL_SETTLE_MS: u64 = 150;

/// Capacity of the transport command and event channels.
pub const TRANSPORT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the session event broadcast channel.
pub const SESSION_EVENT_CAPACITY: usize = 256;
