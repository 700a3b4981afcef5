use thiserror::Error;

/// Transport-level failures. Surfaced to the session manager, which owns
/// the retry policy; the transport itself never retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("broker endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("broker rejected the handshake: {0}")]
    HandshakeRejected(String),

    #[error("handshake timed out")]
    Timeout,

    #[error("heartbeat lost: no traffic inside the liveness window")]
    HeartbeatLost,

    #[error("connection closed by the broker")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Synchronous publish failures. Callers must surface these, never
/// swallow them; there is no blocking wait for reconnection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("not connected to the broker")]
    NotConnected,

    #[error("transport rejected the frame: {0}")]
    Transport(String),
}

/// Rejections raised before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message body is empty")]
    Empty,
}

/// History / summary / search fetch failures. Recoverable: the caller
/// keeps an empty or partial view, never crashes.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("server returned status {0}")]
    Status(u16),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("fetch cancelled by navigation")]
    Cancelled,
}
