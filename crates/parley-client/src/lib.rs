//! # parley-client
//!
//! The messaging session core: connection lifecycle and reconnection
//! policy on top of the transport, the counterpart directory, per-chat
//! ordered message sequences, and the optimistic outbound path.
//!
//! Everything the UI layer needs is exposed through [`ChatSession`]:
//! operations are plain methods, "re-render on state change" is a
//! [`SessionEvent`] broadcast.

pub mod api;
pub mod composer;
pub mod directory;
pub mod events;
pub mod session;
pub mod stream;

pub use events::SessionEvent;
pub use session::{ChatSession, SessionConfig};
pub use stream::{AppendOutcome, MessageStream, ScrollAnchor};
