//! # parley-shared
//!
//! Domain types, broker wire protocol and error taxonomy shared by the
//! messaging session crates.
//!
//! Nothing in this crate touches the network: it defines what a message,
//! a chat summary and a broker frame *are*, and how they serialize.

pub mod constants;
pub mod envelope;
pub mod protocol;
pub mod types;

mod error;

pub use envelope::{Envelope, Op};
pub use error::{FetchError, LinkError, SendError, ValidationError};
pub use protocol::{ErrorPayload, JoinPayload, MessagePayload, WireFrame};
pub use types::{
    ChatId, ChatMessage, ChatSummary, ConnectionState, DeliveryState, SearchResult, UserId,
};
