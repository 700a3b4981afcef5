// Broker transport layer: one WebSocket per connect, envelope framing,
// heartbeat liveness. Retry policy lives with the caller, never here.

mod link;
pub mod transport;

pub use transport::{Transport, TransportConfig, TransportEvent};
