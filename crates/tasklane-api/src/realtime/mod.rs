//! Realtime change feed over a persistent WebSocket.
//!
//! [`RealtimeClient`] owns the connection lifecycle, [`EventDispatcher`]
//! turns inbound frames into typed [`RealtimeEvent`]s on a bounded channel,
//! and [`protocol`] holds the channel-join wire format.

mod connection;
mod dispatch;
mod event;
pub mod protocol;

pub use connection::{ConnectionPhase, RealtimeClient, RealtimeConfig};
pub use dispatch::{EventDispatcher, JoinStatus};
pub use event::RealtimeEvent;
