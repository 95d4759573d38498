//! Transport layer for dicechain
//!
//! Participants never talk to each other directly. Every frame goes through
//! a relay that forwards it to the connection registered under the frame's
//! recipient, on a best-effort basis:
//! - [`ReliableChannel`] turns that into at-least-once, deduplicated delivery
//! - [`LocalRelay`] is an in-process relay for simulations and tests
//! - `ws_client` connects a channel to a WebSocket relay (feature `ws-client`)

pub mod local_relay;
pub mod message;
pub mod reliable;
pub mod traits;

#[cfg(feature = "ws-client")]
pub mod ws_client;

use thiserror::Error;

pub use local_relay::LocalRelay;
pub use message::{Message, MessageType};
pub use reliable::{ChannelStats, Delivery, ReliableChannel, RetrySchedule};
pub use traits::Connection;

/// Transport-specific error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("invalid relay id: {0:?}")]
    InvalidId(String),

    #[error("relay id already taken: {0}")]
    IdTaken(String),

    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::SendFailed(_) => "SEND_FAILED",
            Self::MalformedFrame(_) => "MALFORMED_FRAME",
            Self::InvalidId(_) => "INVALID_ID",
            Self::IdTaken(_) => "ID_TAKEN",
            Self::NotConnected => "NOT_CONNECTED",
        }
    }
}
