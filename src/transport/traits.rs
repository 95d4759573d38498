//! Transport trait definitions

use super::TransportError;

/// One duplex link to the relay, outbound half.
///
/// Inbound frames are pushed into the channel by whoever owns the link; see
/// [`ReliableChannel::spawn_inbound`](super::ReliableChannel::spawn_inbound).
pub trait Connection: Send + Sync {
    /// Hand one encoded frame to the relay
    fn send_frame(&self, frame: &str) -> Result<(), TransportError>;
}
