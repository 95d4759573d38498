//! WebSocket connection to a network relay

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use super::reliable::ReliableChannel;
use super::traits::Connection;
use super::TransportError;

/// Outbound half of a relay WebSocket
pub struct WsLink {
    outgoing: mpsc::UnboundedSender<String>,
}

impl Connection for WsLink {
    fn send_frame(&self, frame: &str) -> Result<(), TransportError> {
        self.outgoing
            .send(frame.to_string())
            .map_err(|_| TransportError::SendFailed("websocket closed".into()))
    }
}

/// Connect `channel` to the relay at `relay_url`, registering under the
/// channel's local id.
///
/// The channel is attached once the socket is up and detached again when
/// it fails; reconnecting is left to the caller.
pub async fn connect(relay_url: &str, channel: &ReliableChannel) -> Result<(), TransportError> {
    let url = format!("{}/?id={}", relay_url.trim_end_matches('/'), channel.local_id());
    let (socket, _) = connect_async(url.as_str())
        .await
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
    let (mut sink, mut stream) = socket.split();
    let (outgoing, mut queued) = mpsc::unbounded_channel::<String>();

    let writer_channel = channel.clone();
    tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if let Err(e) = sink.send(WsMessage::Text(frame)).await {
                tracing::warn!(%e, "relay write failed");
                writer_channel.attach(None);
                break;
            }
        }
    });

    let reader_channel = channel.clone();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(WsMessage::Text(frame)) => reader_channel.on_frame(&frame),
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(%e, "relay read failed");
                    break;
                }
            }
        }
        reader_channel.attach(None);
        tracing::info!("relay connection closed");
    });

    channel.attach(Some(Arc::new(WsLink { outgoing })));
    tracing::info!(relay = %relay_url, "connected to relay");
    Ok(())
}
