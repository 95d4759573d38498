//! Relay wire messages
//!
//! `{"type": "data"|"ack", "uuid", "recipient"?, "sender"?, "data"?}`
//!
//! Data frames carry the sender's relay id so the receiver can address the
//! acknowledgement back to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Data,
    Ack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    /// New data message with a fresh random id
    pub fn data(sender: &str, recipient: &str, data: Value) -> Self {
        Self {
            kind: MessageType::Data,
            uuid: Uuid::new_v4(),
            recipient: Some(recipient.to_string()),
            sender: Some(sender.to_string()),
            data: Some(data),
        }
    }

    pub fn ack(uuid: Uuid, recipient: Option<String>) -> Self {
        Self {
            kind: MessageType::Ack,
            uuid,
            recipient,
            sender: None,
            data: None,
        }
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::MalformedFrame(e.to_string()))
    }

    pub fn decode(frame: &str) -> Result<Self, TransportError> {
        serde_json::from_str(frame).map_err(|e| TransportError::MalformedFrame(e.to_string()))
    }
}
