//! Ports, bindings and the data travelling between blocks
//!
//! A port is an integer chosen by the source block. Each block owns an
//! ordered list of [`BindInfo`] entries that map a port to a destination
//! block; the manager walks these lists to route a [`Payload`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::BlockId;

/// Port number used to select the next binding of a block
pub type Port = i32;

/// Port returned by a handler to end its flow; the data is dropped
pub const PORT_STOP: Port = 0;

/// One outbound route of a block
///
/// The destination is stored by identifier only and resolved through the
/// manager's live map every time a flow crosses the binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindInfo {
    /// Port of the source block
    pub port: Port,
    /// Destination block (`BlockId::SINK` ends the flow)
    pub dest: BlockId,
}

impl BindInfo {
    /// Create a new binding
    pub fn new(port: Port, dest: BlockId) -> Self {
        Self { port, dest }
    }
}

/// Data carried by a flow or attached to a timer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// No data
    #[default]
    Empty,
    /// Raw buffer
    Bytes(Vec<u8>),
    /// Text message
    Text(String),
    /// Structured message
    Json(JsonValue),
}

impl Payload {
    /// Check if the payload carries nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the payload in bytes (serialized size for JSON)
    pub fn len(&self) -> usize {
        match self {
            Payload::Empty => 0,
            Payload::Bytes(buf) => buf.len(),
            Payload::Text(text) => text.len(),
            Payload::Json(value) => value.to_string().len(),
        }
    }

    /// View the payload as bytes when it is a buffer or a text
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(buf) => Some(buf),
            Payload::Text(text) => Some(text.as_bytes()),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(buf: Vec<u8>) -> Self {
        Payload::Bytes(buf)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<JsonValue> for Payload {
    fn from(value: JsonValue) -> Self {
        Payload::Json(value)
    }
}
