//! Wire protocol message types.
//!
//! Four message kinds flow between two peers: `INIT` (handshake), `SET`
//! (object descriptor), `CALL` (invocation request) and `RETURN` (result).
//! Stream transports frame each message with a 4-byte big-endian length
//! header followed by the JSON body.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol message, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Handshake announcement. `reply` asks the other side to acknowledge.
    #[serde(rename = "INIT")]
    Init {
        #[serde(default)]
        reply: bool,
    },
    /// Descriptor of an object registered on the sending side.
    #[serde(rename = "SET")]
    Set {
        /// Public name of the object.
        object: String,
        /// Callable method names.
        #[serde(default)]
        methods: Vec<String>,
        /// Methods whose callers do not wait for a result.
        #[serde(rename = "void", default)]
        void_methods: Vec<String>,
    },
    /// Invocation request.
    #[serde(rename = "CALL")]
    Call {
        object: String,
        method: String,
        id: u64,
        #[serde(default)]
        args: Vec<Value>,
        #[serde(default)]
        reply: bool,
    },
    /// Result of a call. Exactly one of `result` / `error` is set.
    #[serde(rename = "RETURN")]
    Return {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WireMessage {
    /// Successful `RETURN` for call `id`.
    pub fn ok(id: u64, result: Value) -> Self {
        WireMessage::Return {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Failed `RETURN` for call `id`.
    pub fn err(id: u64, error: impl Into<String>) -> Self {
        WireMessage::Return {
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The `type` discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Init { .. } => "INIT",
            WireMessage::Set { .. } => "SET",
            WireMessage::Call { .. } => "CALL",
            WireMessage::Return { .. } => "RETURN",
        }
    }
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &WireMessage) -> Result<Vec<u8>, serde_json::Error> {
    let json = serde_json::to_vec(msg)?;
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a WireMessage.
pub fn decode_message(body: &[u8]) -> Result<WireMessage, serde_json::Error> {
    serde_json::from_slice(body)
}
