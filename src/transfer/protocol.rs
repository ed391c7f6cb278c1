//! Wire format for relayed file transfer.
//!
//! Two frame kinds share one WebSocket:
//! - Text frames: JSON objects tagged by `type` (control messages)
//! - Binary frames: raw chunk bytes, no header; the WebSocket message
//!   boundary is the only delimiter between chunks
//!
//! No ACKs, no sequence numbers. Chunk order is the arrival order on the
//! single relayed stream.

use crate::error::{Result, TransferError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum payload of one binary frame.
pub const CHUNK_SIZE: usize = 64 * 1024; // 64KB

/// Field the relay routes on; merged into every outbound text frame.
pub const TARGET_ID_FIELD: &str = "target_id";

/// Content type used when the sender did not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// =============================================================================
// Control messages
// =============================================================================

/// Describes exactly one in-flight transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Binds a client-chosen id to the socket on the relay.
    Register {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    FileInfo(TransferMetadata),
    FileComplete { filename: String },
}

impl ControlMessage {
    /// Parse a control message out of an inbound JSON object.
    ///
    /// Returns `None` for objects with an unknown or missing `type`; relay
    /// traffic we don't understand is not an error for the protocol layer.
    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Serialize `message` with `target_id` merged in, overwriting any
/// `target_id` the caller put there.
pub fn encode_with_target<T: Serialize + ?Sized>(message: &T, target_id: &str) -> Result<String> {
    let mut object = match serde_json::to_value(message)? {
        Value::Object(map) => map,
        other => {
            return Err(TransferError::InvalidMessage(format!(
                "text frames must be JSON objects, got {}",
                json_kind(&other)
            )))
        }
    };
    object.insert(
        TARGET_ID_FIELD.to_string(),
        Value::String(target_id.to_string()),
    );
    Ok(serde_json::to_string(&Value::Object(object))?)
}

/// Parse an inbound text frame. Only JSON objects are accepted.
pub fn decode_text(text: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        other => Err(TransferError::InvalidMessage(format!(
            "expected JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Addressing
// =============================================================================

/// Generate a fresh local connection id.
///
/// Uniqueness is probabilistic; the relay never checks for collisions.
pub fn new_connection_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

// =============================================================================
// Progress accounting
// =============================================================================

/// Percentage of `total` covered by `done`, rounded half-up and capped at 100.
///
/// A zero `total` counts as complete.
pub fn progress_percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let total = total as u128;
    let rounded = (200 * done as u128 + total) / (2 * total);
    rounded.min(100) as u8
}

/// Number of binary frames a source of `size` bytes is split into.
pub fn chunk_count(size: u64) -> u64 {
    size.div_ceil(CHUNK_SIZE as u64)
}

// =============================================================================
// Tests
// =============================================================================
