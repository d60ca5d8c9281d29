//! Gateway opcodes, event names, close codes and wire-format messages.

use axum::extract::ws::Utf8Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::ChatError;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_SUBMIT_COMMENT: u8 = 4;
pub const OP_DELETE_COMMENT: u8 = 5;
pub const OP_HEARTBEAT_ACK: u8 = 6;
pub const OP_BLOCK_IP: u8 = 8;
pub const OP_REQUEST_VIEWER_COUNT: u8 = 9;
pub const OP_REPLY: u8 = 10;
pub const OP_UPDATE_MATCH_INFO: u8 = 11;
pub const OP_CLEAR_MATCH_INFO: u8 = 12;
pub const OP_REQUEST_MATCH_INFO: u8 = 13;

// ---------------------------------------------------------------------------
// Close codes (4000-range for application-level)
// ---------------------------------------------------------------------------

pub const CLOSE_UNKNOWN_ERROR: u16 = 4000;
pub const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
pub const CLOSE_DECODE_ERROR: u16 = 4002;
pub const CLOSE_BLOCKED: u16 = 4005;
pub const CLOSE_SLOW_CONSUMER: u16 = 4008;
pub const CLOSE_IDLE_TIMEOUT: u16 = 4009;

/// Code and reason for a server-initiated close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseReason {
    pub const BLOCKED: Self = Self {
        code: CLOSE_BLOCKED,
        reason: "Blocked",
    };
    pub const SLOW_CONSUMER: Self = Self {
        code: CLOSE_SLOW_CONSUMER,
        reason: "Too slow to keep up",
    };
    pub const IDLE_TIMEOUT: Self = Self {
        code: CLOSE_IDLE_TIMEOUT,
        reason: "Idle timeout",
    };
    pub const UNKNOWN_OPCODE: Self = Self {
        code: CLOSE_UNKNOWN_OPCODE,
        reason: "Unknown opcode",
    };
    pub const DECODE_ERROR: Self = Self {
        code: CLOSE_DECODE_ERROR,
        reason: "Invalid JSON",
    };
    pub const UNKNOWN_ERROR: Self = Self {
        code: CLOSE_UNKNOWN_ERROR,
        reason: "Unknown error",
    };
}

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
    /// Echo of the client's request nonce on REPLY.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0). `seq` is set on hub broadcasts only.
    pub fn dispatch(event_name: &str, seq: Option<u64>, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: seq,
            d: data,
            n: None,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack() -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: Value::Null,
            n: None,
        }
    }

    /// Successful REPLY (op=10). `data` must be a JSON object; `ok: true` is merged in.
    pub fn reply_ok(nonce: Option<String>, data: Value) -> Self {
        let mut d = match data {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        d.insert("ok".to_string(), Value::Bool(true));
        Self {
            op: OP_REPLY,
            t: None,
            s: None,
            d: Value::Object(d),
            n: nonce,
        }
    }

    /// Failed REPLY (op=10) carrying the client-facing error body.
    pub fn reply_err(nonce: Option<String>, err: &ChatError) -> Self {
        Self {
            op: OP_REPLY,
            t: None,
            s: None,
            d: serde_json::json!({ "ok": false, "error": err.detail() }),
            n: nonce,
        }
    }

    /// Render once so the same frame can be shared by every recipient.
    pub fn to_text(&self) -> Utf8Bytes {
        serde_json::to_string(self)
            .expect("gateway messages always serialize")
            .into()
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    /// Optional request nonce, echoed back on the REPLY.
    #[serde(default)]
    pub n: Option<String>,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct SubmitCommentPayload {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteCommentPayload {
    pub comment_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BlockIpPayload {
    pub ip_address: String,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Admin update of the match shown to viewers. Also the REST request body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MatchInfoPayload {
    pub match_number: u32,
    pub red_weight: f64,
    pub blue_weight: f64,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const COMMENT_CREATE: &'static str = "COMMENT_CREATE";
    pub const COMMENT_DELETE: &'static str = "COMMENT_DELETE";
    pub const VIEWER_COUNT: &'static str = "VIEWER_COUNT";
    pub const IP_BLOCKED: &'static str = "IP_BLOCKED";
    pub const CHANNEL_STATUS: &'static str = "CHANNEL_STATUS";
    pub const MATCH_INFO: &'static str = "MATCH_INFO";
}
