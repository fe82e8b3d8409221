//! Protocol messages.
//!
//! Every frame on a port is one JSON-encoded [`Message`], discriminated by
//! its `type` field. Tags and field names are the interoperability contract.

use crate::{State, Update};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A protocol message, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Server -> client. Full state, first message on every connection.
    Init { state: State },
    /// Server -> client. Shallow patch onto the mirrored state.
    Update { update: Update },
    /// Client -> server. Invoke a named handler; `uid` is present when a
    /// result is expected.
    Action {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uid: Option<u64>,
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Server -> client. Outcome of the action that carried `uid`.
    ActionResult {
        uid: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Server -> client. Named fire-and-forget notification.
    Directive {
        name: String,
        #[serde(default)]
        payload: Value,
    },
}

impl Message {
    /// A successful action result.
    pub fn action_ok(uid: u64, result: Value) -> Self {
        Self::ActionResult {
            uid,
            result: Some(result),
            error: None,
        }
    }

    /// A failed action result.
    pub fn action_err(uid: u64, error: impl Into<String>) -> Self {
        Self::ActionResult {
            uid,
            result: None,
            error: Some(error.into()),
        }
    }

    /// The tag this message carries on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Init { .. } => "INIT",
            Message::Update { .. } => "UPDATE",
            Message::Action { .. } => "ACTION",
            Message::ActionResult { .. } => "ACTION_RESULT",
            Message::Directive { .. } => "DIRECTIVE",
        }
    }

    pub fn encode(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(MessageError::Encode)
    }

    pub fn decode(frame: &str) -> Result<Self, MessageError> {
        serde_json::from_str(frame).map_err(MessageError::Decode)
    }
}

/// Error encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
}
