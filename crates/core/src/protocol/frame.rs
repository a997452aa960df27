//! Wire frame: `{type, action, payload, requestId?}` as a single JSON text
//! message per WebSocket frame.
//!
//! The envelope is decoded once at the connection boundary; everything past
//! that decodes `payload` into the per-action structure it actually needs.
//! Keeping `payload` dynamic (`serde_json::Value`) here, and only here, is
//! what lets one router cover four very different action families without
//! a combinatorial enum.

use crate::error::AgentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level frame category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Auth,
    Pty,
    Service,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl Frame {
    pub fn new(frame_type: FrameType, action: impl Into<String>, payload: Value) -> Self {
        Self {
            frame_type,
            action: action.into(),
            payload,
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn system_error(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::new(
            FrameType::System,
            "error",
            serde_json::json!({ "error": message.into() }),
        )
        .with_request_id(request_id)
    }

    /// Deserialize the envelope from a single text WebSocket message.
    pub fn decode(text: &str) -> Result<Self, AgentError> {
        serde_json::from_str(text).map_err(|e| AgentError::MalformedFrame(e.to_string()))
    }

    /// Serialize back to a single text WebSocket message.
    pub fn encode(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode `payload` into a concrete action-specific structure.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, AgentError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| AgentError::MalformedFrame(e.to_string()))
    }
}
