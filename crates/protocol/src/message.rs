//! Messages as the pipeline service represents them on the wire.
//!
//! Field names are PascalCase in JSON and snake_case in memory; every
//! driver maps to this one shape.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ── Route-log codes ──────────────────────────────────────────────────────────

/// Route-log code recorded when a step finishes normally.
pub const CODE_COMPLETED: i32 = 0;
/// Route-log code recorded when a message handler fails.
pub const CODE_FAILED: i32 = -1;

// ── Wire shapes ──────────────────────────────────────────────────────────────

/// One delivery of a message to a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Event {
    /// Identifier assigned by the service at send time.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub r#type: String,
    /// Epoch seconds.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub expires_at: u64,
    /// Free-form context attached by the service.
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub message: MessageEnvelope,
}

impl Event {
    /// Decode the raw payload as JSON.
    pub fn payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.message.payload)
    }

    /// Decode the decorated payload as JSON.
    pub fn decorated_payload_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.message.decorated_payload)
    }
}

/// Payload plus the routing state the service tracks for it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MessageEnvelope {
    /// Opaque JSON payload as handed to `send`.
    #[serde(default)]
    pub payload: String,
    /// Payload with decorations folded in, maintained by the service.
    #[serde(default)]
    pub decorated_payload: String,
    /// Ordered step names the message traverses. Fixed at send time except
    /// for explicit route edits.
    #[serde(default)]
    pub route: Vec<String>,
    /// Steps completed so far, in completion order. Only grows.
    #[serde(default)]
    pub completed_steps: Vec<String>,
    /// Per-step audit trail. Append-only.
    #[serde(default)]
    pub route_log: Vec<RouteLog>,
}

/// One route-log entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RouteLog {
    #[serde(default)]
    pub step: String,
    /// `0` normal completion, `-1` handler failure, anything else is
    /// application-defined.
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    /// Epoch seconds.
    #[serde(default)]
    pub logged_at: u64,
}

impl RouteLog {
    #[must_use]
    pub fn new(step: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            code,
            message: message.into(),
            logged_at: now_secs(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
