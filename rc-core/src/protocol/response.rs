//! The response frame the server sends back after running a command.

use serde::{Deserialize, Serialize};

use crate::error::RcError;

/// Result of running a single [`Message`](crate::Message).
///
/// `id` echoes the originating message's id as a decimal string — the
/// sole correlation mechanism on a session that may carry many
/// outstanding requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(rename = "exitCode", default)]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
}

impl Response {
    /// Encode to a canonical JSON text frame.
    pub fn to_frame(&self) -> Result<String, RcError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame received from the server.
    pub fn from_frame(frame: &str) -> Result<Self, RcError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Stamp the response with the originating message id, overwriting
    /// whatever the executor produced — the id is solely the
    /// connection handler's concern, never the executor's.
    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id.to_string();
        self
    }

    /// Build an error response: whatever a command would have returned
    /// had it failed outright, carrying the error text on stderr.
    pub fn error(id: u32, message: impl Into<String>) -> Self {
        Self {
            id: id.to_string(),
            stdout: String::new(),
            stderr: message.into(),
            exit_code: -1,
            signal: None,
        }
    }
}
