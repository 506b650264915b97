//! The request frame a client sends to ask the server to run a command.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RcError;

/// Per-command execution options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageOptions {
    /// Timeout in milliseconds. `0` means no timeout.
    #[serde(default)]
    pub timeout: u64,

    /// Working directory for the subprocess. Empty means inherit.
    #[serde(default)]
    pub cwd: String,

    /// Extra environment variables to set on the subprocess. A `BTreeMap`
    /// keeps key order deterministic so the encoded frame is byte-stable
    /// across re-encodes.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// A single shell command request, correlated by `id` to its [`Response`](crate::Response).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: u32,
    pub command: String,
    #[serde(default)]
    pub options: MessageOptions,
}

impl Message {
    pub fn new(id: u32, command: impl Into<String>, options: MessageOptions) -> Self {
        Self {
            id,
            command: command.into(),
            options,
        }
    }

    /// Encode to a canonical JSON text frame.
    pub fn to_frame(&self) -> Result<String, RcError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame received from a client.
    pub fn from_frame(frame: &str) -> Result<Self, RcError> {
        Ok(serde_json::from_str(frame)?)
    }
}
