//! Wire vocabulary shared by the tandem matchmaking server and its clients.
//! Keeping it in a dedicated crate lets the server and the negotiation client
//! agree on framing without either pulling in the other's runtime.

mod messages;
mod signal;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use messages::{ClientMessage, ServerMessage};
pub use signal::{DescriptionKind, IceCandidate, SessionDescription, SignalPayload};

/// Opaque participant token, unique for the lifetime of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a fresh UUID v4 backed id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ParticipantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
