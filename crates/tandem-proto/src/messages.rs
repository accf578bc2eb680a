use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ParticipantId;

/// Messages sent from a participant to the matchmaking server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Change the display name shown to future peers
    #[serde(rename = "setUsername")]
    SetUsername {
        #[serde(default)]
        username: String,
    },
    /// Enter the waiting queue
    #[serde(rename = "ready")]
    Ready,
    /// Drop the current peer and wait for another
    #[serde(rename = "next")]
    Next,
    /// Drop the current peer and stop waiting
    #[serde(rename = "leave")]
    Leave,
    /// Opaque negotiation payload for another participant
    #[serde(rename = "signal")]
    Signal {
        to: ParticipantId,
        #[serde(default)]
        data: Value,
    },
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::SetUsername { .. } => "setUsername",
            ClientMessage::Ready => "ready",
            ClientMessage::Next => "next",
            ClientMessage::Leave => "leave",
            ClientMessage::Signal { .. } => "signal",
        }
    }
}

/// Messages sent from the matchmaking server to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once, right after the connection is admitted
    #[serde(rename = "id")]
    Id { id: ParticipantId },
    /// Connected participants plus queue depth
    #[serde(rename = "onlineCount")]
    OnlineCount {
        count: usize,
        #[serde(rename = "queueCount")]
        queue_count: usize,
    },
    /// Queue depth only
    #[serde(rename = "queueCount")]
    QueueCount { count: usize },
    /// A peer was assigned; exactly one side has `initiator` set
    #[serde(rename = "matched")]
    Matched {
        #[serde(rename = "peerId")]
        peer_id: ParticipantId,
        #[serde(rename = "peerUsername")]
        peer_username: String,
        initiator: bool,
    },
    /// Negotiation payload relayed from another participant
    #[serde(rename = "signal")]
    Signal { from: ParticipantId, data: Value },
    /// The current peer is gone
    #[serde(rename = "partner_left")]
    PartnerLeft,
}

impl ServerMessage {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Id { .. } => "id",
            ServerMessage::OnlineCount { .. } => "onlineCount",
            ServerMessage::QueueCount { .. } => "queueCount",
            ServerMessage::Matched { .. } => "matched",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::PartnerLeft => "partner_left",
        }
    }
}
