use thiserror::Error;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("local media unavailable: {0}")]
    MediaUnavailable(String),
    #[error("media session error: {0}")]
    Media(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("negotiator is no longer running")]
    ChannelClosed,
    #[error("invalid signaling payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl NegotiationError {
    pub fn media(err: impl std::fmt::Display) -> Self {
        NegotiationError::Media(err.to_string())
    }
}
