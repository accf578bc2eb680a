//! The media capability the negotiator drives. Capture, encoding and the
//! real-time transport live behind these traits; the negotiator only sees
//! session descriptions, candidates and a handful of connectivity events.

use async_trait::async_trait;
use tandem_proto::{IceCandidate, ParticipantId, SessionDescription};
use tokio::sync::mpsc;

use crate::error::NegotiationError;
use crate::machine::Input;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn from_initiator_flag(initiator: bool) -> Self {
        if initiator {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Failed,
}

/// What the negotiator asks for when a pairing starts.
#[derive(Debug, Clone)]
pub struct MediaRequest {
    pub epoch: u64,
    pub peer: ParticipantId,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaEventKind {
    LocalCandidate(IceCandidate),
    Connectivity(Connectivity),
    ChannelOpened,
    ChannelClosed,
    ChatReceived(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaEvent {
    pub epoch: u64,
    pub kind: MediaEventKind,
}

/// Sink handed to a media session for reporting asynchronous happenings.
/// Every event is stamped with the epoch of the session it belongs to, so
/// reports from a torn-down session are discarded by the negotiator.
#[derive(Debug, Clone)]
pub struct MediaEvents {
    epoch: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl MediaEvents {
    pub(crate) fn new(epoch: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { epoch, tx }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the negotiator has gone away.
    pub fn emit(&self, kind: MediaEventKind) -> bool {
        self.tx
            .send(Input::Media(MediaEvent {
                epoch: self.epoch,
                kind,
            }))
            .is_ok()
    }
}

#[async_trait]
pub trait MediaProvider: Send + Sync + 'static {
    /// Acquire local media and open a session bound to one peer and epoch.
    async fn acquire(
        &self,
        request: MediaRequest,
        events: MediaEvents,
    ) -> Result<Box<dyn MediaSession>, NegotiationError>;
}

#[async_trait]
pub trait MediaSession: Send {
    /// Create an offer and install it as the local description.
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;

    /// Create an answer to the applied remote offer and install it locally.
    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError>;

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_remote_candidate(&mut self, candidate: IceCandidate)
        -> Result<(), NegotiationError>;

    async fn send_chat(&mut self, text: &str) -> Result<(), NegotiationError>;

    async fn set_track_enabled(
        &mut self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), NegotiationError>;

    /// Stop local media and close the transport. Must be idempotent.
    async fn close(&mut self);
}
