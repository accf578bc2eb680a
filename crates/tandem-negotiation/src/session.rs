use tandem_proto::{IceCandidate, ParticipantId, SignalPayload};

use crate::media::{MediaSession, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Acquiring,
    Negotiating,
    Connected,
    Failed,
}

/// Per-pairing state. Dropped as a whole when the pairing ends, which is what
/// keeps buffers and guards from leaking into the next pairing.
pub struct NegotiationSession {
    pub(crate) peer: ParticipantId,
    pub(crate) peer_name: String,
    pub(crate) role: Role,
    pub(crate) epoch: u64,
    pub(crate) phase: Phase,
    pub(crate) remote_applied: bool,
    pub(crate) awaiting_answer: bool,
    pending_candidates: Vec<IceCandidate>,
    pending_inbound: Vec<SignalPayload>,
    pub(crate) media: Option<Box<dyn MediaSession>>,
}

impl NegotiationSession {
    pub fn new(peer: ParticipantId, peer_name: String, role: Role, epoch: u64) -> Self {
        Self {
            peer,
            peer_name,
            role,
            epoch,
            phase: Phase::Acquiring,
            remote_applied: false,
            awaiting_answer: false,
            pending_candidates: Vec::new(),
            pending_inbound: Vec::new(),
            media: None,
        }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_for(&self, peer: &ParticipantId) -> bool {
        &self.peer == peer
    }

    /// Whether an inbound offer may be applied.
    pub fn accepts_offer(&self) -> bool {
        self.role == Role::Responder && !self.remote_applied
    }

    /// Whether an inbound answer may be applied.
    pub fn accepts_answer(&self) -> bool {
        self.role == Role::Initiator && self.awaiting_answer && !self.remote_applied
    }

    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.pending_candidates.push(candidate);
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Drain buffered candidates in arrival order.
    pub fn take_pending_candidates(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending_candidates)
    }

    pub fn hold_inbound(&mut self, payload: SignalPayload) {
        self.pending_inbound.push(payload);
    }

    pub fn take_pending_inbound(&mut self) -> Vec<SignalPayload> {
        std::mem::take(&mut self.pending_inbound)
    }
}

impl std::fmt::Debug for NegotiationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationSession")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("phase", &self.phase)
            .field("remote_applied", &self.remote_applied)
            .field("awaiting_answer", &self.awaiting_answer)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("pending_inbound", &self.pending_inbound.len())
            .field("has_media", &self.media.is_some())
            .finish()
    }
}
