//! Scripted media capability. Records every call so tests can assert on the
//! exact order in which the negotiator drove the session, and can optionally
//! emit the events a real transport would.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_proto::{DescriptionKind, IceCandidate, ParticipantId, SessionDescription};

use crate::error::NegotiationError;
use crate::media::{
    Connectivity, MediaEventKind, MediaEvents, MediaProvider, MediaRequest, MediaSession, Role,
    TrackKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Acquire {
        epoch: u64,
        peer: ParticipantId,
        role: Role,
    },
    CreateOffer {
        epoch: u64,
    },
    CreateAnswer {
        epoch: u64,
    },
    ApplyRemote {
        epoch: u64,
        kind: DescriptionKind,
        sdp: String,
    },
    AddCandidate {
        epoch: u64,
        candidate: String,
    },
    SendChat {
        epoch: u64,
        text: String,
    },
    SetTrack {
        epoch: u64,
        kind: TrackKind,
        enabled: bool,
    },
    Close {
        epoch: u64,
    },
}

#[derive(Debug, Clone, Default)]
struct MockOptions {
    fail_acquire: Option<String>,
    acquire_delay: Option<Duration>,
    auto_connect: bool,
    local_candidates: usize,
}

#[derive(Debug, Default)]
struct Shared {
    calls: Mutex<Vec<MockCall>>,
    events: Mutex<HashMap<u64, MediaEvents>>,
}

impl Shared {
    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }
}

/// Clones share one call log.
#[derive(Debug, Clone, Default)]
pub struct MockMediaProvider {
    options: MockOptions,
    shared: Arc<Shared>,
}

impl MockMediaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquisition fails with `MediaUnavailable(reason)`.
    pub fn failing_acquire(mut self, reason: impl Into<String>) -> Self {
        self.options.fail_acquire = Some(reason.into());
        self
    }

    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.options.acquire_delay = Some(delay);
        self
    }

    /// Report `Connected` plus an open chat channel once the local side has
    /// both descriptions in place.
    pub fn with_auto_connect(mut self) -> Self {
        self.options.auto_connect = true;
        self
    }

    /// Emit `count` local candidates after each offer or answer.
    pub fn with_local_candidates(mut self, count: usize) -> Self {
        self.options.local_candidates = count;
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.calls.lock().clone()
    }

    /// Event sink handed to the session for `epoch`, for injecting
    /// transport events from a test.
    pub fn events_for(&self, epoch: u64) -> Option<MediaEvents> {
        self.shared.events.lock().get(&epoch).cloned()
    }
}

#[async_trait]
impl MediaProvider for MockMediaProvider {
    async fn acquire(
        &self,
        request: MediaRequest,
        events: MediaEvents,
    ) -> Result<Box<dyn MediaSession>, NegotiationError> {
        let epoch = request.epoch;
        self.shared.record(MockCall::Acquire {
            epoch,
            peer: request.peer,
            role: request.role,
        });
        if let Some(delay) = self.options.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.options.fail_acquire {
            return Err(NegotiationError::MediaUnavailable(reason.clone()));
        }
        self.shared.events.lock().insert(events.epoch(), events.clone());
        Ok(Box::new(MockSession {
            epoch,
            options: self.options.clone(),
            shared: Arc::clone(&self.shared),
            events,
            closed: false,
        }))
    }
}

struct MockSession {
    epoch: u64,
    options: MockOptions,
    shared: Arc<Shared>,
    events: MediaEvents,
    closed: bool,
}

impl MockSession {
    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed {
            Err(NegotiationError::Media("session closed".into()))
        } else {
            Ok(())
        }
    }

    fn emit_local_candidates(&self) {
        for idx in 0..self.options.local_candidates {
            let mut candidate = IceCandidate::new(format!("mock-candidate-{}-{idx}", self.epoch));
            candidate.sdp_mid = Some("0".into());
            candidate.sdp_mline_index = Some(0);
            self.events.emit(MediaEventKind::LocalCandidate(candidate));
        }
    }

    fn announce_connected(&self) {
        if self.options.auto_connect {
            self.events
                .emit(MediaEventKind::Connectivity(Connectivity::Connected));
            self.events.emit(MediaEventKind::ChannelOpened);
        }
    }
}

#[async_trait]
impl MediaSession for MockSession {
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        self.shared.record(MockCall::CreateOffer { epoch: self.epoch });
        self.emit_local_candidates();
        Ok(SessionDescription::offer(format!("mock-offer-{}", self.epoch)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        self.shared.record(MockCall::CreateAnswer { epoch: self.epoch });
        self.emit_local_candidates();
        self.announce_connected();
        Ok(SessionDescription::answer(format!("mock-answer-{}", self.epoch)))
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let kind = description.kind;
        self.shared.record(MockCall::ApplyRemote {
            epoch: self.epoch,
            kind,
            sdp: description.sdp,
        });
        if kind == DescriptionKind::Answer {
            self.announce_connected();
        }
        Ok(())
    }

    async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.shared.record(MockCall::AddCandidate {
            epoch: self.epoch,
            candidate: candidate.candidate,
        });
        Ok(())
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.shared.record(MockCall::SendChat {
            epoch: self.epoch,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn set_track_enabled(
        &mut self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.shared.record(MockCall::SetTrack {
            epoch: self.epoch,
            kind,
            enabled,
        });
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.shared.record(MockCall::Close { epoch: self.epoch });
        }
    }
}
