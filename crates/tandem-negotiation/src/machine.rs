use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tandem_proto::{
    ClientMessage, IceCandidate, ParticipantId, ServerMessage, SessionDescription, SignalPayload,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::NegotiationError;
use crate::media::{
    Connectivity, MediaEvent, MediaEventKind, MediaEvents, MediaProvider, MediaRequest,
    MediaSession, Role, TrackKind,
};
use crate::session::{NegotiationSession, Phase};

const LOG_TARGET: &str = "tandem::negotiation";

#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    /// Announced with `setUsername` as soon as the server assigns an id.
    pub username: Option<String>,
    /// How long a pairing may sit in `Negotiating` before it is reported as
    /// lost. `None` disables the check.
    pub stall_timeout: Option<Duration>,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            username: None,
            stall_timeout: Some(Duration::from_secs(20)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ready,
    Next,
    Leave,
    SetUsername(String),
    SendChat(String),
    SetTrackEnabled { kind: TrackKind, enabled: bool },
    Shutdown,
}

/// Everything the negotiator reacts to, consumed strictly in order.
pub enum Input {
    Server(ServerMessage),
    Command(Command),
    MediaReady {
        epoch: u64,
        result: Result<Box<dyn MediaSession>, NegotiationError>,
    },
    Media(MediaEvent),
    StallCheck {
        epoch: u64,
    },
    ServerClosed,
}

impl fmt::Debug for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Input::Server(message) => f.debug_tuple("Server").field(message).finish(),
            Input::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Input::MediaReady { epoch, result } => f
                .debug_struct("MediaReady")
                .field("epoch", epoch)
                .field("ok", &result.is_ok())
                .finish(),
            Input::Media(event) => f.debug_tuple("Media").field(event).finish(),
            Input::StallCheck { epoch } => {
                f.debug_struct("StallCheck").field("epoch", epoch).finish()
            }
            Input::ServerClosed => f.write_str("ServerClosed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub online: usize,
    pub queued: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerLostReason {
    Disconnected,
    Failed,
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Assigned {
        id: ParticipantId,
    },
    Presence(Presence),
    Matched {
        peer: ParticipantId,
        peer_name: String,
        initiator: bool,
    },
    Connected {
        peer: ParticipantId,
    },
    PeerLost {
        peer: ParticipantId,
        reason: PeerLostReason,
    },
    PartnerLeft,
    MediaUnavailable {
        reason: String,
    },
    ChatOpened,
    ChatClosed,
    Chat {
        from: ParticipantId,
        text: String,
    },
    Diagnostic(String),
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

struct Outputs {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Outputs {
    fn send(&self, message: ClientMessage) {
        let kind = message.kind();
        if self.outbound.send(message).is_err() {
            debug!(target: LOG_TARGET, kind, "signaling writer gone; dropping message");
        }
    }

    fn signal(&self, to: &ParticipantId, payload: SignalPayload) {
        match payload.to_value() {
            Ok(data) => {
                debug!(target: LOG_TARGET, peer = %to.short(), kind = payload.kind(), "sending signal");
                self.send(ClientMessage::Signal {
                    to: to.clone(),
                    data,
                });
            }
            Err(err) => self.diagnostic(format!("failed to encode {}: {err}", payload.kind())),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn diagnostic(&self, message: String) {
        debug!(target: LOG_TARGET, "{message}");
        self.emit(SessionEvent::Diagnostic(message));
    }
}

#[derive(Debug, Clone, Copy)]
struct TrackPreferences {
    audio: bool,
    video: bool,
}

impl TrackPreferences {
    fn set(&mut self, kind: TrackKind, enabled: bool) {
        match kind {
            TrackKind::Audio => self.audio = enabled,
            TrackKind::Video => self.video = enabled,
        }
    }

    fn disabled(&self) -> Vec<TrackKind> {
        let mut kinds = Vec::new();
        if !self.audio {
            kinds.push(TrackKind::Audio);
        }
        if !self.video {
            kinds.push(TrackKind::Video);
        }
        kinds
    }
}

/// Client-side negotiation state machine. Owns at most one
/// [`NegotiationSession`] and reacts to one [`Input`] at a time.
pub struct Negotiator {
    provider: Arc<dyn MediaProvider>,
    config: NegotiatorConfig,
    out: Outputs,
    loopback: mpsc::UnboundedSender<Input>,
    self_id: Option<ParticipantId>,
    presence: Presence,
    tracks: TrackPreferences,
    last_epoch: u64,
    session: Option<NegotiationSession>,
}

impl Negotiator {
    /// `loopback` feeds the negotiator's own input queue; spawned media
    /// acquisition and stall timers report back through it.
    pub fn new(
        provider: Arc<dyn MediaProvider>,
        config: NegotiatorConfig,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        events: mpsc::UnboundedSender<SessionEvent>,
        loopback: mpsc::UnboundedSender<Input>,
    ) -> Self {
        Self {
            provider,
            config,
            out: Outputs { outbound, events },
            loopback,
            self_id: None,
            presence: Presence::default(),
            tracks: TrackPreferences {
                audio: true,
                video: true,
            },
            last_epoch: 0,
            session: None,
        }
    }

    pub fn self_id(&self) -> Option<&ParticipantId> {
        self.self_id.as_ref()
    }

    pub fn presence(&self) -> Presence {
        self.presence
    }

    pub fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map(NegotiationSession::phase)
            .unwrap_or(Phase::Idle)
    }

    pub fn session(&self) -> Option<&NegotiationSession> {
        self.session.as_ref()
    }

    pub async fn handle(&mut self, input: Input) -> Flow {
        match input {
            Input::Server(message) => self.on_server(message).await,
            Input::Command(command) => return self.on_command(command).await,
            Input::MediaReady { epoch, result } => self.on_media_ready(epoch, result).await,
            Input::Media(event) => self.on_media_event(event),
            Input::StallCheck { epoch } => self.on_stall_check(epoch),
            Input::ServerClosed => {
                self.teardown("signaling closed").await;
                self.out.emit(SessionEvent::Disconnected);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn on_server(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Id { id } => {
                info!(target: LOG_TARGET, participant = %id, "assigned participant id");
                self.self_id = Some(id.clone());
                self.out.emit(SessionEvent::Assigned { id });
                if let Some(username) = self.config.username.clone() {
                    self.out.send(ClientMessage::SetUsername { username });
                }
            }
            ServerMessage::OnlineCount { count, queue_count } => {
                self.presence = Presence {
                    online: count,
                    queued: queue_count,
                };
                self.out.emit(SessionEvent::Presence(self.presence));
            }
            ServerMessage::QueueCount { count } => {
                self.presence.queued = count;
                self.out.emit(SessionEvent::Presence(self.presence));
            }
            ServerMessage::Matched {
                peer_id,
                peer_username,
                initiator,
            } => self.on_matched(peer_id, peer_username, initiator).await,
            ServerMessage::Signal { from, data } => self.on_signal(from, data).await,
            ServerMessage::PartnerLeft => {
                if self.session.is_none() {
                    debug!(target: LOG_TARGET, "partner_left without an active pairing");
                }
                self.teardown("partner left").await;
                self.out.emit(SessionEvent::PartnerLeft);
            }
        }
    }

    async fn on_matched(&mut self, peer: ParticipantId, peer_name: String, initiator: bool) {
        self.teardown("superseded by a new pairing").await;

        self.last_epoch += 1;
        let epoch = self.last_epoch;
        let role = Role::from_initiator_flag(initiator);
        info!(
            target: LOG_TARGET,
            peer = %peer,
            epoch,
            ?role,
            "matched with peer"
        );
        self.session = Some(NegotiationSession::new(
            peer.clone(),
            peer_name.clone(),
            role,
            epoch,
        ));
        self.out.emit(SessionEvent::Matched {
            peer: peer.clone(),
            peer_name,
            initiator,
        });

        let provider = Arc::clone(&self.provider);
        let loopback = self.loopback.clone();
        let events = MediaEvents::new(epoch, self.loopback.clone());
        let request = MediaRequest { epoch, peer, role };
        tokio::spawn(async move {
            let result = provider.acquire(request, events).await;
            let _ = loopback.send(Input::MediaReady { epoch, result });
        });

        if let Some(timeout) = self.config.stall_timeout {
            let loopback = self.loopback.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = loopback.send(Input::StallCheck { epoch });
            });
        }
    }

    async fn on_signal(&mut self, from: ParticipantId, data: Value) {
        let phase = match self.session.as_ref() {
            None => {
                self.out
                    .diagnostic(format!("ignoring signal from {}: not paired", from.short()));
                return;
            }
            Some(session) if !session.is_for(&from) => {
                self.out.diagnostic(format!(
                    "ignoring signal from {}: paired with {}",
                    from.short(),
                    session.peer().short()
                ));
                return;
            }
            Some(session) => session.phase(),
        };

        let payload = match SignalPayload::from_value(&data) {
            Ok(payload) => payload,
            Err(err) => {
                self.out
                    .diagnostic(format!("undecodable signal from {}: {err}", from.short()));
                return;
            }
        };

        match phase {
            Phase::Acquiring => {
                if let Some(session) = self.session.as_mut() {
                    debug!(
                        target: LOG_TARGET,
                        kind = payload.kind(),
                        "holding signal until local media is ready"
                    );
                    session.hold_inbound(payload);
                }
            }
            Phase::Negotiating | Phase::Connected => self.apply_signal(payload).await,
            Phase::Failed | Phase::Idle => {
                self.out.diagnostic(format!(
                    "ignoring {} signal: session is not negotiating",
                    payload.kind()
                ));
            }
        }
    }

    async fn apply_signal(&mut self, payload: SignalPayload) {
        match payload {
            SignalPayload::Offer { sdp } => self.on_remote_offer(sdp).await,
            SignalPayload::Answer { sdp } => self.on_remote_answer(sdp).await,
            SignalPayload::Candidate { candidate } => self.on_remote_candidate(candidate).await,
        }
    }

    async fn on_remote_offer(&mut self, sdp: SessionDescription) {
        let out = &self.out;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.accepts_offer() {
            let why = if session.role() == Role::Initiator {
                "glare: local side is the initiator"
            } else {
                "remote description already applied"
            };
            out.diagnostic(format!("ignoring offer from {}: {why}", session.peer().short()));
            return;
        }
        let Some(media) = session.media.as_mut() else {
            return;
        };
        if let Err(err) = media.apply_remote_description(sdp).await {
            out.diagnostic(format!("failed to apply remote offer: {err}"));
            mark_lost(session, out, PeerLostReason::Failed);
            return;
        }
        session.remote_applied = true;
        flush_candidates(session, out).await;

        let Some(media) = session.media.as_mut() else {
            return;
        };
        match media.create_answer().await {
            Ok(answer) => out.signal(&session.peer, SignalPayload::Answer { sdp: answer }),
            Err(err) => {
                out.diagnostic(format!("failed to create answer: {err}"));
                mark_lost(session, out, PeerLostReason::Failed);
            }
        }
    }

    async fn on_remote_answer(&mut self, sdp: SessionDescription) {
        let out = &self.out;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.accepts_answer() {
            out.diagnostic(format!(
                "ignoring unexpected answer from {}",
                session.peer().short()
            ));
            return;
        }
        let Some(media) = session.media.as_mut() else {
            return;
        };
        if let Err(err) = media.apply_remote_description(sdp).await {
            out.diagnostic(format!("failed to apply remote answer: {err}"));
            mark_lost(session, out, PeerLostReason::Failed);
            return;
        }
        session.remote_applied = true;
        session.awaiting_answer = false;
        flush_candidates(session, out).await;
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let out = &self.out;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.remote_applied {
            session.buffer_candidate(candidate);
            debug!(
                target: LOG_TARGET,
                buffered = session.pending_candidate_count(),
                "buffering candidate until remote description is applied"
            );
            return;
        }
        if let Some(media) = session.media.as_mut() {
            if let Err(err) = media.add_remote_candidate(candidate).await {
                out.diagnostic(format!("failed to apply remote candidate: {err}"));
            }
        }
    }

    async fn on_media_ready(
        &mut self,
        epoch: u64,
        result: Result<Box<dyn MediaSession>, NegotiationError>,
    ) {
        if self.session.as_ref().map(NegotiationSession::epoch) != Some(epoch) {
            if let Ok(mut media) = result {
                debug!(target: LOG_TARGET, epoch, "closing media acquired for a stale pairing");
                media.close().await;
            }
            return;
        }

        let out = &self.out;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let mut media = match result {
            Ok(media) => media,
            Err(err) => {
                warn!(target: LOG_TARGET, epoch, error = %err, "local media unavailable");
                session.phase = Phase::Failed;
                session.take_pending_inbound();
                out.emit(SessionEvent::MediaUnavailable {
                    reason: err.to_string(),
                });
                return;
            }
        };

        for kind in self.tracks.disabled() {
            if let Err(err) = media.set_track_enabled(kind, false).await {
                out.diagnostic(format!("failed to disable {kind:?} track: {err}"));
            }
        }
        session.media = Some(media);
        session.phase = Phase::Negotiating;

        if session.role() == Role::Initiator {
            let Some(media) = session.media.as_mut() else {
                return;
            };
            match media.create_offer().await {
                Ok(offer) => {
                    session.awaiting_answer = true;
                    out.signal(&session.peer, SignalPayload::Offer { sdp: offer });
                }
                Err(err) => {
                    out.diagnostic(format!("failed to create offer: {err}"));
                    mark_lost(session, out, PeerLostReason::Failed);
                    return;
                }
            }
        }

        let held = session.take_pending_inbound();
        for payload in held {
            self.apply_signal(payload).await;
        }
    }

    fn on_media_event(&mut self, event: MediaEvent) {
        let out = &self.out;
        let Some(session) = self.session.as_mut().filter(|s| s.epoch() == event.epoch) else {
            debug!(target: LOG_TARGET, epoch = event.epoch, "dropping media event from a stale pairing");
            return;
        };

        match event.kind {
            MediaEventKind::LocalCandidate(candidate) => {
                out.signal(&session.peer, SignalPayload::Candidate { candidate });
            }
            MediaEventKind::Connectivity(Connectivity::Connected) => {
                if session.phase == Phase::Negotiating {
                    session.phase = Phase::Connected;
                    info!(target: LOG_TARGET, peer = %session.peer, "peer connected");
                    out.emit(SessionEvent::Connected {
                        peer: session.peer.clone(),
                    });
                }
            }
            MediaEventKind::Connectivity(Connectivity::Disconnected) => {
                mark_lost(session, out, PeerLostReason::Disconnected);
            }
            MediaEventKind::Connectivity(Connectivity::Failed) => {
                mark_lost(session, out, PeerLostReason::Failed);
            }
            MediaEventKind::ChannelOpened => out.emit(SessionEvent::ChatOpened),
            MediaEventKind::ChannelClosed => out.emit(SessionEvent::ChatClosed),
            MediaEventKind::ChatReceived(text) => out.emit(SessionEvent::Chat {
                from: session.peer.clone(),
                text,
            }),
        }
    }

    fn on_stall_check(&mut self, epoch: u64) {
        let out = &self.out;
        if let Some(session) = self.session.as_mut().filter(|s| s.epoch() == epoch) {
            if session.phase == Phase::Negotiating {
                warn!(
                    target: LOG_TARGET,
                    peer = %session.peer,
                    epoch,
                    "negotiation stalled"
                );
                mark_lost(session, out, PeerLostReason::Stalled);
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Ready => {
                self.teardown("re-entering the queue").await;
                self.out.send(ClientMessage::Ready);
            }
            Command::Next => {
                self.teardown("next").await;
                self.out.send(ClientMessage::Next);
            }
            Command::Leave => {
                self.teardown("leave").await;
                self.out.send(ClientMessage::Leave);
            }
            Command::SetUsername(username) => {
                let trimmed = username.trim();
                if !trimmed.is_empty() {
                    self.config.username = Some(trimmed.to_string());
                }
                self.out.send(ClientMessage::SetUsername { username });
            }
            Command::SendChat(text) => {
                let out = &self.out;
                match self.session.as_mut().and_then(|s| s.media.as_mut()) {
                    Some(media) => {
                        if let Err(err) = media.send_chat(&text).await {
                            out.diagnostic(format!("chat message not sent: {err}"));
                        }
                    }
                    None => out.diagnostic("chat message not sent: no active peer".to_string()),
                }
            }
            Command::SetTrackEnabled { kind, enabled } => {
                self.tracks.set(kind, enabled);
                let out = &self.out;
                if let Some(media) = self.session.as_mut().and_then(|s| s.media.as_mut()) {
                    if let Err(err) = media.set_track_enabled(kind, enabled).await {
                        out.diagnostic(format!("failed to toggle {kind:?} track: {err}"));
                    }
                }
            }
            Command::Shutdown => {
                self.teardown("shutdown").await;
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Close the current session, if any. Completes before the caller sends
    /// any follow-up control message.
    async fn teardown(&mut self, reason: &str) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        debug!(
            target: LOG_TARGET,
            peer = %session.peer(),
            epoch = session.epoch(),
            reason,
            "tearing down negotiation session"
        );
        if let Some(mut media) = session.media.take() {
            media.close().await;
        }
    }
}

fn mark_lost(session: &mut NegotiationSession, out: &Outputs, reason: PeerLostReason) {
    if session.phase == Phase::Failed {
        return;
    }
    session.phase = Phase::Failed;
    warn!(target: LOG_TARGET, peer = %session.peer, ?reason, "peer lost");
    out.emit(SessionEvent::PeerLost {
        peer: session.peer.clone(),
        reason,
    });
}

async fn flush_candidates(session: &mut NegotiationSession, out: &Outputs) {
    let pending = session.take_pending_candidates();
    if pending.is_empty() {
        return;
    }
    debug!(target: LOG_TARGET, count = pending.len(), "applying buffered candidates");
    let Some(media) = session.media.as_mut() else {
        return;
    };
    for candidate in pending {
        if let Err(err) = media.add_remote_candidate(candidate).await {
            out.diagnostic(format!("failed to apply buffered candidate: {err}"));
        }
    }
}
