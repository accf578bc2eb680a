use parking_lot::Mutex;
use serde_json::Value;
use tandem_proto::{ClientMessage, ParticipantId, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::LobbyConfig;
use crate::matchmaker::{Matchmaker, Outcome, Pairing};
use crate::presence::{self, PresenceSnapshot};
use crate::registry::ConnectionRegistry;
use crate::relay;
use crate::telemetry;

/// Owns every participant-facing table. Structural changes for one control
/// message happen under the matchmaker lock together with their
/// notifications and the single presence broadcast they cause, so two
/// mutations never interleave and every broadcast reflects the state it
/// follows.
pub struct Lobby {
    registry: ConnectionRegistry,
    matchmaker: Mutex<Matchmaker>,
}

impl Lobby {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            registry: ConnectionRegistry::new(config),
            matchmaker: Mutex::new(Matchmaker::new()),
        }
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        let matchmaker = self.matchmaker.lock();
        self.snapshot_of(&matchmaker)
    }

    /// Register a new connection. It receives its id before anyone hears
    /// about the new online count.
    pub fn admit(&self, outbound: mpsc::UnboundedSender<ServerMessage>) -> ParticipantId {
        let matchmaker = self.matchmaker.lock();
        let id = self.registry.admit(outbound);
        self.registry.send(&id, ServerMessage::Id { id: id.clone() });
        info!(participant = %id.short(), online = self.registry.len(), "participant admitted");
        presence::broadcast_online(&self.registry, self.snapshot_of(&matchmaker));
        id
    }

    pub fn handle(&self, id: &ParticipantId, message: ClientMessage) {
        if !self.registry.contains(id) {
            debug!(participant = %id.short(), kind = message.kind(), "message from departed participant");
            return;
        }
        match message {
            ClientMessage::SetUsername { username } => self.set_display_name(id, &username),
            ClientMessage::Ready => self.request_ready(id),
            ClientMessage::Next => self.request_next(id),
            ClientMessage::Leave => self.request_leave(id),
            ClientMessage::Signal { to, data } => {
                self.forward_signal(id, &to, data);
            }
        }
    }

    pub fn set_display_name(&self, id: &ParticipantId, raw: &str) {
        let _matchmaker = self.matchmaker.lock();
        if self.registry.set_display_name(id, raw) {
            debug!(participant = %id.short(), "display name updated");
        } else {
            debug!(participant = %id.short(), "display name ignored");
        }
    }

    pub fn request_ready(&self, id: &ParticipantId) {
        let mut matchmaker = self.matchmaker.lock();
        if !self.registry.contains(id) {
            return;
        }
        let outcome = matchmaker.request_ready(id.clone(), &self.registry);
        if outcome.repaired {
            telemetry::record_stale_repair();
        }
        self.settle(&matchmaker, outcome, "repair");
    }

    pub fn request_next(&self, id: &ParticipantId) {
        let mut matchmaker = self.matchmaker.lock();
        if !self.registry.contains(id) {
            return;
        }
        let outcome = matchmaker.request_next(id.clone(), &self.registry);
        self.settle(&matchmaker, outcome, "next");
    }

    pub fn request_leave(&self, id: &ParticipantId) {
        let mut matchmaker = self.matchmaker.lock();
        if !self.registry.contains(id) {
            return;
        }
        let outcome = matchmaker.request_leave(id, &self.registry);
        self.settle(&matchmaker, outcome, "leave");
    }

    /// Relay does not touch the queue or pair table, so it skips the lock.
    pub fn forward_signal(&self, from: &ParticipantId, to: &ParticipantId, data: Value) -> bool {
        relay::forward(&self.registry, from, to, data)
    }

    /// Connection closed. Repeated calls for the same id are harmless.
    pub fn disconnect(&self, id: &ParticipantId) {
        let mut matchmaker = self.matchmaker.lock();
        if !self.registry.contains(id) {
            return;
        }
        let outcome = matchmaker.on_disconnect(id, &self.registry);
        self.deliver(outcome, "disconnect");
        self.registry.remove(id);
        debug_assert!(matchmaker.is_consistent());
        info!(participant = %id.short(), online = self.registry.len(), "participant disconnected");
        presence::broadcast_online(&self.registry, self.snapshot_of(&matchmaker));
    }

    fn settle(&self, matchmaker: &Matchmaker, outcome: Outcome, cause: &'static str) {
        self.deliver(outcome, cause);
        debug_assert!(matchmaker.is_consistent());
        presence::broadcast_queue(&self.registry, self.snapshot_of(matchmaker));
    }

    fn deliver(&self, outcome: Outcome, cause: &'static str) {
        if let Some(peer) = outcome.partner_left {
            debug!(peer = %peer.short(), cause, "notifying partner_left");
            self.registry.send(&peer, ServerMessage::PartnerLeft);
            telemetry::record_partner_left(cause);
        }
        for pairing in outcome.pairings {
            self.announce(pairing);
        }
    }

    fn announce(&self, pairing: Pairing) {
        let Pairing {
            initiator,
            responder,
        } = pairing;
        let default_name = &self.registry.config().default_name;
        let initiator_name = self
            .registry
            .display_name(&initiator)
            .unwrap_or_else(|| default_name.clone());
        let responder_name = self
            .registry
            .display_name(&responder)
            .unwrap_or_else(|| default_name.clone());

        self.registry.send(
            &initiator,
            ServerMessage::Matched {
                peer_id: responder.clone(),
                peer_username: responder_name,
                initiator: true,
            },
        );
        self.registry.send(
            &responder,
            ServerMessage::Matched {
                peer_id: initiator.clone(),
                peer_username: initiator_name,
                initiator: false,
            },
        );
        telemetry::record_pair_formed();
        info!(
            initiator = %initiator.short(),
            responder = %responder.short(),
            "pair formed"
        );
    }

    fn snapshot_of(&self, matchmaker: &Matchmaker) -> PresenceSnapshot {
        PresenceSnapshot {
            online: self.registry.len(),
            queued: matchmaker.queue_len(),
            pairs: matchmaker.pair_count(),
        }
    }
}
