use dashmap::{mapref::entry::Entry, DashMap};
use tandem_proto::{ParticipantId, ServerMessage};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::LobbyConfig;

/// Answers "is this participant still reachable". The matchmaker consults it
/// before announcing a pair so it never pairs with a departed connection.
pub trait Liveness {
    fn is_live(&self, id: &ParticipantId) -> bool;
}

struct Participant {
    display_name: String,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

/// Participant id -> outbound channel and display name. The only owner of
/// connection handles; everything else refers to participants by id.
pub struct ConnectionRegistry {
    participants: DashMap<ParticipantId, Participant>,
    config: LobbyConfig,
}

impl ConnectionRegistry {
    pub fn new(config: LobbyConfig) -> Self {
        Self {
            participants: DashMap::new(),
            config,
        }
    }

    pub fn admit(&self, outbound: mpsc::UnboundedSender<ServerMessage>) -> ParticipantId {
        loop {
            let id = ParticipantId::generate();
            if let Entry::Vacant(slot) = self.participants.entry(id.clone()) {
                slot.insert(Participant {
                    display_name: self.config.default_name.clone(),
                    outbound,
                });
                return id;
            }
        }
    }

    /// No-op for unknown ids and for names that are blank after trimming.
    pub fn set_display_name(&self, id: &ParticipantId, raw: &str) -> bool {
        let Some(name) = self.config.normalize_name(raw) else {
            return false;
        };
        match self.participants.get_mut(id) {
            Some(mut participant) => {
                participant.display_name = name;
                true
            }
            None => false,
        }
    }

    pub fn display_name(&self, id: &ParticipantId) -> Option<String> {
        self.participants
            .get(id)
            .map(|participant| participant.display_name.clone())
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.contains_key(id)
    }

    pub fn remove(&self, id: &ParticipantId) -> bool {
        self.participants.remove(id).is_some()
    }

    /// Queue a message for one participant. Returns false if the id is gone
    /// or its writer has stopped.
    pub fn send(&self, id: &ParticipantId, message: ServerMessage) -> bool {
        let Some(outbound) = self
            .participants
            .get(id)
            .map(|participant| participant.outbound.clone())
        else {
            debug!(participant = %id.short(), kind = message.kind(), "send to unknown participant");
            return false;
        };
        outbound.send(message).is_ok()
    }

    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let recipients: Vec<_> = self
            .participants
            .iter()
            .map(|entry| entry.outbound.clone())
            .collect();
        recipients
            .into_iter()
            .filter(|outbound| outbound.send(message.clone()).is_ok())
            .count()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }
}

impl Liveness for ConnectionRegistry {
    fn is_live(&self, id: &ParticipantId) -> bool {
        self.participants
            .get(id)
            .map(|participant| !participant.outbound.is_closed())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(LobbyConfig::default())
    }

    #[test_timeout::timeout]
    fn admitted_participants_get_unique_ids_and_default_name() {
        let registry = registry();
        assert!(registry.is_empty());
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = registry.admit(tx.clone());
        let b = registry.admit(tx);
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert_eq!(registry.display_name(&a).as_deref(), Some("Guest"));

        assert!(registry.remove(&a));
        assert!(registry.remove(&b));
        assert!(registry.is_empty());
    }

    #[test_timeout::timeout]
    fn blank_names_are_ignored() {
        let registry = registry();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = registry.admit(tx);
        assert!(!registry.set_display_name(&id, "   "));
        assert!(registry.set_display_name(&id, "  Orion "));
        assert_eq!(registry.display_name(&id).as_deref(), Some("Orion"));
        assert!(!registry.set_display_name(&ParticipantId::from("ghost"), "Ann"));
    }

    #[test_timeout::timeout]
    fn liveness_follows_registration_and_channel_state() {
        let registry = registry();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.admit(tx);
        assert!(registry.is_live(&id));
        drop(rx);
        assert!(!registry.is_live(&id));
        assert!(!registry.send(&id, ServerMessage::PartnerLeft));

        let (tx, _rx) = mpsc::unbounded_channel();
        let other = registry.admit(tx);
        assert!(registry.remove(&other));
        assert!(!registry.is_live(&other));
        assert!(!registry.remove(&other));
    }

    #[test_timeout::timeout]
    fn broadcast_reaches_every_open_channel() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        registry.admit(tx_a);
        registry.admit(tx_b);
        drop(rx_b);

        let delivered = registry.broadcast(&ServerMessage::QueueCount { count: 0 });
        assert_eq!(delivered, 1);
        assert_eq!(
            rx_a.try_recv().unwrap(),
            ServerMessage::QueueCount { count: 0 }
        );
    }
}
