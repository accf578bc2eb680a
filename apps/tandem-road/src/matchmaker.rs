use std::collections::{HashMap, VecDeque};

use tandem_proto::ParticipantId;
use tracing::{debug, warn};

use crate::registry::Liveness;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    NotQueued,
    Queued,
    Paired,
}

/// A freshly formed pair. The initiator creates the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub initiator: ParticipantId,
    pub responder: ParticipantId,
}

/// Notifications owed as a result of one request.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Former peer to tell `partner_left`; already requeued.
    pub partner_left: Option<ParticipantId>,
    pub pairings: Vec<Pairing>,
    /// A `ready` arrived while the caller was still paired.
    pub repaired: bool,
}

/// Waiting queue plus pair table. Pure bookkeeping: delivery of the
/// resulting notifications is the caller's job.
#[derive(Debug, Default)]
pub struct Matchmaker {
    queue: VecDeque<ParticipantId>,
    pairs: HashMap<ParticipantId, ParticipantId>,
}

impl Matchmaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_state(&self, id: &ParticipantId) -> QueueState {
        if self.pairs.contains_key(id) {
            QueueState::Paired
        } else if self.queue.contains(id) {
            QueueState::Queued
        } else {
            QueueState::NotQueued
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len() / 2
    }

    pub fn peer_of(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        self.pairs.get(id)
    }

    pub fn queued(&self) -> impl Iterator<Item = &ParticipantId> {
        self.queue.iter()
    }

    /// Move `id` to the tail of the queue. Never creates a duplicate entry.
    pub fn enqueue(&mut self, id: ParticipantId) {
        self.dequeue(&id);
        self.queue.push_back(id);
    }

    pub fn dequeue(&mut self, id: &ParticipantId) -> bool {
        match self.queue.iter().position(|queued| queued == id) {
            Some(idx) => {
                self.queue.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Break the pair containing `id`, returning the former peer.
    pub fn unpair(&mut self, id: &ParticipantId) -> Option<ParticipantId> {
        let peer = self.pairs.remove(id)?;
        if self.pairs.get(&peer) == Some(id) {
            self.pairs.remove(&peer);
        }
        Some(peer)
    }

    /// Pair waiting participants oldest first. A stale candidate is dropped
    /// and its live counterpart goes back to the front of the queue.
    pub fn try_pair(&mut self, live: &impl Liveness) -> Vec<Pairing> {
        let mut formed = Vec::new();
        while self.queue.len() >= 2 {
            let (Some(first), Some(second)) = (self.queue.pop_front(), self.queue.pop_front())
            else {
                break;
            };
            match (live.is_live(&first), live.is_live(&second)) {
                (true, true) => {
                    self.pairs.insert(first.clone(), second.clone());
                    self.pairs.insert(second.clone(), first.clone());
                    debug!(
                        initiator = %first.short(),
                        responder = %second.short(),
                        "paired participants"
                    );
                    formed.push(Pairing {
                        initiator: first,
                        responder: second,
                    });
                }
                (true, false) => {
                    debug!(dropped = %second.short(), "dropping stale queue entry");
                    self.queue.push_front(first);
                }
                (false, true) => {
                    debug!(dropped = %first.short(), "dropping stale queue entry");
                    self.queue.push_front(second);
                }
                (false, false) => {
                    debug!(
                        dropped = %first.short(),
                        also = %second.short(),
                        "dropping stale queue entries"
                    );
                }
            }
        }
        formed
    }

    pub fn request_ready(&mut self, id: ParticipantId, live: &impl Liveness) -> Outcome {
        let mut outcome = Outcome::default();
        if self.pairs.contains_key(&id) {
            warn!(participant = %id.short(), "ready while still paired; repairing");
            outcome.repaired = true;
            outcome.partner_left = self.release_partner(&id, live);
        }
        self.enqueue(id);
        outcome.pairings = self.try_pair(live);
        outcome
    }

    pub fn request_next(&mut self, id: ParticipantId, live: &impl Liveness) -> Outcome {
        let partner_left = self.release_partner(&id, live);
        self.enqueue(id);
        Outcome {
            partner_left,
            pairings: self.try_pair(live),
            repaired: false,
        }
    }

    pub fn request_leave(&mut self, id: &ParticipantId, live: &impl Liveness) -> Outcome {
        let partner_left = self.release_partner(id, live);
        self.dequeue(id);
        Outcome {
            partner_left,
            pairings: self.try_pair(live),
            repaired: false,
        }
    }

    /// Same cleanup as leave; registry removal is up to the caller.
    pub fn on_disconnect(&mut self, id: &ParticipantId, live: &impl Liveness) -> Outcome {
        self.request_leave(id, live)
    }

    /// No id is both queued and paired, the queue has no duplicates, and the
    /// pair table is symmetric.
    pub fn is_consistent(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        let queue_ok = self
            .queue
            .iter()
            .all(|id| seen.insert(id) && !self.pairs.contains_key(id));
        let pairs_ok = self
            .pairs
            .iter()
            .all(|(a, b)| a != b && self.pairs.get(b) == Some(a));
        queue_ok && pairs_ok
    }

    /// Unpair `id`; if the former peer is still live, requeue it at the tail
    /// (unless already queued) and return it for notification.
    fn release_partner(&mut self, id: &ParticipantId, live: &impl Liveness) -> Option<ParticipantId> {
        let peer = self.unpair(id)?;
        if !live.is_live(&peer) {
            debug!(peer = %peer.short(), "former peer already gone");
            return None;
        }
        if !self.queue.contains(&peer) {
            self.queue.push_back(peer.clone());
        }
        Some(peer)
    }
}
