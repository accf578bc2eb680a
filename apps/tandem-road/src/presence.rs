use serde::Serialize;
use tandem_proto::ServerMessage;
use tracing::trace;

use crate::registry::ConnectionRegistry;
use crate::telemetry;

/// Aggregate counts, served on `/stats` and pushed to participants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub online: usize,
    pub queued: usize,
    pub pairs: usize,
}

impl PresenceSnapshot {
    pub fn online_message(&self) -> ServerMessage {
        ServerMessage::OnlineCount {
            count: self.online,
            queue_count: self.queued,
        }
    }

    pub fn queue_message(&self) -> ServerMessage {
        ServerMessage::QueueCount { count: self.queued }
    }
}

/// Sent after admissions and disconnects.
pub fn broadcast_online(registry: &ConnectionRegistry, snapshot: PresenceSnapshot) {
    let reached = registry.broadcast(&snapshot.online_message());
    telemetry::record_presence(snapshot.online, snapshot.queued);
    trace!(online = snapshot.online, queued = snapshot.queued, reached, "broadcast online count");
}

/// Sent after ready, next and leave.
pub fn broadcast_queue(registry: &ConnectionRegistry, snapshot: PresenceSnapshot) {
    let reached = registry.broadcast(&snapshot.queue_message());
    telemetry::record_presence(snapshot.online, snapshot.queued);
    trace!(queued = snapshot.queued, reached, "broadcast queue count");
}
