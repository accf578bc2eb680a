use serde_json::Value;
use tandem_proto::{ParticipantId, ServerMessage};
use tracing::debug;

use crate::registry::{ConnectionRegistry, Liveness};
use crate::telemetry;

/// Pass an opaque negotiation payload from one participant to another.
/// Targets that are gone are logged and dropped; nothing is buffered.
pub fn forward(
    registry: &ConnectionRegistry,
    from: &ParticipantId,
    to: &ParticipantId,
    data: Value,
) -> bool {
    let kind = payload_kind(&data);
    if !registry.is_live(to) {
        debug!(from = %from.short(), to = %to.short(), kind, "dropping signal for departed participant");
        telemetry::record_signal(false, kind);
        return false;
    }

    let delivered = registry.send(
        to,
        ServerMessage::Signal {
            from: from.clone(),
            data,
        },
    );
    if delivered {
        debug!(from = %from.short(), to = %to.short(), kind, "relayed signal");
    } else {
        debug!(from = %from.short(), to = %to.short(), kind, "signal target closed mid-send");
    }
    telemetry::record_signal(delivered, kind);
    delivered
}

/// Metric label for the payload's `type` field. Unrecognised kinds collapse
/// into `other` to keep label cardinality fixed.
fn payload_kind(data: &Value) -> &'static str {
    match data.get("type").and_then(Value::as_str) {
        Some("offer") => "offer",
        Some("answer") => "answer",
        Some("candidate") => "candidate",
        _ => "other",
    }
}
