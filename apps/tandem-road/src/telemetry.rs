use anyhow::{Context, Result};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const PARTICIPANTS_ONLINE: &str = "tandem_participants_online";
pub const QUEUE_DEPTH: &str = "tandem_queue_depth";
pub const PAIRS_FORMED: &str = "tandem_pairs_formed_total";
pub const PARTNER_LEFT: &str = "tandem_partner_left_total";
pub const STALE_REPAIRS: &str = "tandem_stale_repairs_total";
pub const SIGNALS_RELAYED: &str = "tandem_signals_relayed_total";
pub const SIGNALS_DROPPED: &str = "tandem_signals_dropped_total";
pub const FRAMES_REJECTED: &str = "tandem_frames_rejected_total";

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
}

impl Telemetry {
    /// Install the global tracing subscriber (`RUST_LOG`, default `info`) and
    /// the Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

pub fn record_presence(online: usize, queued: usize) {
    gauge!(PARTICIPANTS_ONLINE, online as f64);
    gauge!(QUEUE_DEPTH, queued as f64);
}

pub fn record_pair_formed() {
    counter!(PAIRS_FORMED, 1);
}

pub fn record_partner_left(cause: &'static str) {
    counter!(PARTNER_LEFT, 1, "cause" => cause);
}

pub fn record_stale_repair() {
    counter!(STALE_REPAIRS, 1);
}

pub fn record_signal(delivered: bool, kind: &'static str) {
    if delivered {
        counter!(SIGNALS_RELAYED, 1, "kind" => kind);
    } else {
        counter!(SIGNALS_DROPPED, 1, "kind" => kind);
    }
}

pub fn record_frame_rejected(reason: &'static str) {
    counter!(FRAMES_REJECTED, 1, "reason" => reason);
}
