//! Data-channel-only media capability over the `webrtc` crate. Carries the
//! chat channel and real ICE connectivity; it has no audio or video tracks.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tandem_proto::{DescriptionKind, IceCandidate, SessionDescription};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::NegotiationError;
use crate::media::{
    Connectivity, MediaEventKind, MediaEvents, MediaProvider, MediaRequest, MediaSession, Role,
    TrackKind,
};

const LOG_TARGET: &str = "tandem::webrtc";
const CHAT_LABEL: &str = "chat";

#[derive(Debug, Clone)]
pub struct WebRtcMediaProvider {
    ice_servers: Vec<String>,
}

impl Default for WebRtcMediaProvider {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl WebRtcMediaProvider {
    pub fn with_ice_servers(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    async fn peer_connection(&self) -> Result<RTCPeerConnection, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(NegotiationError::media)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(NegotiationError::media)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        api.new_peer_connection(RTCConfiguration {
            ice_servers,
            ..Default::default()
        })
        .await
        .map_err(|err| NegotiationError::MediaUnavailable(err.to_string()))
    }
}

#[async_trait]
impl MediaProvider for WebRtcMediaProvider {
    async fn acquire(
        &self,
        request: MediaRequest,
        events: MediaEvents,
    ) -> Result<Box<dyn MediaSession>, NegotiationError> {
        let peer_connection = Arc::new(self.peer_connection().await?);
        let channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>> = Arc::new(Mutex::new(None));

        let candidate_events = events.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        events.emit(MediaEventKind::LocalCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }));
                    }
                    Err(err) => warn!(target: LOG_TARGET, error = %err, "failed to encode local candidate"),
                }
            })
        }));

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |state: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    debug!(target: LOG_TARGET, ?state, "peer connection state changed");
                    let connectivity = match state {
                        RTCPeerConnectionState::Connected => Connectivity::Connected,
                        RTCPeerConnectionState::Disconnected => Connectivity::Disconnected,
                        RTCPeerConnectionState::Failed => Connectivity::Failed,
                        _ => return,
                    };
                    events.emit(MediaEventKind::Connectivity(connectivity));
                })
            },
        ));

        match request.role {
            Role::Initiator => {
                let dc = peer_connection
                    .create_data_channel(CHAT_LABEL, None)
                    .await
                    .map_err(NegotiationError::media)?;
                wire_chat_channel(&dc, &events);
                *channel.lock() = Some(dc);
            }
            Role::Responder => {
                let slot = Arc::clone(&channel);
                let channel_events = events.clone();
                peer_connection.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                    let slot = Arc::clone(&slot);
                    let events = channel_events.clone();
                    Box::pin(async move {
                        if dc.label() != CHAT_LABEL {
                            return;
                        }
                        wire_chat_channel(&dc, &events);
                        *slot.lock() = Some(dc);
                    })
                }));
            }
        }

        Ok(Box::new(WebRtcSession {
            peer_connection,
            channel,
        }))
    }
}

fn wire_chat_channel(dc: &Arc<RTCDataChannel>, events: &MediaEvents) {
    let open_events = events.clone();
    dc.on_open(Box::new(move || {
        let events = open_events.clone();
        Box::pin(async move {
            events.emit(MediaEventKind::ChannelOpened);
        })
    }));

    let close_events = events.clone();
    dc.on_close(Box::new(move || {
        let events = close_events.clone();
        Box::pin(async move {
            events.emit(MediaEventKind::ChannelClosed);
        })
    }));

    let message_events = events.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let events = message_events.clone();
        Box::pin(async move {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            events.emit(MediaEventKind::ChatReceived(text));
        })
    }));
}

struct WebRtcSession {
    peer_connection: Arc<RTCPeerConnection>,
    channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(NegotiationError::media)?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(NegotiationError::media)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(NegotiationError::media)?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(NegotiationError::media)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn apply_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let remote = match description.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp),
            DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp),
            DescriptionKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
            DescriptionKind::Rollback => {
                return Err(NegotiationError::Media(
                    "rollback descriptions are not supported".into(),
                ))
            }
        }
        .map_err(NegotiationError::media)?;
        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(NegotiationError::media)
    }

    async fn add_remote_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), NegotiationError> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(NegotiationError::media)
    }

    async fn send_chat(&mut self, text: &str) -> Result<(), NegotiationError> {
        let channel = self.channel.lock().clone();
        let Some(channel) = channel else {
            return Err(NegotiationError::Media("chat channel not open".into()));
        };
        channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(NegotiationError::media)
    }

    async fn set_track_enabled(
        &mut self,
        kind: TrackKind,
        enabled: bool,
    ) -> Result<(), NegotiationError> {
        debug!(target: LOG_TARGET, ?kind, enabled, "no local tracks to toggle");
        Err(NegotiationError::Media("no local tracks".into()))
    }

    async fn close(&mut self) {
        self.channel.lock().take();
        if let Err(err) = self.peer_connection.close().await {
            debug!(target: LOG_TARGET, error = %err, "peer connection close failed");
        }
    }
}
