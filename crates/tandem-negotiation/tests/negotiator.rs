use std::sync::Arc;
use std::time::Duration;

use tandem_negotiation::mock::{MockCall, MockMediaProvider};
use tandem_negotiation::{
    Connectivity, Driver, Flow, MediaEventKind, NegotiationError, NegotiationHandle,
    NegotiatorConfig, PeerLostReason, Phase, Presence, Role, SessionEvent, TrackKind,
};
use tandem_proto::{
    ClientMessage, DescriptionKind, IceCandidate, ParticipantId, ServerMessage,
    SessionDescription, SignalPayload,
};
use tokio::sync::mpsc;

const PEER: &str = "peer-b";

struct Harness {
    driver: Driver,
    handle: NegotiationHandle,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    media: MockMediaProvider,
}

impl Harness {
    fn new(media: MockMediaProvider) -> Self {
        Self::with_config(
            media,
            NegotiatorConfig {
                username: None,
                stall_timeout: None,
            },
        )
    }

    fn with_config(media: MockMediaProvider, config: NegotiatorConfig) -> Self {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (driver, handle, events) = Driver::new(Arc::new(media.clone()), config, outbound_tx);
        Self {
            driver,
            handle,
            outbound,
            events,
            media,
        }
    }

    fn server(&self, message: ServerMessage) {
        self.handle.deliver(message).unwrap();
    }

    fn signal(&self, from: &str, payload: SignalPayload) {
        self.server(ServerMessage::Signal {
            from: ParticipantId::from(from),
            data: payload.to_value().unwrap(),
        });
    }

    async fn step(&mut self, count: usize) {
        for _ in 0..count {
            assert_eq!(self.driver.step().await, Some(Flow::Continue));
        }
    }

    fn phase(&self) -> Phase {
        self.driver.negotiator().phase()
    }

    fn sent(&mut self) -> Vec<ClientMessage> {
        let mut sent = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            sent.push(message);
        }
        sent
    }

    fn events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    fn emit(&self, epoch: u64, kind: MediaEventKind) {
        assert!(self.media.events_for(epoch).unwrap().emit(kind));
    }
}

fn matched(peer: &str, initiator: bool) -> ServerMessage {
    ServerMessage::Matched {
        peer_id: ParticipantId::from(peer),
        peer_username: "Guest".into(),
        initiator,
    }
}

fn offer(sdp: &str) -> SignalPayload {
    SignalPayload::Offer {
        sdp: SessionDescription::offer(sdp),
    }
}

fn answer(sdp: &str) -> SignalPayload {
    SignalPayload::Answer {
        sdp: SessionDescription::answer(sdp),
    }
}

fn candidate(idx: usize) -> SignalPayload {
    SignalPayload::Candidate {
        candidate: IceCandidate::new(format!("candidate:{idx}")),
    }
}

fn signals(sent: &[ClientMessage]) -> Vec<(ParticipantId, SignalPayload)> {
    sent.iter()
        .filter_map(|message| match message {
            ClientMessage::Signal { to, data } => {
                Some((to.clone(), SignalPayload::from_value(data).unwrap()))
            }
            _ => None,
        })
        .collect()
}

fn applied_remote(calls: &[MockCall]) -> usize {
    calls
        .iter()
        .filter(|call| matches!(call, MockCall::ApplyRemote { .. }))
        .count()
}

fn has_diagnostic(events: &[SessionEvent], needle: &str) -> bool {
    events
        .iter()
        .any(|event| matches!(event, SessionEvent::Diagnostic(text) if text.contains(needle)))
}

#[test_timeout::tokio_timeout_test]
async fn candidates_before_media_are_applied_after_the_offer() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    for idx in 0..3 {
        h.signal(PEER, candidate(idx));
    }
    h.signal(PEER, offer("remote-offer"));

    // matched, three candidates, offer, then the media result
    h.step(6).await;

    assert_eq!(
        h.media.calls(),
        vec![
            MockCall::Acquire {
                epoch: 1,
                peer: ParticipantId::from(PEER),
                role: Role::Responder,
            },
            MockCall::ApplyRemote {
                epoch: 1,
                kind: DescriptionKind::Offer,
                sdp: "remote-offer".into(),
            },
            MockCall::AddCandidate {
                epoch: 1,
                candidate: "candidate:0".into(),
            },
            MockCall::AddCandidate {
                epoch: 1,
                candidate: "candidate:1".into(),
            },
            MockCall::AddCandidate {
                epoch: 1,
                candidate: "candidate:2".into(),
            },
            MockCall::CreateAnswer { epoch: 1 },
        ]
    );
    let sent = h.sent();
    assert_eq!(
        signals(&sent),
        vec![(ParticipantId::from(PEER), answer("mock-answer-1"))]
    );
    assert_eq!(h.phase(), Phase::Negotiating);
}

#[test_timeout::tokio_timeout_test]
async fn candidates_wait_for_remote_description() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;
    assert_eq!(h.phase(), Phase::Negotiating);

    for idx in 0..3 {
        h.signal(PEER, candidate(idx));
    }
    h.step(3).await;
    assert!(!h
        .media
        .calls()
        .iter()
        .any(|call| matches!(call, MockCall::AddCandidate { .. })));
    assert_eq!(
        h.driver
            .negotiator()
            .session()
            .unwrap()
            .pending_candidate_count(),
        3
    );

    h.signal(PEER, offer("remote-offer"));
    h.signal(PEER, candidate(3));
    h.step(2).await;

    let calls = h.media.calls();
    let order: Vec<String> = calls
        .iter()
        .skip(1)
        .map(|call| match call {
            MockCall::ApplyRemote { .. } => "apply".to_string(),
            MockCall::AddCandidate { candidate, .. } => candidate.clone(),
            MockCall::CreateAnswer { .. } => "answer".to_string(),
            other => format!("{other:?}"),
        })
        .collect();
    assert_eq!(
        order,
        [
            "apply",
            "candidate:0",
            "candidate:1",
            "candidate:2",
            "answer",
            "candidate:3"
        ]
    );
}

#[test_timeout::tokio_timeout_test]
async fn duplicate_offer_is_applied_once() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;

    h.signal(PEER, offer("first"));
    h.signal(PEER, offer("second"));
    h.step(2).await;

    assert_eq!(applied_remote(&h.media.calls()), 1);
    let sent = h.sent();
    let answers = signals(&sent)
        .into_iter()
        .filter(|(_, payload)| matches!(payload, SignalPayload::Answer { .. }))
        .count();
    assert_eq!(answers, 1);
    assert!(has_diagnostic(&h.events(), "already applied"));
}

#[test_timeout::tokio_timeout_test]
async fn initiator_offers_and_accepts_a_single_answer() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, true));
    h.step(2).await;

    let sent = h.sent();
    assert_eq!(
        signals(&sent),
        vec![(ParticipantId::from(PEER), offer("mock-offer-1"))]
    );

    h.signal(PEER, answer("remote-answer"));
    h.signal(PEER, answer("late-duplicate"));
    h.signal(PEER, offer("glare"));
    h.step(3).await;

    let calls = h.media.calls();
    assert_eq!(applied_remote(&calls), 1);
    assert!(calls.contains(&MockCall::ApplyRemote {
        epoch: 1,
        kind: DescriptionKind::Answer,
        sdp: "remote-answer".into(),
    }));
    let events = h.events();
    assert!(has_diagnostic(&events, "unexpected answer"));
    assert!(has_diagnostic(&events, "glare"));
    assert!(h.sent().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn signals_from_other_peers_are_ignored() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;

    h.signal("intruder", offer("cross-talk"));
    h.signal("intruder", candidate(0));
    h.step(2).await;

    assert_eq!(h.media.calls().len(), 1);
    assert!(h.sent().is_empty());
    assert!(has_diagnostic(&h.events(), "paired with"));
}

#[test_timeout::tokio_timeout_test]
async fn stale_media_results_and_events_are_discarded() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched("peer-a", false));
    h.server(matched(PEER, false));
    h.step(2).await;
    // both media results
    h.step(2).await;

    assert!(h.media.calls().contains(&MockCall::Close { epoch: 1 }));
    let session = h.driver.negotiator().session().unwrap();
    assert_eq!(session.epoch(), 2);
    assert_eq!(session.peer(), &ParticipantId::from(PEER));
    assert_eq!(h.phase(), Phase::Negotiating);

    h.emit(
        1,
        MediaEventKind::LocalCandidate(IceCandidate::new("candidate:stale")),
    );
    h.step(1).await;
    assert!(h.sent().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn media_failure_is_surfaced_without_retry() {
    let mut h = Harness::new(MockMediaProvider::new().failing_acquire("camera denied"));
    h.server(matched(PEER, true));
    h.step(2).await;

    assert_eq!(h.phase(), Phase::Failed);
    let events = h.events();
    assert!(events.iter().any(|event| matches!(
        event,
        SessionEvent::MediaUnavailable { reason } if reason.contains("camera denied")
    )));
    assert!(h.sent().is_empty());

    h.signal(PEER, offer("too-late"));
    h.step(1).await;
    assert_eq!(h.media.calls().len(), 1);
    assert!(h.sent().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn stalled_negotiation_is_reported_once() {
    let mut h = Harness::with_config(
        MockMediaProvider::new(),
        NegotiatorConfig {
            username: None,
            stall_timeout: Some(Duration::from_millis(50)),
        },
    );
    h.server(matched(PEER, true));
    h.step(2).await;
    assert_eq!(h.phase(), Phase::Negotiating);

    h.step(1).await;
    assert_eq!(h.phase(), Phase::Failed);
    let lost: Vec<_> = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::PeerLost { .. }))
        .collect();
    assert_eq!(
        lost,
        vec![SessionEvent::PeerLost {
            peer: ParticipantId::from(PEER),
            reason: PeerLostReason::Stalled,
        }]
    );
    // no automatic requeue
    let sent = h.sent();
    assert!(!sent
        .iter()
        .any(|message| matches!(message, ClientMessage::Next | ClientMessage::Ready)));
}

// A matched the server sent before it saw our next is adopted like any other;
// the server has already unpaired it, so only the stall timer ends it.
#[test_timeout::tokio_timeout_test]
async fn matched_in_flight_across_next_ends_by_stall() {
    let mut h = Harness::with_config(
        MockMediaProvider::new(),
        NegotiatorConfig {
            username: None,
            stall_timeout: Some(Duration::from_millis(50)),
        },
    );
    h.handle.next().unwrap();
    h.step(1).await;
    assert_eq!(h.sent(), vec![ClientMessage::Next]);

    h.server(matched("peer-c", true));
    h.step(2).await;
    let session = h.driver.negotiator().session().unwrap();
    assert_eq!(session.peer(), &ParticipantId::from("peer-c"));
    assert_eq!(session.peer_name(), "Guest");
    assert_eq!(h.phase(), Phase::Negotiating);

    h.step(1).await;
    assert_eq!(h.phase(), Phase::Failed);
    assert!(h.events().contains(&SessionEvent::PeerLost {
        peer: ParticipantId::from("peer-c"),
        reason: PeerLostReason::Stalled,
    }));
}

#[test_timeout::tokio_timeout_test]
async fn connected_session_ignores_stall_timer() {
    let mut h = Harness::with_config(
        MockMediaProvider::new(),
        NegotiatorConfig {
            username: None,
            stall_timeout: Some(Duration::from_millis(50)),
        },
    );
    h.server(matched(PEER, true));
    h.step(2).await;
    h.emit(1, MediaEventKind::Connectivity(Connectivity::Connected));
    h.step(1).await;
    assert_eq!(h.phase(), Phase::Connected);

    h.step(1).await;
    assert_eq!(h.phase(), Phase::Connected);
    let events = h.events();
    assert!(events.contains(&SessionEvent::Connected {
        peer: ParticipantId::from(PEER)
    }));
    assert!(!events
        .iter()
        .any(|event| matches!(event, SessionEvent::PeerLost { .. })));
}

#[test_timeout::tokio_timeout_test]
async fn connectivity_failure_is_reported_once() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, true));
    h.step(2).await;
    h.sent();

    h.emit(1, MediaEventKind::Connectivity(Connectivity::Failed));
    h.emit(1, MediaEventKind::Connectivity(Connectivity::Disconnected));
    h.step(2).await;

    let lost: Vec<_> = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, SessionEvent::PeerLost { .. }))
        .collect();
    assert_eq!(lost.len(), 1);
    assert!(matches!(
        lost[0],
        SessionEvent::PeerLost {
            reason: PeerLostReason::Failed,
            ..
        }
    ));
    assert!(h.sent().is_empty());
}

#[test_timeout::tokio_timeout_test]
async fn next_tears_down_before_sending() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;

    h.handle.next().unwrap();
    h.step(1).await;

    assert_eq!(h.media.calls().last(), Some(&MockCall::Close { epoch: 1 }));
    assert_eq!(h.sent(), vec![ClientMessage::Next]);
    assert_eq!(h.phase(), Phase::Idle);

    h.emit(1, MediaEventKind::ChatReceived("from the past".into()));
    h.step(1).await;
    assert!(!h
        .events()
        .iter()
        .any(|event| matches!(event, SessionEvent::Chat { .. })));
}

#[test_timeout::tokio_timeout_test]
async fn leave_and_partner_left_close_the_session() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;
    h.server(ServerMessage::PartnerLeft);
    h.step(1).await;

    assert!(h.media.calls().contains(&MockCall::Close { epoch: 1 }));
    assert!(h.events().contains(&SessionEvent::PartnerLeft));
    assert_eq!(h.phase(), Phase::Idle);

    h.handle.leave().unwrap();
    h.step(1).await;
    assert_eq!(h.sent(), vec![ClientMessage::Leave]);
}

#[test_timeout::tokio_timeout_test]
async fn announces_username_once_assigned() {
    let mut h = Harness::with_config(
        MockMediaProvider::new(),
        NegotiatorConfig {
            username: Some("Orion".into()),
            stall_timeout: None,
        },
    );
    h.server(ServerMessage::Id {
        id: ParticipantId::from("self"),
    });
    h.step(1).await;

    assert_eq!(
        h.driver.negotiator().self_id(),
        Some(&ParticipantId::from("self"))
    );
    assert_eq!(
        h.sent(),
        vec![ClientMessage::SetUsername {
            username: "Orion".into()
        }]
    );
}

#[test_timeout::tokio_timeout_test]
async fn presence_tracks_counts() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(ServerMessage::OnlineCount {
        count: 3,
        queue_count: 1,
    });
    h.server(ServerMessage::QueueCount { count: 0 });
    h.step(2).await;

    assert_eq!(
        h.driver.negotiator().presence(),
        Presence {
            online: 3,
            queued: 0
        }
    );
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::Presence(Presence {
                online: 3,
                queued: 1
            }),
            SessionEvent::Presence(Presence {
                online: 3,
                queued: 0
            }),
        ]
    );
}

#[test_timeout::tokio_timeout_test]
async fn chat_flows_over_the_media_session() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.handle.send_chat("too early").unwrap();
    h.step(1).await;
    assert!(has_diagnostic(&h.events(), "no active peer"));

    h.server(matched(PEER, true));
    h.step(2).await;
    h.emit(1, MediaEventKind::ChannelOpened);
    h.emit(1, MediaEventKind::ChatReceived("hi".into()));
    h.step(2).await;

    let events = h.events();
    assert!(events.contains(&SessionEvent::ChatOpened));
    assert!(events.contains(&SessionEvent::Chat {
        from: ParticipantId::from(PEER),
        text: "hi".into(),
    }));

    h.handle.send_chat("hello").unwrap();
    h.step(1).await;
    assert!(h.media.calls().contains(&MockCall::SendChat {
        epoch: 1,
        text: "hello".into(),
    }));
}

#[test_timeout::tokio_timeout_test]
async fn disabled_tracks_carry_into_the_next_session() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.handle.set_track_enabled(TrackKind::Video, false).unwrap();
    h.step(1).await;

    h.server(matched(PEER, true));
    h.step(2).await;

    let calls = h.media.calls();
    let toggle = calls
        .iter()
        .position(|call| {
            call == &MockCall::SetTrack {
                epoch: 1,
                kind: TrackKind::Video,
                enabled: false,
            }
        })
        .unwrap();
    let offer_at = calls
        .iter()
        .position(|call| call == &MockCall::CreateOffer { epoch: 1 })
        .unwrap();
    assert!(toggle < offer_at);
}

#[test_timeout::tokio_timeout_test]
async fn signaling_loss_stops_the_driver() {
    let mut h = Harness::new(MockMediaProvider::new());
    h.server(matched(PEER, false));
    h.step(2).await;

    h.handle.signaling_closed();
    assert_eq!(h.driver.step().await, Some(Flow::Stop));
    assert!(h.media.calls().contains(&MockCall::Close { epoch: 1 }));
    assert!(h.events().contains(&SessionEvent::Disconnected));

    let Harness { driver, handle, .. } = h;
    assert!(!handle.is_closed());
    drop(driver);
    assert!(handle.is_closed());
    assert!(matches!(handle.ready(), Err(NegotiationError::ChannelClosed)));
}
