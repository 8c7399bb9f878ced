use std::sync::Arc;
use std::time::Duration;

use interslug_panel::client::{PanelCommand, PanelSession, SessionOptions};
use interslug_panel::media::TrackKind;
use interslug_panel::media::mock::{EngineCall, MockEngine, MockRendererFactory};
use interslug_panel::media::EngineEvent;
use interslug_panel::protocol::{Channel, RtcMessage};
use interslug_panel::session::{RecordingUi, SessionError, UiEvent};
use interslug_panel::transport::TransportEvent;
use interslug_panel::transport::mock::MockTransport;
use test_timeout::tokio_timeout_test;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Harness {
    transport: Arc<MockTransport>,
    engine: Arc<MockEngine>,
    renderers: Arc<MockRendererFactory>,
    ui: Arc<RecordingUi>,
    session: Arc<PanelSession>,
    events: mpsc::UnboundedSender<TransportEvent>,
    runner: JoinHandle<()>,
}

impl Harness {
    async fn start() -> Self {
        let transport = MockTransport::new();
        let engine = MockEngine::new();
        let renderers = MockRendererFactory::new();
        let ui = Arc::new(RecordingUi::default());
        let session = Arc::new(
            PanelSession::start(
                transport.clone(),
                engine.clone(),
                renderers.clone(),
                ui.clone(),
                SessionOptions::default(),
            )
            .await
            .expect("session start"),
        );
        let (events, events_rx) = mpsc::unbounded_channel();
        let runner = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.run(events_rx).await }
        });
        Self {
            transport,
            engine,
            renderers,
            ui,
            session,
            events,
            runner,
        }
    }

    fn frame(&self, text: &str) {
        self.events
            .send(TransportEvent::Frame(text.to_string()))
            .expect("session running");
    }

    fn rtc_sent(&self) -> Vec<RtcMessage> {
        self.transport
            .envelopes()
            .iter()
            .filter(|envelope| envelope.channel == Channel::Rtc)
            .map(|envelope| envelope.payload().expect("rtc payload"))
            .collect()
    }

    async fn close(self) {
        self.events.send(TransportEvent::Closed).expect("session running");
        self.runner.await.expect("runner");
    }
}

async fn eventually(mut check: impl FnMut() -> bool) {
    while !check() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn status_frame(id: &str, state: &str) -> String {
    format!(
        r#"{{"channel":"sip","message":{{"type":"on_call_status","call":{{"callIdString":"{id}","callStateString":"{state}"}}}}}}"#
    )
}

#[tokio_timeout_test]
async fn incoming_call_is_answered_and_torn_down() {
    let h = Harness::start().await;
    h.events.send(TransportEvent::Opened).expect("open");

    let sent = h.transport.wait_for_frames(2).await;
    assert_eq!(
        h.transport.frames()[0],
        r#"{"channel":"sip","message":{"type":"get_call_list"}}"#
    );
    assert_eq!(sent[1].channel, Channel::Rtc);
    assert!(matches!(&h.rtc_sent()[0], RtcMessage::Offer { sdp } if !sdp.is_empty()));

    h.frame(&status_frame("abc", "INCOMING"));
    eventually(|| h.session.calls().snapshot().incoming().is_some()).await;
    assert_eq!(
        h.session.calls().snapshot().incoming().map(|call| call.id.clone()),
        Some("abc".to_string())
    );

    h.session.execute(PanelCommand::Answer).expect("answer");
    h.transport.wait_for_frames(3).await;
    assert_eq!(
        h.transport.frames()[2],
        r#"{"channel":"sip","message":{"type":"answer_call","call_id":"abc"}}"#
    );

    h.engine
        .emit(EngineEvent::RemoteTrack(MockEngine::track("a1", TrackKind::Audio)));
    eventually(|| h.session.media().renderer_count() == 1).await;

    h.frame(
        r#"{"channel":"sip","message":{"type":"call_answered","call":{"callIdString":"abc","callStateString":"CONFIRMED"}}}"#,
    );
    eventually(|| h.session.calls().snapshot().current().is_some()).await;
    let book = h.session.calls().snapshot();
    assert_eq!(book.current().map(|call| call.id.as_str()), Some("abc"));
    assert!(book.incoming().is_none());

    h.frame(&status_frame("abc", "DISCONNECTED"));
    eventually(|| h.session.media().renderer_count() == 0).await;
    assert_eq!(h.renderers.active(), 0);
    assert!(h.session.calls().snapshot().current().is_none());
    assert_eq!(
        h.ui.events(),
        vec![
            UiEvent::Status("INCOMING".into()),
            UiEvent::Incoming("abc".into()),
            UiEvent::IncomingWithdrawn("abc".into()),
            UiEvent::Active("abc".into()),
            UiEvent::Status("DISCONNECTED".into()),
            UiEvent::ControlsWithdrawn(Some("abc".into())),
        ]
    );
    assert_eq!(
        h.session.execute(PanelCommand::Hangup),
        Err(SessionError::NoCurrentCall)
    );

    let transport = Arc::clone(&h.transport);
    let engine = Arc::clone(&h.engine);
    h.close().await;
    assert!(transport.was_closed());
    assert_eq!(engine.calls().last(), Some(&EngineCall::Close));
}

#[tokio_timeout_test]
async fn heartbeats_are_answered_and_garbage_is_dropped() {
    let h = Harness::start().await;
    h.transport.wait_for_frames(1).await;

    h.frame("not json at all");
    h.frame(r#"{"channel":"video","message":{}}"#);
    h.frame(r#"{"type":"ping"}"#);
    h.frame(r#"{"channel":"sys","message":{"type":"ping"}}"#);

    h.transport.wait_for_frames(3).await;
    let pongs: Vec<String> = h.transport.frames()[1..].to_vec();
    assert_eq!(
        pongs,
        vec![
            r#"{"channel":"sys","message":"pong"}"#.to_string(),
            r#"{"channel":"sys","message":"pong"}"#.to_string(),
        ]
    );
    h.close().await;
}

#[tokio_timeout_test]
async fn bootstrap_offer_is_sent_once_and_remote_offer_is_answered() {
    let h = Harness::start().await;
    h.events.send(TransportEvent::Opened).expect("open");
    h.events.send(TransportEvent::Opened).expect("reopen");
    h.transport.wait_for_frames(2).await;

    h.frame(r#"{"channel":"rtc","message":{"type":"answer","sdp":"v=0 answer"}}"#);
    h.frame(r#"{"channel":"rtc","message":{"type":"offer","sdp":"v=0 renegotiate"}}"#);
    h.transport.wait_for_frames(3).await;

    let rtc = h.rtc_sent();
    assert_eq!(rtc.len(), 2);
    assert!(matches!(rtc[0], RtcMessage::Offer { .. }));
    assert!(matches!(&rtc[1], RtcMessage::Answer { sdp } if !sdp.is_empty()));
    assert_eq!(
        h.engine.remote_description().map(|description| description.sdp),
        Some("v=0 renegotiate".to_string())
    );
    h.close().await;
}

#[tokio_timeout_test]
async fn private_candidates_never_reach_the_wire() {
    let h = Harness::start().await;
    h.transport.wait_for_frames(1).await;

    for address in ["172.17.0.2", "192.168.1.5", "172.18.0.1", "10.0.0.7"] {
        h.engine.emit(EngineEvent::CandidateDiscovered(Some(
            interslug_panel::protocol::IceCandidateDescriptor {
                address: Some(address.to_string()),
                component: Some("rtp".into()),
                ..Default::default()
            },
        )));
    }
    h.engine.emit(EngineEvent::CandidateDiscovered(None));

    h.transport.wait_for_frames(3).await;
    let forwarded: Vec<String> = h
        .rtc_sent()
        .into_iter()
        .filter_map(|message| match message {
            RtcMessage::IceCandidate { candidate } => candidate.address,
            _ => None,
        })
        .collect();
    assert_eq!(forwarded, vec!["192.168.1.5", "10.0.0.7"]);
    h.close().await;
}

#[tokio_timeout_test]
async fn unknown_message_types_have_no_side_effects() {
    let h = Harness::start().await;
    h.transport.wait_for_frames(1).await;

    h.frame(r#"{"channel":"sip","message":{"type":"registration"}}"#);
    h.frame(r#"{"channel":"rtc","message":{"type":"bye"}}"#);

    // Each channel is processed in order, so a known message that follows
    // proves the unknown one before it was consumed.
    h.frame(&status_frame("abc", "INCOMING"));
    h.frame(r#"{"channel":"rtc","message":{"type":"offer","sdp":"v=0 remote"}}"#);
    eventually(|| h.session.calls().snapshot().incoming().is_some()).await;
    h.transport.wait_for_frames(2).await;

    assert_eq!(h.transport.frames().len(), 2);
    assert!(matches!(&h.rtc_sent()[..], [RtcMessage::Answer { .. }]));
    assert!(matches!(
        &h.engine.calls()[..],
        [
            EngineCall::SetRemote(_),
            EngineCall::CreateAnswer,
            EngineCall::SetLocal(_)
        ]
    ));
    let book = h.session.calls().snapshot();
    assert_eq!(book.calls().len(), 1);
    assert!(book.current().is_none());
    assert_eq!(
        h.ui.events(),
        vec![
            UiEvent::Status("INCOMING".into()),
            UiEvent::Incoming("abc".into()),
        ]
    );
    h.close().await;
}

#[tokio_timeout_test]
async fn negotiation_needed_puts_an_offer_on_the_wire() {
    let h = Harness::start().await;
    h.transport.wait_for_frames(1).await;

    h.engine.emit(EngineEvent::NegotiationNeeded);
    h.transport.wait_for_frames(2).await;

    assert!(matches!(&h.rtc_sent()[..], [RtcMessage::Offer { sdp }] if !sdp.is_empty()));
    assert!(matches!(
        &h.engine.calls()[..],
        [EngineCall::CreateOffer, EngineCall::SetLocal(_)]
    ));
    assert_eq!(
        h.engine.local_description().map(|description| description.sdp),
        h.rtc_sent().into_iter().find_map(|message| match message {
            RtcMessage::Offer { sdp } => Some(sdp),
            _ => None,
        })
    );
    h.close().await;
}
