use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    AudioRenderer, CandidateFilter, EngineEvent, MediaError, NegotiationEngine, RemoteTrack,
    RendererFactory, TrackKind,
};
use crate::protocol::{Channel, IceCandidateDescriptor, RtcMessage, SessionDescription};
use crate::transport::MessageTransport;

/// What to do with a remote offer that arrives while a local offer is
/// still waiting for its answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GlarePolicy {
    /// Drop the remote offer; the local offer stays authoritative until it is
    /// answered or older than the glare window.
    #[default]
    IgnoreRemoteOffer,
    AcceptRemoteOffer,
}

#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub filter: CandidateFilter,
    pub glare: GlarePolicy,
    pub glare_window: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            filter: CandidateFilter::default(),
            glare: GlarePolicy::default(),
            glare_window: Duration::from_secs(5),
        }
    }
}

/// Work that mutates negotiation state. Run one at a time, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationTask {
    LocalOffer,
    Inbound(RtcMessage),
}

pub struct MediaBridge {
    engine: Arc<dyn NegotiationEngine>,
    outbound: MessageTransport,
    renderers: Arc<dyn RendererFactory>,
    active: Mutex<Vec<Box<dyn AudioRenderer>>>,
    options: BridgeOptions,
    pending_offer: Mutex<Option<Instant>>,
}

impl MediaBridge {
    pub fn new(
        engine: Arc<dyn NegotiationEngine>,
        outbound: MessageTransport,
        renderers: Arc<dyn RendererFactory>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            engine,
            outbound,
            renderers,
            active: Mutex::new(Vec::new()),
            options,
            pending_offer: Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Arc<dyn NegotiationEngine> {
        &self.engine
    }

    pub async fn initiate_offer(&self) -> Result<(), MediaError> {
        *self.pending_offer.lock() = Some(Instant::now());
        let offer = match self.create_local_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                *self.pending_offer.lock() = None;
                return Err(err);
            }
        };
        info!(target: "panel::rtc", len = offer.sdp.len(), "sending local offer");
        self.outbound.send(Channel::Rtc, &RtcMessage::from(offer));
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.engine.create_offer().await?;
        self.engine.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Forwards a locally gathered candidate unless the filter rejects it.
    /// Returns whether a message was queued.
    pub fn on_candidate_discovered(&self, candidate: Option<IceCandidateDescriptor>) -> bool {
        let Some(candidate) = candidate else {
            debug!(target: "panel::rtc", "candidate gathering complete");
            return false;
        };
        if !self.options.filter.should_forward(&candidate) {
            debug!(
                target: "panel::rtc",
                ip = ?candidate.address,
                "ignoring candidate on private prefix"
            );
            return false;
        }
        debug!(
            target: "panel::rtc",
            protocol = ?candidate.protocol,
            ip = ?candidate.address,
            port = ?candidate.port,
            "forwarding local candidate"
        );
        self.outbound
            .send(Channel::Rtc, &RtcMessage::IceCandidate { candidate });
        true
    }

    /// Attaches a renderer to remote audio. Other kinds are ignored.
    pub fn on_remote_track(&self, track: RemoteTrack) -> Result<bool, MediaError> {
        if track.kind != TrackKind::Audio {
            debug!(target: "panel::rtc", track_id = %track.track_id, kind = ?track.kind, "ignoring non-audio track");
            return Ok(false);
        }
        let renderer = self.renderers.create_and_attach(track)?;
        self.active.lock().push(renderer);
        Ok(true)
    }

    pub async fn apply_inbound(&self, message: RtcMessage) -> Result<(), MediaError> {
        match message {
            RtcMessage::Answer { sdp } => {
                info!(target: "panel::rtc", len = sdp.len(), "applying remote answer");
                let result = self
                    .engine
                    .set_remote_description(SessionDescription::answer(sdp))
                    .await;
                *self.pending_offer.lock() = None;
                result
            }
            RtcMessage::Offer { sdp } => {
                if self.local_offer_in_flight() {
                    warn!(target: "panel::rtc", "remote offer while local offer pending; ignoring");
                    return Ok(());
                }
                info!(target: "panel::rtc", len = sdp.len(), "applying remote offer");
                self.engine
                    .set_remote_description(SessionDescription::offer(sdp))
                    .await?;
                let answer = self.engine.create_answer().await?;
                self.engine.set_local_description(answer.clone()).await?;
                info!(target: "panel::rtc", len = answer.sdp.len(), "sending local answer");
                self.outbound.send(Channel::Rtc, &RtcMessage::from(answer));
                Ok(())
            }
            RtcMessage::IceCandidate { .. } => {
                debug!(target: "panel::rtc", "ignoring remote candidate");
                Ok(())
            }
            RtcMessage::Unknown => {
                debug!(target: "panel::rtc", "ignoring unknown rtc message");
                Ok(())
            }
        }
    }

    fn local_offer_in_flight(&self) -> bool {
        if self.options.glare != GlarePolicy::IgnoreRemoteOffer {
            return false;
        }
        self.pending_offer
            .lock()
            .is_some_and(|since| since.elapsed() < self.options.glare_window)
    }

    /// Stops and releases every renderer. Returns how many were stopped.
    pub fn teardown_renderers(&self) -> usize {
        let mut renderers = std::mem::take(&mut *self.active.lock());
        for renderer in renderers.iter_mut() {
            renderer.stop();
        }
        if !renderers.is_empty() {
            info!(target: "panel::rtc", count = renderers.len(), "audio renderers torn down");
        }
        renderers.len()
    }

    pub fn renderer_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Runs negotiation tasks one after another until the queue closes.
    pub async fn run_negotiation(self: Arc<Self>, mut tasks: mpsc::UnboundedReceiver<NegotiationTask>) {
        while let Some(task) = tasks.recv().await {
            let result = match task {
                NegotiationTask::LocalOffer => self.initiate_offer().await,
                NegotiationTask::Inbound(message) => self.apply_inbound(message).await,
            };
            if let Err(err) = result {
                warn!(target: "panel::rtc", error = %err, "negotiation step failed");
            }
        }
        debug!(target: "panel::rtc", "negotiation queue closed");
    }

    /// Reacts to engine events. Renegotiation is queued behind any pending
    /// negotiation work.
    pub async fn run_engine_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        negotiation: mpsc::UnboundedSender<NegotiationTask>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::NegotiationNeeded => {
                    debug!(target: "panel::rtc", "negotiation needed");
                    if negotiation.send(NegotiationTask::LocalOffer).is_err() {
                        break;
                    }
                }
                EngineEvent::CandidateDiscovered(candidate) => {
                    self.on_candidate_discovered(candidate);
                }
                EngineEvent::RemoteTrack(track) => {
                    if let Err(err) = self.on_remote_track(track) {
                        warn!(target: "panel::rtc", error = %err, "failed to attach renderer");
                    }
                }
            }
        }
        debug!(target: "panel::rtc", "engine event stream ended");
    }

    pub async fn close(&self) {
        self.teardown_renderers();
        if let Err(err) = self.engine.close().await {
            warn!(target: "panel::rtc", error = %err, "failed to close negotiation engine");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::mock::{EngineCall, MockEngine, MockRendererFactory};
    use crate::protocol::Envelope;
    use crate::transport::RetryPolicy;
    use crate::transport::mock::MockTransport;
    use test_timeout::tokio_timeout_test;

    struct Fixture {
        engine: Arc<MockEngine>,
        renderers: Arc<MockRendererFactory>,
        transport: Arc<MockTransport>,
        bridge: MediaBridge,
    }

    fn fixture(options: BridgeOptions) -> Fixture {
        let engine = MockEngine::new();
        let renderers = MockRendererFactory::new();
        let transport = MockTransport::new();
        let (outbound, _pump) = MessageTransport::spawn(transport.clone(), RetryPolicy::default());
        let bridge = MediaBridge::new(engine.clone(), outbound, renderers.clone(), options);
        Fixture {
            engine,
            renderers,
            transport,
            bridge,
        }
    }

    fn rtc_messages(envelopes: &[Envelope]) -> Vec<RtcMessage> {
        envelopes
            .iter()
            .filter(|envelope| envelope.channel == Channel::Rtc)
            .map(|envelope| envelope.payload().expect("rtc payload"))
            .collect()
    }

    #[tokio_timeout_test]
    async fn initiate_offer_sets_local_description_then_sends() {
        let fx = fixture(BridgeOptions::default());
        fx.bridge.initiate_offer().await.expect("offer");

        let sent = rtc_messages(&fx.transport.wait_for_frames(1).await);
        let RtcMessage::Offer { sdp } = &sent[0] else {
            panic!("expected offer, got {sent:?}");
        };
        assert!(!sdp.is_empty());
        assert_eq!(
            fx.engine.calls(),
            vec![
                EngineCall::CreateOffer,
                EngineCall::SetLocal(SessionDescription::offer(sdp.clone())),
            ]
        );
    }

    #[tokio_timeout_test]
    async fn remote_offer_yields_exactly_one_answer() {
        let fx = fixture(BridgeOptions::default());
        fx.bridge
            .apply_inbound(RtcMessage::Offer {
                sdp: "v=0 remote".into(),
            })
            .await
            .expect("apply offer");

        let sent = rtc_messages(&fx.transport.wait_for_frames(1).await);
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], RtcMessage::Answer { sdp } if !sdp.is_empty()));
        assert_eq!(
            fx.engine.remote_description(),
            Some(SessionDescription::offer("v=0 remote"))
        );
    }

    #[tokio_timeout_test]
    async fn remote_answer_completes_local_offer() {
        let fx = fixture(BridgeOptions::default());
        fx.bridge.initiate_offer().await.expect("offer");
        fx.bridge
            .apply_inbound(RtcMessage::Answer {
                sdp: "v=0 answer".into(),
            })
            .await
            .expect("apply answer");

        assert_eq!(
            fx.engine.remote_description(),
            Some(SessionDescription::answer("v=0 answer"))
        );
        assert!(!fx.bridge.local_offer_in_flight());
    }

    #[tokio_timeout_test(paused)]
    async fn glare_policy_ignores_remote_offer_until_window_expires() {
        let fx = fixture(BridgeOptions::default());
        fx.bridge.initiate_offer().await.expect("offer");
        fx.bridge
            .apply_inbound(RtcMessage::Offer {
                sdp: "v=0 remote".into(),
            })
            .await
            .expect("ignored offer");
        assert_eq!(fx.engine.remote_description(), None);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!fx.bridge.local_offer_in_flight());
    }

    #[tokio_timeout_test]
    async fn accept_policy_answers_during_pending_offer() {
        let fx = fixture(BridgeOptions {
            glare: GlarePolicy::AcceptRemoteOffer,
            ..BridgeOptions::default()
        });
        fx.bridge.initiate_offer().await.expect("offer");
        fx.bridge
            .apply_inbound(RtcMessage::Offer {
                sdp: "v=0 remote".into(),
            })
            .await
            .expect("offer accepted");
        let sent = rtc_messages(&fx.transport.wait_for_frames(2).await);
        assert!(matches!(sent[1], RtcMessage::Answer { .. }));
    }

    #[tokio_timeout_test]
    async fn engine_failure_surfaces_without_sending() {
        let fx = fixture(BridgeOptions::default());
        fx.engine.fail_next("offer exploded");
        let err = fx.bridge.initiate_offer().await.unwrap_err();
        assert!(matches!(err, MediaError::Negotiation(reason) if reason == "offer exploded"));
        assert!(!fx.bridge.local_offer_in_flight());

        tokio::task::yield_now().await;
        assert!(fx.transport.frames().is_empty());
    }

    #[tokio_timeout_test]
    async fn candidates_are_filtered_and_forwarded_once() {
        let fx = fixture(BridgeOptions::default());
        let private = IceCandidateDescriptor {
            address: Some("172.17.0.2".into()),
            ..Default::default()
        };
        let public = IceCandidateDescriptor {
            address: Some("192.168.1.5".into()),
            port: Some(40_000),
            ..Default::default()
        };
        assert!(!fx.bridge.on_candidate_discovered(Some(private)));
        assert!(!fx.bridge.on_candidate_discovered(None));
        assert!(fx.bridge.on_candidate_discovered(Some(public.clone())));

        let sent = rtc_messages(&fx.transport.wait_for_frames(1).await);
        assert_eq!(sent, vec![RtcMessage::IceCandidate { candidate: public }]);
    }

    #[tokio_timeout_test]
    async fn audio_tracks_get_renderers_and_teardown_releases_them() {
        let fx = fixture(BridgeOptions::default());
        assert!(fx.bridge.on_remote_track(MockEngine::track("a1", TrackKind::Audio)).expect("audio"));
        assert!(!fx.bridge.on_remote_track(MockEngine::track("v1", TrackKind::Video)).expect("video"));
        assert!(fx.bridge.on_remote_track(MockEngine::track("a2", TrackKind::Audio)).expect("audio"));
        assert_eq!(fx.bridge.renderer_count(), 2);
        assert_eq!(fx.renderers.active(), 2);

        assert_eq!(fx.bridge.teardown_renderers(), 2);
        assert_eq!(fx.bridge.renderer_count(), 0);
        assert_eq!(fx.renderers.active(), 0);
        assert_eq!(fx.bridge.teardown_renderers(), 0);
    }

    #[tokio_timeout_test]
    async fn engine_events_drive_the_bridge() {
        let fx = fixture(BridgeOptions::default());
        let bridge = Arc::new(fx.bridge);
        let events = fx.engine.events().await.expect("events");
        let (negotiation_tx, mut negotiation_rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(Arc::clone(&bridge).run_engine_events(events, negotiation_tx));

        fx.engine.emit(EngineEvent::NegotiationNeeded);
        fx.engine.emit(EngineEvent::RemoteTrack(MockEngine::track("a1", TrackKind::Audio)));
        fx.engine.emit(EngineEvent::CandidateDiscovered(Some(IceCandidateDescriptor {
            address: Some("192.168.1.5".into()),
            ..Default::default()
        })));

        assert_eq!(negotiation_rx.recv().await, Some(NegotiationTask::LocalOffer));
        fx.transport.wait_for_frames(1).await;
        assert_eq!(bridge.renderer_count(), 1);

        fx.engine.close().await.expect("close");
        pump.await.expect("pump");
    }
}
