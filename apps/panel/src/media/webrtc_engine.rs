use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::debug;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::{EngineEvent, MediaError, NegotiationEngine, RemoteTrack, TrackKind};
use crate::protocol::{IceCandidateDescriptor, SdpType, SessionDescription};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebRtcConfig {
    /// STUN/TURN urls. Empty means host candidates only.
    pub ice_servers: Vec<String>,
    /// Adds a receive-only audio transceiver so the first offer asks for
    /// audio.
    pub recv_audio: bool,
}

/// [`NegotiationEngine`] backed by a `webrtc` peer connection.
pub struct WebRtcEngine {
    peer_connection: Arc<RTCPeerConnection>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl WebRtcEngine {
    pub async fn new(config: &WebRtcConfig) -> Result<Self, MediaError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        install_handlers(&peer_connection, events_tx);

        if config.recv_audio {
            peer_connection
                .add_transceiver_from_kind(
                    RTPCodecType::Audio,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: Vec::new(),
                    }),
                )
                .await?;
        }

        Ok(Self {
            peer_connection,
            events_rx: AsyncMutex::new(Some(events_rx)),
        })
    }
}

fn install_handlers(peer_connection: &RTCPeerConnection, events: mpsc::UnboundedSender<EngineEvent>) {
    let negotiation_tx = events.clone();
    peer_connection.on_negotiation_needed(Box::new(move || {
        let tx = negotiation_tx.clone();
        Box::pin(async move {
            let _ = tx.send(EngineEvent::NegotiationNeeded);
        })
    }));

    let candidate_tx = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = candidate_tx.clone();
        Box::pin(async move {
            let descriptor = candidate.as_ref().map(describe_candidate);
            let _ = tx.send(EngineEvent::CandidateDiscovered(descriptor));
        })
    }));

    let track_tx = events;
    peer_connection.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let tx = track_tx.clone();
            Box::pin(async move {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Unknown,
                };
                let remote = RemoteTrack {
                    track_id: track.id(),
                    stream_id: Some(track.stream_id()),
                    kind,
                    handle: track,
                };
                let _ = tx.send(EngineEvent::RemoteTrack(remote));
            })
        },
    ));

    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            debug!(target: "panel::rtc", %state, "peer connection state changed");
            Box::pin(async {})
        },
    ));
}

pub(crate) fn describe_candidate(candidate: &RTCIceCandidate) -> IceCandidateDescriptor {
    let init = candidate.to_json().ok();
    let component = match candidate.component {
        1 => "rtp".to_string(),
        2 => "rtcp".to_string(),
        other => other.to_string(),
    };
    IceCandidateDescriptor {
        component: Some(component),
        foundation: non_empty(&candidate.foundation),
        address: non_empty(&candidate.address),
        port: Some(candidate.port),
        priority: Some(candidate.priority),
        protocol: Some(candidate.protocol.to_string()),
        candidate_type: Some(candidate.typ.to_string()),
        related_address: non_empty(&candidate.related_address),
        related_port: (candidate.related_port != 0).then_some(candidate.related_port),
        sdp_mid: init.as_ref().and_then(|init| init.sdp_mid.clone()),
        sdp_mline_index: init.as_ref().and_then(|init| init.sdp_mline_index),
        tcp_type: non_empty(&candidate.tcp_type),
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn to_native(description: SessionDescription) -> Result<RTCSessionDescription, MediaError> {
    let native = match description.kind {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(native)
}

fn from_native(description: &RTCSessionDescription) -> Result<SessionDescription, MediaError> {
    match description.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(description.sdp.clone())),
        RTCSdpType::Answer => Ok(SessionDescription::answer(description.sdp.clone())),
        other => Err(MediaError::Negotiation(format!(
            "unexpected description type {other}"
        ))),
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self.peer_connection.create_offer(None).await?;
        from_native(&offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self.peer_connection.create_answer(None).await?;
        from_native(&answer)
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let native = to_native(description)?;
        self.peer_connection.set_local_description(native).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let native = to_native(description)?;
        self.peer_connection.set_remote_description(native).await?;
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<EngineEvent>, MediaError> {
        self.events_rx.lock().await.take().ok_or(MediaError::EventsTaken)
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.peer_connection.close().await?;
        Ok(())
    }
}
