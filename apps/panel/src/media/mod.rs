use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{IceCandidateDescriptor, SessionDescription};

pub mod bridge;
pub mod filter;
pub mod mock;
pub mod renderer;
pub mod webrtc_engine;

pub use bridge::{BridgeOptions, GlarePolicy, MediaBridge, NegotiationTask};
pub use filter::CandidateFilter;
pub use renderer::{AudioRenderer, RendererFactory, RtpDrainRendererFactory};
pub use webrtc_engine::{WebRtcConfig, WebRtcEngine};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("engine events already taken")]
    EventsTaken,
    #[error("renderer cannot attach to track {0}")]
    UnsupportedTrack(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Unknown,
}

/// Engine-specific track object, downcast by renderers that understand it.
pub type TrackHandle = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
pub struct RemoteTrack {
    pub track_id: String,
    pub stream_id: Option<String>,
    pub kind: TrackKind,
    pub handle: TrackHandle,
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("track_id", &self.track_id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum EngineEvent {
    NegotiationNeeded,
    /// `None` marks the end of gathering.
    CandidateDiscovered(Option<IceCandidateDescriptor>),
    RemoteTrack(RemoteTrack),
}

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), MediaError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;
    /// Hands out the engine's event stream. Only the first call succeeds.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<EngineEvent>, MediaError>;
    async fn close(&self) -> Result<(), MediaError>;
}
