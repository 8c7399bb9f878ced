use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    AudioRenderer, EngineEvent, MediaError, NegotiationEngine, RemoteTrack, RendererFactory,
    TrackKind,
};
use crate::protocol::{SdpType, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    Close,
}

#[derive(Default)]
struct EngineState {
    calls: Vec<EngineCall>,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    fail_next: Option<String>,
    generated: usize,
}

/// Scriptable negotiation engine that records every call it receives.
pub struct MockEngine {
    state: Mutex<EngineState>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            state: Mutex::new(EngineState::default()),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn track(id: &str, kind: TrackKind) -> RemoteTrack {
        RemoteTrack {
            track_id: id.to_string(),
            stream_id: Some(format!("stream-{id}")),
            kind,
            handle: Arc::new(()),
        }
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = self.events_tx.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Makes the next engine operation fail with `reason`.
    pub fn fail_next(&self, reason: &str) {
        self.state.lock().fail_next = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.state.lock().local.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().remote.clone()
    }

    fn record(&self, call: EngineCall) -> Result<(), MediaError> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.fail_next.take() {
            Some(reason) => Err(MediaError::Negotiation(reason)),
            None => Ok(()),
        }
    }

    fn generate(&self, kind: SdpType) -> SessionDescription {
        let mut state = self.state.lock();
        state.generated += 1;
        let sdp = format!(
            "v=0\r\no=mock {} 0 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            state.generated
        );
        SessionDescription { kind, sdp }
    }
}

#[async_trait]
impl NegotiationEngine for MockEngine {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        self.record(EngineCall::CreateOffer)?;
        Ok(self.generate(SdpType::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        self.record(EngineCall::CreateAnswer)?;
        let has_remote_offer = self
            .state
            .lock()
            .remote
            .as_ref()
            .is_some_and(|remote| remote.kind == SdpType::Offer);
        if !has_remote_offer {
            return Err(MediaError::Negotiation("no remote offer to answer".into()));
        }
        Ok(self.generate(SdpType::Answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.record(EngineCall::SetLocal(description.clone()))?;
        self.state.lock().local = Some(description);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        self.record(EngineCall::SetRemote(description.clone()))?;
        let mut state = self.state.lock();
        if description.kind == SdpType::Answer
            && state.local.as_ref().map(|local| local.kind) != Some(SdpType::Offer)
        {
            return Err(MediaError::Negotiation("answer without local offer".into()));
        }
        state.remote = Some(description);
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<EngineEvent>, MediaError> {
        self.events_rx.lock().take().ok_or(MediaError::EventsTaken)
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.record(EngineCall::Close)?;
        self.events_tx.lock().take();
        Ok(())
    }
}

/// Renderer factory that tracks how many renderers are currently attached.
#[derive(Debug, Default)]
pub struct MockRendererFactory {
    created: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl MockRendererFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl RendererFactory for MockRendererFactory {
    fn create_and_attach(&self, track: RemoteTrack) -> Result<Box<dyn AudioRenderer>, MediaError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRenderer {
            id: track.track_id,
            active: Arc::clone(&self.active),
            stopped: false,
        }))
    }
}

struct MockRenderer {
    id: String,
    active: Arc<AtomicUsize>,
    stopped: bool,
}

impl AudioRenderer for MockRenderer {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
