use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::protocol::{self, Channel, Envelope};

pub mod mock;
pub mod websocket;

pub use websocket::WebSocketTransport;

/// Events surfaced by a transport to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not open")]
    NotOpen,
    #[error("transport channel closed")]
    ChannelClosed,
    #[error("invalid signaling url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn is_open(&self) -> bool;
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn close(&self);
}

/// Bounded linear backoff applied while the transport is not open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Fire-and-forget sender for outbound envelopes.
///
/// Envelopes are delivered in submission order by a single pump task. An
/// envelope that finds the transport closed is re-checked after
/// `base_delay * attempt` for each attempt up to `max_attempts`, then dropped.
#[derive(Clone)]
pub struct MessageTransport {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl MessageTransport {
    pub fn spawn(transport: Arc<dyn Transport>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(run_pump(transport, policy, rx));
        (Self { tx }, pump)
    }

    pub fn send<T: Serialize + ?Sized>(&self, channel: Channel, payload: &T) {
        let envelope = match Envelope::from_payload(channel, payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "panel::wire", %channel, error = %err, "failed to encode outbound message");
                return;
            }
        };
        if self.tx.send(envelope).is_err() {
            debug!(target: "panel::wire", %channel, "outbound pump stopped; dropping message");
        }
    }
}

async fn run_pump(
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
) {
    while let Some(envelope) = rx.recv().await {
        deliver(transport.as_ref(), &policy, envelope).await;
    }
    trace!(target: "panel::wire", "outbound pump finished");
}

async fn deliver(transport: &dyn Transport, policy: &RetryPolicy, envelope: Envelope) -> bool {
    let mut attempt = 0;
    while !transport.is_open() {
        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(
                target: "panel::wire",
                channel = %envelope.channel,
                attempts = policy.max_attempts,
                "transport not open; dropping message"
            );
            return false;
        }
        let delay = policy.delay_for(attempt);
        debug!(
            target: "panel::wire",
            channel = %envelope.channel,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "transport not open; retrying"
        );
        tokio::time::sleep(delay).await;
    }

    let text = match protocol::encode_envelope(&envelope) {
        Ok(text) => text,
        Err(err) => {
            warn!(target: "panel::wire", error = %err, "failed to encode envelope");
            return false;
        }
    };
    debug!(target: "panel::wire", channel = %envelope.channel, len = text.len(), "sending message");
    trace!(target: "panel::wire", frame = %text, "outbound frame");
    match transport.send_text(text).await {
        Ok(()) => true,
        Err(err) => {
            warn!(target: "panel::wire", channel = %envelope.channel, error = %err, "send failed; dropping message");
            false
        }
    }
}
