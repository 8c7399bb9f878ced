use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::media::{
    BridgeOptions, MediaBridge, MediaError, NegotiationEngine, NegotiationTask, RendererFactory,
};
use crate::protocol::{self, Channel, PONG, RtcMessage, SipEvent};
use crate::session::{CallSessionManager, CallUi, DEFAULT_POLL_INTERVAL, SessionError};
use crate::transport::{MessageTransport, RetryPolicy, Transport, TransportEvent};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub bridge: BridgeOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            bridge: BridgeOptions::default(),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            poll_interval: config.poll_interval,
            bridge: BridgeOptions {
                filter: config.candidate_filter(),
                ..BridgeOptions::default()
            },
        }
    }
}

/// Operator commands accepted by the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Answer,
    Decline,
    Hangup,
    ListCalls,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command {0:?} (expected answer, decline, hangup or list)")]
pub struct ParseCommandError(String);

impl FromStr for PanelCommand {
    type Err = ParseCommandError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a" | "answer" => Ok(PanelCommand::Answer),
            "d" | "decline" => Ok(PanelCommand::Decline),
            "h" | "hangup" | "end" => Ok(PanelCommand::Hangup),
            "l" | "list" | "calls" => Ok(PanelCommand::ListCalls),
            _ => Err(ParseCommandError(raw.trim().to_string())),
        }
    }
}

impl fmt::Display for PanelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PanelCommand::Answer => "answer",
            PanelCommand::Decline => "decline",
            PanelCommand::Hangup => "hangup",
            PanelCommand::ListCalls => "list",
        };
        f.write_str(name)
    }
}

/// Owns one signaling connection and everything hanging off it.
///
/// Inbound frames are routed by channel: `rtc` goes to the negotiation
/// queue, `sip` to the call session worker, and every `sys` frame is
/// answered with `"pong"`. Each channel is handled in arrival order. The
/// first `Opened` event triggers one bootstrap offer.
pub struct PanelSession {
    transport: Arc<dyn Transport>,
    outbound: MessageTransport,
    media: Arc<MediaBridge>,
    calls: Arc<CallSessionManager>,
    negotiation: mpsc::UnboundedSender<NegotiationTask>,
    sip_events: mpsc::UnboundedSender<SipEvent>,
    bootstrapped: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PanelSession {
    pub async fn start(
        transport: Arc<dyn Transport>,
        engine: Arc<dyn NegotiationEngine>,
        renderers: Arc<dyn RendererFactory>,
        ui: Arc<dyn CallUi>,
        options: SessionOptions,
    ) -> Result<Self, MediaError> {
        let engine_events = engine.events().await?;
        let (outbound, pump) = MessageTransport::spawn(Arc::clone(&transport), options.retry);
        let media = Arc::new(MediaBridge::new(
            engine,
            outbound.clone(),
            renderers,
            options.bridge,
        ));

        let (negotiation, negotiation_rx) = mpsc::unbounded_channel();
        let negotiation_task = tokio::spawn(Arc::clone(&media).run_negotiation(negotiation_rx));
        let engine_task = tokio::spawn(
            Arc::clone(&media).run_engine_events(engine_events, negotiation.clone()),
        );

        let calls = CallSessionManager::new(
            outbound.clone(),
            Arc::clone(&media),
            ui,
            options.poll_interval,
        );
        let (sip_events, sip_rx) = mpsc::unbounded_channel();
        let sip_task = tokio::spawn(run_sip_worker(Arc::clone(&calls), sip_rx));

        Ok(Self {
            transport,
            outbound,
            media,
            calls,
            negotiation,
            sip_events,
            bootstrapped: AtomicBool::new(false),
            tasks: Mutex::new(vec![pump, negotiation_task, engine_task, sip_task]),
        })
    }

    pub fn calls(&self) -> &Arc<CallSessionManager> {
        &self.calls
    }

    pub fn media(&self) -> &Arc<MediaBridge> {
        &self.media
    }

    /// Consumes transport events until the transport closes, then tears the
    /// session down.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Opened => self.on_open(),
                TransportEvent::Frame(text) => self.dispatch_frame(&text),
                TransportEvent::Closed => {
                    info!(target: "panel::wire", "signaling transport closed");
                    break;
                }
            }
        }
        self.shutdown().await;
    }

    fn on_open(&self) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            debug!(target: "panel::rtc", "transport reopened; bootstrap offer already sent");
            return;
        }
        info!(target: "panel::rtc", "transport open; sending bootstrap offer");
        self.queue_negotiation(NegotiationTask::LocalOffer);
    }

    pub fn dispatch_frame(&self, text: &str) {
        trace!(target: "panel::wire", len = text.len(), "inbound frame");
        let envelope = match protocol::decode_envelope(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(target: "panel::wire", error = %err, "dropping malformed frame");
                return;
            }
        };
        match envelope.channel {
            Channel::Rtc => match envelope.payload::<RtcMessage>() {
                Ok(message) => self.queue_negotiation(NegotiationTask::Inbound(message)),
                Err(err) => warn!(target: "panel::wire", error = %err, "dropping rtc message"),
            },
            Channel::Sip => match envelope.payload::<SipEvent>() {
                Ok(event) => {
                    if self.sip_events.send(event).is_err() {
                        warn!(target: "panel::sip", "sip worker stopped; dropping event");
                    }
                }
                Err(err) => warn!(target: "panel::wire", error = %err, "dropping sip message"),
            },
            Channel::Sys => {
                trace!(target: "panel::wire", "heartbeat");
                self.outbound.send(Channel::Sys, PONG);
            }
        }
    }

    fn queue_negotiation(&self, task: NegotiationTask) {
        if self.negotiation.send(task).is_err() {
            warn!(target: "panel::rtc", "negotiation queue closed; dropping task");
        }
    }

    pub fn execute(&self, command: PanelCommand) -> Result<(), SessionError> {
        debug!(target: "panel::sip", %command, "operator command");
        match command {
            PanelCommand::Answer => self.calls.answer_incoming().map(drop),
            PanelCommand::Decline => self.calls.decline_incoming().map(drop),
            PanelCommand::Hangup => self.calls.end_current_call().map(drop),
            PanelCommand::ListCalls => {
                self.calls.request_call_list();
                Ok(())
            }
        }
    }

    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.calls.shutdown();
        self.media.close().await;
        self.transport.close().await;
    }
}

async fn run_sip_worker(calls: Arc<CallSessionManager>, mut events: mpsc::UnboundedReceiver<SipEvent>) {
    while let Some(event) = events.recv().await {
        calls.handle_event(event);
    }
}
