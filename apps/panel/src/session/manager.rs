use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::book::{CallBook, SessionEffect};
use super::ui::CallUi;
use super::SessionError;
use crate::media::MediaBridge;
use crate::protocol::{Channel, SipCommand, SipEvent};
use crate::transport::MessageTransport;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tracks calls reported by the bridge and issues call-control commands.
pub struct CallSessionManager {
    book: Mutex<CallBook>,
    outbound: MessageTransport,
    media: Arc<MediaBridge>,
    ui: Arc<dyn CallUi>,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl CallSessionManager {
    /// Builds the manager and asks the bridge for its call list.
    pub fn new(
        outbound: MessageTransport,
        media: Arc<MediaBridge>,
        ui: Arc<dyn CallUi>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            book: Mutex::new(CallBook::new()),
            outbound,
            media,
            ui,
            poll_interval,
            poller: Mutex::new(None),
        });
        manager.request_call_list();
        manager
    }

    pub fn request_call_list(&self) {
        self.send(SipCommand::GetCallList);
    }

    pub fn answer(&self, call_id: &str) {
        self.send(SipCommand::AnswerCall {
            call_id: call_id.to_string(),
        });
    }

    pub fn decline(&self, call_id: &str) {
        self.send(SipCommand::DeclineCall {
            call_id: call_id.to_string(),
        });
    }

    pub fn end_call(&self, call_id: &str) {
        self.send(SipCommand::EndCall {
            call_id: call_id.to_string(),
        });
    }

    pub fn answer_incoming(&self) -> Result<String, SessionError> {
        let id = self.incoming_id()?;
        self.answer(&id);
        Ok(id)
    }

    pub fn decline_incoming(&self) -> Result<String, SessionError> {
        let id = self.incoming_id()?;
        self.decline(&id);
        Ok(id)
    }

    pub fn end_current_call(&self) -> Result<String, SessionError> {
        let id = self
            .book
            .lock()
            .current()
            .map(|call| call.id.clone())
            .ok_or(SessionError::NoCurrentCall)?;
        self.end_call(&id);
        Ok(id)
    }

    fn incoming_id(&self) -> Result<String, SessionError> {
        self.book
            .lock()
            .incoming()
            .map(|call| call.id.clone())
            .ok_or(SessionError::NoIncomingCall)
    }

    fn send(&self, command: SipCommand) {
        debug!(target: "panel::sip", ?command, "sending call command");
        self.outbound.send(Channel::Sip, &command);
    }

    pub fn handle_event(self: &Arc<Self>, event: SipEvent) {
        let effects = {
            let mut book = self.book.lock();
            match event {
                SipEvent::CallList { calls } => {
                    debug!(target: "panel::sip", count = calls.len(), "call list received");
                    book.apply_snapshot(calls)
                }
                SipEvent::OnCallStatus(status) => match status.into_call() {
                    Some(call) => {
                        info!(target: "panel::sip", call_id = %call.id, state = %call.state, "call status");
                        book.apply_status(call)
                    }
                    None => {
                        warn!(target: "panel::sip", "call status without a call");
                        Vec::new()
                    }
                },
                SipEvent::CallAnswered { call } => {
                    info!(target: "panel::sip", call_id = %call.id, "call answered");
                    book.apply_answered(call)
                }
                SipEvent::CallDisconnected { call } => {
                    info!(
                        target: "panel::sip",
                        call_id = call.as_ref().map(|call| call.id.as_str()).unwrap_or("-"),
                        "call disconnected"
                    );
                    book.apply_disconnected(call)
                }
                SipEvent::Unknown => {
                    debug!(target: "panel::sip", "ignoring unknown sip message");
                    Vec::new()
                }
            }
        };
        self.apply_effects(effects);
        self.ensure_poller();
    }

    fn apply_effects(&self, effects: Vec<SessionEffect>) {
        for effect in effects {
            match effect {
                SessionEffect::ShowIncoming(call) => self.ui.show_incoming(&call),
                SessionEffect::ShowActive(call) => self.ui.show_active(&call),
                SessionEffect::WithdrawIncoming(id) => self.ui.withdraw_incoming(&id),
                SessionEffect::EndCurrent { call_id } => {
                    let stopped = self.media.teardown_renderers();
                    info!(target: "panel::sip", call_id = call_id.as_deref().unwrap_or("-"), stopped, "current call ended");
                    self.ui.withdraw_controls(call_id.as_deref());
                }
                SessionEffect::Status(text) => self.ui.status(&text),
            }
        }
    }

    pub fn snapshot(&self) -> CallBook {
        self.book.lock().clone()
    }

    pub fn has_live_calls(&self) -> bool {
        self.book.lock().has_live_calls()
    }

    pub fn poller_running(&self) -> bool {
        self.poller.lock().is_some()
    }

    /// Starts the call-list poller if a live call exists and none is running.
    pub fn ensure_poller(self: &Arc<Self>) {
        let mut poller = self.poller.lock();
        if poller.is_some() || !self.has_live_calls() {
            return;
        }
        debug!(target: "panel::sip", interval_ms = self.poll_interval.as_millis() as u64, "starting call list poller");
        *poller = Some(tokio::spawn(poll_call_list(
            Arc::downgrade(self),
            self.poll_interval,
        )));
    }

    pub fn shutdown(&self) {
        if let Some(task) = self.poller.lock().take() {
            task.abort();
        }
    }
}

async fn poll_call_list(manager: Weak<CallSessionManager>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(manager) = manager.upgrade() else {
            break;
        };
        {
            let mut poller = manager.poller.lock();
            if !manager.has_live_calls() {
                debug!(target: "panel::sip", "no live calls; stopping call list poller");
                poller.take();
                break;
            }
        }
        manager.request_call_list();
    }
}
