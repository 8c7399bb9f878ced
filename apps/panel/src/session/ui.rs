use parking_lot::Mutex;
use tracing::info;

use crate::protocol::Call;

/// Presentation hooks driven by call state changes.
pub trait CallUi: Send + Sync {
    fn show_incoming(&self, call: &Call);
    fn show_active(&self, call: &Call);
    fn withdraw_incoming(&self, call_id: &str);
    fn withdraw_controls(&self, call_id: Option<&str>);
    fn status(&self, text: &str);
}

/// Reports call prompts through the log; used by the headless binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingUi;

impl CallUi for TracingUi {
    fn show_incoming(&self, call: &Call) {
        info!(
            target: "panel::ui",
            call_id = %call.id,
            remote = call.remote_uri.as_deref().unwrap_or("unknown"),
            "incoming call; type `answer` or `decline`"
        );
    }

    fn show_active(&self, call: &Call) {
        info!(
            target: "panel::ui",
            call_id = %call.id,
            remote = call.remote_uri.as_deref().unwrap_or("unknown"),
            "call active; type `hangup` to end"
        );
    }

    fn withdraw_incoming(&self, call_id: &str) {
        info!(target: "panel::ui", %call_id, "incoming prompt withdrawn");
    }

    fn withdraw_controls(&self, call_id: Option<&str>) {
        info!(target: "panel::ui", call_id = call_id.unwrap_or("-"), "call controls withdrawn");
    }

    fn status(&self, text: &str) {
        info!(target: "panel::ui", status = %text, "call status");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Incoming(String),
    Active(String),
    IncomingWithdrawn(String),
    ControlsWithdrawn(Option<String>),
    Status(String),
}

/// Records every hook invocation in order.
#[derive(Debug, Default)]
pub struct RecordingUi {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingUi {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl CallUi for RecordingUi {
    fn show_incoming(&self, call: &Call) {
        self.events.lock().push(UiEvent::Incoming(call.id.clone()));
    }

    fn show_active(&self, call: &Call) {
        self.events.lock().push(UiEvent::Active(call.id.clone()));
    }

    fn withdraw_incoming(&self, call_id: &str) {
        self.events
            .lock()
            .push(UiEvent::IncomingWithdrawn(call_id.to_string()));
    }

    fn withdraw_controls(&self, call_id: Option<&str>) {
        self.events
            .lock()
            .push(UiEvent::ControlsWithdrawn(call_id.map(str::to_string)));
    }

    fn status(&self, text: &str) {
        self.events.lock().push(UiEvent::Status(text.to_string()));
    }
}
