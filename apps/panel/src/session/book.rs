use std::collections::HashMap;

use crate::protocol::{Call, CallState};

/// Side effects produced by a state change, applied by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    ShowIncoming(Call),
    ShowActive(Call),
    WithdrawIncoming(String),
    /// Tear down call media and withdraw controls. `None` when no call was
    /// being tracked as current.
    EndCurrent { call_id: Option<String> },
    Status(String),
}

/// Call registry plus the incoming and current slots.
///
/// Slots hold ids and always refer to calls present in the registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallBook {
    calls: HashMap<String, Call>,
    incoming: Option<String>,
    current: Option<String>,
}

impl CallBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &HashMap<String, Call> {
        &self.calls
    }

    pub fn call(&self, id: &str) -> Option<&Call> {
        self.calls.get(id)
    }

    pub fn incoming(&self) -> Option<&Call> {
        self.incoming.as_deref().and_then(|id| self.calls.get(id))
    }

    pub fn current(&self) -> Option<&Call> {
        self.current.as_deref().and_then(|id| self.calls.get(id))
    }

    pub fn has_live_calls(&self) -> bool {
        self.calls.values().any(Call::is_live)
    }

    pub fn apply_status(&mut self, call: Call) -> Vec<SessionEffect> {
        let mut effects = vec![SessionEffect::Status(call.state.to_string())];
        self.calls.insert(call.id.clone(), call.clone());
        match call.state {
            CallState::Incoming => effects.extend(self.offer_incoming(&call)),
            CallState::Confirmed => effects.extend(self.confirm(&call)),
            CallState::Disconnected => effects.extend(self.disconnect(&call.id)),
            _ => {}
        }
        effects
    }

    pub fn apply_answered(&mut self, call: Call) -> Vec<SessionEffect> {
        self.calls.insert(call.id.clone(), call.clone());
        self.confirm(&call)
    }

    /// Handles `call_disconnected`. With a call the effect is scoped to that
    /// id; without one the current call ends.
    pub fn apply_disconnected(&mut self, call: Option<Call>) -> Vec<SessionEffect> {
        match call {
            Some(call) => {
                let id = call.id.clone();
                self.calls.insert(id.clone(), call);
                self.disconnect(&id)
            }
            None => vec![SessionEffect::EndCurrent {
                call_id: self.current.take(),
            }],
        }
    }

    /// Replaces the registry and re-resolves both slots against it.
    pub fn apply_snapshot(&mut self, calls: HashMap<String, Call>) -> Vec<SessionEffect> {
        self.calls = calls;
        let mut effects = Vec::new();

        if let Some(id) = self.current.take() {
            if self.calls.get(&id).is_some_and(Call::is_live) {
                self.current = Some(id);
            } else {
                effects.push(SessionEffect::EndCurrent { call_id: Some(id) });
            }
        }

        if let Some(id) = self.incoming.take() {
            match self.calls.get(&id).cloned() {
                Some(call) if call.state == CallState::Confirmed => {
                    self.incoming = Some(id);
                    effects.extend(self.confirm(&call));
                }
                Some(call) if call.is_live() => self.incoming = Some(id),
                _ => effects.push(SessionEffect::WithdrawIncoming(id)),
            }
        }

        if self.current.is_none() {
            let answered = self
                .calls
                .values()
                .filter(|call| call.state == CallState::Confirmed)
                .min_by(|a, b| a.id.cmp(&b.id))
                .cloned();
            if let Some(call) = answered {
                effects.extend(self.confirm(&call));
            }
        }

        if self.incoming.is_none() {
            let ringing = self
                .calls
                .values()
                .filter(|call| call.state == CallState::Incoming)
                .filter(|call| self.current.as_deref() != Some(call.id.as_str()))
                .min_by(|a, b| a.id.cmp(&b.id))
                .cloned();
            if let Some(call) = ringing {
                effects.extend(self.offer_incoming(&call));
            }
        }

        if let Some(current) = self.current() {
            effects.push(SessionEffect::Status(current.state.to_string()));
        }
        effects
    }

    fn offer_incoming(&mut self, call: &Call) -> Vec<SessionEffect> {
        if self.incoming.is_some() || self.current.as_deref() == Some(call.id.as_str()) {
            return Vec::new();
        }
        self.incoming = Some(call.id.clone());
        vec![SessionEffect::ShowIncoming(call.clone())]
    }

    fn confirm(&mut self, call: &Call) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if self.incoming.as_deref() == Some(call.id.as_str()) {
            self.incoming = None;
            effects.push(SessionEffect::WithdrawIncoming(call.id.clone()));
        }
        if self.current.as_deref() != Some(call.id.as_str()) {
            self.current = Some(call.id.clone());
            effects.push(SessionEffect::ShowActive(call.clone()));
        }
        effects
    }

    fn disconnect(&mut self, id: &str) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        if self.current.as_deref() == Some(id) {
            self.current = None;
            effects.push(SessionEffect::EndCurrent {
                call_id: Some(id.to_string()),
            });
        }
        if self.incoming.as_deref() == Some(id) {
            self.incoming = None;
            effects.push(SessionEffect::WithdrawIncoming(id.to_string()));
        }
        effects
    }
}
