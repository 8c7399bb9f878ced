use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// SIP call state as reported by the bridge in `callStateString`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CallState {
    Null,
    Calling,
    Incoming,
    Early,
    Connecting,
    Confirmed,
    Disconnected,
    Other(String),
}

impl CallState {
    pub fn as_str(&self) -> &str {
        match self {
            CallState::Null => "NULL",
            CallState::Calling => "CALLING",
            CallState::Incoming => "INCOMING",
            CallState::Early => "EARLY",
            CallState::Connecting => "CONNECTING",
            CallState::Confirmed => "CONFIRMED",
            CallState::Disconnected => "DISCONNECTED",
            CallState::Other(raw) => raw,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, CallState::Disconnected)
    }
}

impl From<String> for CallState {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "NULL" => CallState::Null,
            "CALLING" => CallState::Calling,
            "INCOMING" => CallState::Incoming,
            "EARLY" => CallState::Early,
            "CONNECTING" => CallState::Connecting,
            "CONFIRMED" => CallState::Confirmed,
            "DISCONNECTED" => CallState::Disconnected,
            _ => CallState::Other(raw),
        }
    }
}

impl From<CallState> for String {
    fn from(state: CallState) -> Self {
        match state {
            CallState::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A call as tracked by the bridge. Only the id and state drive behaviour;
/// the remaining fields are carried for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    #[serde(rename = "callIdString", alias = "callId")]
    pub id: String,
    #[serde(rename = "callStateString", alias = "callState")]
    pub state: CallState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc_id_int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id_int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_state_int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rem_audio_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rem_video_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<f64>,
}

impl Call {
    pub fn new(id: impl Into<String>, state: CallState) -> Self {
        Self {
            id: id.into(),
            state,
            acc_id_int: None,
            call_id_int: None,
            call_state_int: None,
            local_uri: None,
            local_contact: None,
            remote_uri: None,
            remote_contact: None,
            rem_audio_count: None,
            rem_video_count: None,
            connected_duration: None,
            total_duration: None,
        }
    }

    pub fn with_remote_uri(mut self, uri: impl Into<String>) -> Self {
        self.remote_uri = Some(uri.into());
        self
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_disconnected()
    }
}

/// Payload of `on_call_status`.
///
/// The bridge sends either a full `call` object or the older flat
/// notification (`call_id`, `call_status`, `acc_id`, `local_uri`,
/// `remote_uri`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<Call>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_uri: Option<String>,
}

impl CallStatus {
    pub fn from_call(call: Call) -> Self {
        Self {
            call: Some(call),
            ..Default::default()
        }
    }

    pub fn into_call(self) -> Option<Call> {
        if let Some(call) = self.call {
            return Some(call);
        }
        let (id, status) = (self.call_id?, self.call_status?);
        let mut call = Call::new(id, CallState::from(status));
        call.acc_id_int = self.acc_id.and_then(|raw| raw.parse().ok());
        call.local_uri = self.local_uri;
        call.remote_uri = self.remote_uri;
        Some(call)
    }
}

/// Commands sent on the `sip` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SipCommand {
    GetCallList,
    AnswerCall { call_id: String },
    DeclineCall { call_id: String },
    EndCall { call_id: String },
}

/// Events received on the `sip` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SipEvent {
    CallList {
        #[serde(default)]
        calls: HashMap<String, Call>,
    },
    OnCallStatus(CallStatus),
    CallAnswered {
        call: Call,
    },
    CallDisconnected {
        #[serde(default)]
        call: Option<Call>,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_match_bridge_shape() {
        assert_eq!(
            serde_json::to_value(SipCommand::GetCallList).expect("serialize"),
            json!({"type": "get_call_list"})
        );
        assert_eq!(
            serde_json::to_value(SipCommand::AnswerCall {
                call_id: "abc".into()
            })
            .expect("serialize"),
            json!({"type": "answer_call", "call_id": "abc"})
        );
    }

    #[test]
    fn call_list_decodes_registry() {
        let event: SipEvent = serde_json::from_value(json!({
            "type": "call_list",
            "calls": {
                "abc": {
                    "callIdString": "abc",
                    "callStateString": "CONFIRMED",
                    "remoteUri": "sip:door@pbx",
                    "connectedDuration": 3.5,
                    "remAudioCount": 1
                }
            }
        }))
        .expect("decode");
        let SipEvent::CallList { calls } = event else {
            panic!("expected call list");
        };
        let call = &calls["abc"];
        assert_eq!(call.state, CallState::Confirmed);
        assert_eq!(call.remote_uri.as_deref(), Some("sip:door@pbx"));
        assert_eq!(call.rem_audio_count, Some(1));
    }

    #[test]
    fn status_accepts_call_object_and_flat_notification() {
        let nested: SipEvent = serde_json::from_value(json!({
            "type": "on_call_status",
            "call": {"callIdString": "abc", "callStateString": "INCOMING"}
        }))
        .expect("decode nested");
        let flat: SipEvent = serde_json::from_value(json!({
            "type": "on_call_status",
            "call_id": "abc",
            "call_status": "INCOMING",
            "acc_id": "0",
            "local_uri": "sip:panel@pbx",
            "remote_uri": "sip:door@pbx"
        }))
        .expect("decode flat");

        for event in [nested, flat] {
            let SipEvent::OnCallStatus(status) = event else {
                panic!("expected status");
            };
            let call = status.into_call().expect("call");
            assert_eq!(call.id, "abc");
            assert_eq!(call.state, CallState::Incoming);
        }
    }

    #[test]
    fn disconnected_may_omit_call() {
        let event: SipEvent =
            serde_json::from_value(json!({"type": "call_disconnected"})).expect("decode");
        assert_eq!(event, SipEvent::CallDisconnected { call: None });
    }

    #[test]
    fn unknown_states_and_types_are_preserved_or_ignored() {
        let call: Call = serde_json::from_value(json!({
            "callIdString": "x",
            "callStateString": "HOLD"
        }))
        .expect("decode");
        assert_eq!(call.state, CallState::Other("HOLD".into()));
        assert!(call.is_live());
        assert_eq!(
            serde_json::to_value(&call).expect("serialize")["callStateString"],
            "HOLD"
        );

        let event: SipEvent =
            serde_json::from_value(json!({"type": "registration", "ok": true})).expect("decode");
        assert_eq!(event, SipEvent::Unknown);
    }
}
