//! Wire envelope shared by every channel on the signaling socket.
//!
//! Every frame is a JSON object `{"channel": "...", "message": ...}`. The
//! channel name is matched case-insensitively on the way in and always
//! written lower-case on the way out. A bare `{"type": "ping"}` without a
//! channel is the bridge's heartbeat and is routed to [`Channel::Sys`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub mod rtc;
pub mod sip;

pub use rtc::{IceCandidateDescriptor, RtcMessage, SdpType, SessionDescription};
pub use sip::{Call, CallState, CallStatus, SipCommand, SipEvent};

/// Literal reply to any `sys` frame.
pub const PONG: &str = "pong";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Rtc,
    Sip,
    Sys,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Rtc => "rtc",
            Channel::Sip => "sip",
            Channel::Sys => "sys",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "rtc" => Ok(Channel::Rtc),
            "sip" => Ok(Channel::Sip),
            "sys" => Ok(Channel::Sys),
            _ => Err(ProtocolError::UnknownChannel(raw.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is not a json object")]
    NotAnObject,
    #[error("frame has no channel")]
    MissingChannel,
    #[error("unknown channel {0:?}")]
    UnknownChannel(String),
    #[error("invalid {channel} payload: {source}")]
    Payload {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: Channel,
    #[serde(default)]
    pub message: Value,
}

impl Envelope {
    pub fn new(channel: Channel, message: Value) -> Self {
        Self { channel, message }
    }

    pub fn from_payload<T: Serialize + ?Sized>(
        channel: Channel,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let message = serde_json::to_value(payload)?;
        Ok(Self { channel, message })
    }

    /// Decodes the inner message as the channel-specific payload type.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.message.clone()).map_err(|source| ProtocolError::Payload {
            channel: self.channel,
            source,
        })
    }
}

pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let Value::Object(mut object) = serde_json::from_str::<Value>(text)? else {
        return Err(ProtocolError::NotAnObject);
    };
    match object.remove("channel") {
        Some(Value::String(raw)) => {
            let channel = raw.parse()?;
            let message = object.remove("message").unwrap_or(Value::Null);
            Ok(Envelope { channel, message })
        }
        Some(other) => Err(ProtocolError::UnknownChannel(other.to_string())),
        None if is_bare_ping(&object) => Ok(Envelope {
            channel: Channel::Sys,
            message: Value::Object(object),
        }),
        None => Err(ProtocolError::MissingChannel),
    }
}

fn is_bare_ping(object: &Map<String, Value>) -> bool {
    object.get("type").and_then(Value::as_str) == Some("ping")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_names_are_case_insensitive_on_input() {
        let envelope = decode_envelope(r#"{"channel":"SIP","message":{"type":"get_call_list"}}"#)
            .expect("decode");
        assert_eq!(envelope.channel, Channel::Sip);
        assert_eq!(
            encode_envelope(&envelope).expect("encode"),
            r#"{"channel":"sip","message":{"type":"get_call_list"}}"#
        );
    }

    #[test]
    fn bare_ping_is_routed_to_sys() {
        let envelope = decode_envelope(r#"{"type":"ping"}"#).expect("decode");
        assert_eq!(envelope.channel, Channel::Sys);
        assert_eq!(envelope.message, json!({"type": "ping"}));
    }

    #[test]
    fn rejects_frames_without_a_known_channel() {
        assert!(matches!(
            decode_envelope("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode_envelope("[1,2]"),
            Err(ProtocolError::NotAnObject)
        ));
        assert!(matches!(
            decode_envelope(r#"{"message":{}}"#),
            Err(ProtocolError::MissingChannel)
        ));
        assert!(matches!(
            decode_envelope(r#"{"channel":"video","message":{}}"#),
            Err(ProtocolError::UnknownChannel(name)) if name == "video"
        ));
    }

    #[test]
    fn payload_errors_name_the_channel() {
        let envelope = decode_envelope(r#"{"channel":"rtc","message":{"type":"offer"}}"#)
            .expect("decode");
        let err = envelope.payload::<RtcMessage>().unwrap_err();
        assert!(matches!(err, ProtocolError::Payload { channel: Channel::Rtc, .. }));
    }

    #[test]
    fn pong_reply_is_a_json_string() {
        let envelope = Envelope::from_payload(Channel::Sys, PONG).expect("envelope");
        assert_eq!(
            encode_envelope(&envelope).expect("encode"),
            r#"{"channel":"sys","message":"pong"}"#
        );
    }
}
