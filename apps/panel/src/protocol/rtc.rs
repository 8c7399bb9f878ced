use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Engine-neutral session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Flattened ICE candidate as the bridge expects it. Unknown attributes are
/// sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateDescriptor {
    pub component: Option<String>,
    pub foundation: Option<String>,
    #[serde(rename = "ip", alias = "address")]
    pub address: Option<String>,
    pub port: Option<u16>,
    pub priority: Option<u32>,
    pub protocol: Option<String>,
    #[serde(rename = "type")]
    pub candidate_type: Option<String>,
    pub related_address: Option<String>,
    pub related_port: Option<u16>,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    pub tcp_type: Option<String>,
}

/// Messages carried on the `rtc` channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RtcMessage {
    Offer { sdp: String },
    Answer { sdp: String },
    IceCandidate { candidate: IceCandidateDescriptor },
    #[serde(other)]
    Unknown,
}

impl From<SessionDescription> for RtcMessage {
    fn from(description: SessionDescription) -> Self {
        match description.kind {
            SdpType::Offer => RtcMessage::Offer {
                sdp: description.sdp,
            },
            SdpType::Answer => RtcMessage::Answer {
                sdp: description.sdp,
            },
        }
    }
}
