use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::peer::types::IceCandidate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value of `response` that marks an accepted `start`.
pub const ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartResponse {
    Accepted { sdp_answer: Option<String> },
    Rejected { response: String },
}

/// Messages we send.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "id")]
pub enum Outbound {
    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "start", rename_all = "camelCase")]
    Start {
        #[serde(rename = "type")]
        kind: String,
        content_type: String,
        role: String,
        internal_meeting_id: String,
        voice_bridge: String,
        user_name: String,
        caller_name: String,
        sdp_offer: String,
        has_audio: bool,
        bitrate: u32,
    },

    #[serde(rename = "onIceCandidate")]
    OnIceCandidate { candidate: IceCandidate },
}

impl Outbound {
    pub fn start(config: &SessionConfig, sdp_offer: String) -> Self {
        Outbound::Start {
            kind: config.component.clone(),
            content_type: config.component.clone(),
            role: config.role.clone(),
            internal_meeting_id: config.internal_meeting_id.clone(),
            voice_bridge: config.voice_bridge.clone(),
            user_name: config.user_name.clone(),
            caller_name: config.caller_name.clone(),
            sdp_offer,
            has_audio: config.has_audio,
            bitrate: config.bitrate,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Outbound::Ping => "ping",
            Outbound::Start { .. } => "start",
            Outbound::OnIceCandidate { .. } => "onIceCandidate",
        }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::send(format!("encode {}: {e}", self.id())))
    }
}

/// Messages we receive. Unknown discriminators decode to [`Inbound::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Pong,
    StartResponse(StartResponse),
    IceCandidate(IceCandidate),
    Unknown(String),
}

#[derive(Deserialize)]
struct RawStartResponse {
    response: String,
    #[serde(rename = "sdpAnswer", default)]
    sdp_answer: Option<String>,
}

#[derive(Deserialize)]
struct RawIceCandidate {
    candidate: IceCandidate,
}

impl Inbound {
    pub fn id(&self) -> &str {
        match self {
            Inbound::Pong => "pong",
            Inbound::StartResponse(_) => "startResponse",
            Inbound::IceCandidate(_) => "iceCandidate",
            Inbound::Unknown(id) => id,
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text).map_err(Error::parse)?;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::parse("missing string `id` field"))?
            .to_owned();

        match id.as_str() {
            "pong" => Ok(Inbound::Pong),
            "startResponse" => {
                let raw: RawStartResponse = serde_json::from_value(value).map_err(Error::parse)?;
                let response = if raw.response == ACCEPTED {
                    StartResponse::Accepted {
                        sdp_answer: raw.sdp_answer.filter(|s| !s.trim().is_empty()),
                    }
                } else {
                    StartResponse::Rejected {
                        response: raw.response,
                    }
                };
                Ok(Inbound::StartResponse(response))
            }
            "iceCandidate" => {
                let raw: RawIceCandidate = serde_json::from_value(value).map_err(Error::parse)?;
                Ok(Inbound::IceCandidate(raw.candidate))
            }
            _ => Ok(Inbound::Unknown(id)),
        }
    }
}
