use std::time::Duration;
use thiserror::Error;

/// Result type alias using the client's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Signaling endpoint unreachable or the handshake was rejected.
    #[error("connect error: {0}")]
    Connect(String),

    /// Channel closed while sending.
    #[error("send error: {0}")]
    Send(String),

    /// Offer/answer exchange failed.
    #[error("negotiation error: {0}")]
    Negotiation(#[from] NegotiationError),

    /// Inbound frame could not be decoded.
    #[error("malformed signaling message: {0}")]
    MessageParse(String),

    /// Capture provider failed to open or produce a frame.
    #[error("capture error: {0}")]
    Capture(String),

    /// The WebRTC engine rejected an operation.
    #[error("engine error: {0}")]
    Engine(String),

    /// Invalid configuration input.
    #[error("configuration error: {0}")]
    Config(String),

    /// Reconnection bound reached; no further automatic attempt is made.
    #[error("reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

/// Reasons a negotiation attempt fails.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("no outbound video transceiver attached")]
    NoMediaTransceiver,

    #[error("ICE gathering did not complete within {0:?}")]
    GatheringTimeout(Duration),

    #[error("engine has no local description after creating the offer")]
    MissingLocalDescription,

    #[error("startResponse accepted without an sdpAnswer")]
    MissingAnswer,

    #[error("start rejected by server: {0}")]
    Rejected(String),
}

impl Error {
    pub fn connect(msg: impl std::fmt::Display) -> Self {
        Self::Connect(msg.to_string())
    }

    pub fn send(msg: impl std::fmt::Display) -> Self {
        Self::Send(msg.to_string())
    }

    pub fn parse(msg: impl std::fmt::Display) -> Self {
        Self::MessageParse(msg.to_string())
    }

    pub fn capture(msg: impl std::fmt::Display) -> Self {
        Self::Capture(msg.to_string())
    }

    pub fn engine(msg: impl std::fmt::Display) -> Self {
        Self::Engine(msg.to_string())
    }

    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Self::Engine(e.to_string())
    }
}
