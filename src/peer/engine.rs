// The session drives ICE, DTLS and RTP only through `Engine` and the events
// it pushes.

use crate::capture::Frame;
use crate::error::Result;
use crate::peer::types::IceCandidate;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl IceConnectionState {
    /// States that require a full reconnection.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Local candidate discovered; forwarded to the remote as `onIceCandidate`.
    LocalCandidate(IceCandidate),
    GatheringComplete,
    IceConnectionState(IceConnectionState),
}

#[async_trait]
pub trait Engine: Send + Sync {
    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self) -> Result<()>;

    async fn local_description(&self) -> Option<String>;

    async fn set_remote_answer(&self, sdp: String) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Attaches the outbound video track.
    async fn add_track(&self) -> Result<()>;

    async fn remove_track(&self) -> Result<()>;

    async fn has_video_transceiver(&self) -> bool;

    async fn write_frame(&self, frame: &Frame) -> Result<()>;

    fn ice_gathering_state(&self) -> GatheringState;

    fn ice_connection_state(&self) -> IceConnectionState;

    /// Replaces the peer connection with a fresh one, re-attaching the
    /// outbound track if one was attached.
    async fn reset(&self) -> Result<()>;

    async fn close(&self);
}
