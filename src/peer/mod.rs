pub mod connection;
pub mod engine;
pub mod ice;
pub mod types;

pub use connection::RtcEngine;
pub use engine::{Engine, EngineEvent, GatheringState, IceConnectionState};
pub use ice::PendingIceQueue;
pub use types::IceCandidate;
