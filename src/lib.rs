pub mod capture;
pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;
pub mod supervisor;
pub mod track;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Error, NegotiationError, Result};
pub use session::{Session, SessionStatus};
pub use supervisor::Supervisor;
pub use track::TrackCoordinator;

use capture::CaptureSource;
use peer::connection::RtcEngine;
use peer::engine::Engine;
use signaling::transport::WsConnector;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Runs one screen-share session until the supervisor gives up or the
/// process receives Ctrl-C.
pub async fn run(config: SessionConfig, capture: Box<dyn CaptureSource>) -> Result<()> {
    config.validate()?;
    let config = Arc::new(config);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let engine: Arc<dyn Engine> = Arc::new(RtcEngine::new(&config, events_tx).await?);
    let session = Session::new(config.clone(), engine.clone(), Arc::new(WsConnector));

    let supervisor = tokio::spawn(Supervisor::new(session.clone(), events_rx).run());
    let coordinator = TrackCoordinator::new(session.clone(), engine, capture, config.capture);

    if let Err(e) = coordinator.start().await {
        error!(error = %e, "Failed to start outbound track");
        session.stop().await;
        supervisor.abort();
        return Err(e);
    }

    let outcome = tokio::select! {
        joined = supervisor => match joined {
            Ok(res) => res,
            Err(e) => Err(Error::engine(format!("supervisor task failed: {e}"))),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping session");
            Ok(())
        }
    };

    coordinator.stop().await;
    session.stop().await;
    info!(session_id = %session.id(), "Session finished");
    outcome
}
