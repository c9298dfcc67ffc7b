use crate::capture::{CaptureSource, Frame};
use crate::config::CaptureSettings;
use crate::error::Result;
use crate::peer::engine::Engine;
use crate::session::{Session, SessionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

const FRAME_LOG_EVERY: u64 = 30;

type SharedCapture = Arc<Mutex<Box<dyn CaptureSource>>>;

struct Pacer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TrackCoordinator {
    session: Arc<Session>,
    engine: Arc<dyn Engine>,
    capture: SharedCapture,
    settings: CaptureSettings,
    pacer: parking_lot::Mutex<Option<Pacer>>,
}

impl TrackCoordinator {
    pub fn new(
        session: Arc<Session>,
        engine: Arc<dyn Engine>,
        capture: Box<dyn CaptureSource>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            session,
            engine,
            capture: Arc::new(Mutex::new(capture)),
            settings,
            pacer: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.pacer
            .lock()
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    /// Opens the capture, attaches the outbound track, asks for negotiation
    /// if none happened yet and starts pacing frames into the track.
    pub async fn start(&self) -> Result<()> {
        if self.pacer.lock().is_some() {
            debug!("Track already started");
            return Ok(());
        }

        {
            let mut capture = self.capture.lock().await;
            capture.open(self.settings.region).await?;
            if !capture.encoded() {
                warn!("Capture source yields raw frames, receivers will not decode the video");
            }
            if let Err(e) = self.engine.add_track().await {
                capture.close().await;
                return Err(e);
            }
        }

        if self.session.status() == SessionStatus::Init {
            self.session.request_negotiation();
        }

        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(pace(
            self.engine.clone(),
            self.capture.clone(),
            self.settings.frame_interval(),
            stop_rx,
        ));
        self.session.register_task(handle.abort_handle());
        *self.pacer.lock() = Some(Pacer { stop, handle });

        info!(
            fps = self.settings.fps,
            width = self.settings.region.width,
            height = self.settings.region.height,
            "Track started"
        );
        Ok(())
    }

    /// Detaches the track, ends the pacing loop and releases the capture.
    /// No-op when not started.
    pub async fn stop(&self) {
        let Some(pacer) = self.pacer.lock().take() else {
            return;
        };

        if let Err(e) = self.engine.remove_track().await {
            warn!(error = %e, "Failed to detach outbound track");
        }

        let _ = pacer.stop.send(());
        if let Err(e) = pacer.handle.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Pacing task ended abnormally");
            }
        }

        self.capture.lock().await.close().await;
        info!("Track stopped");
    }
}

async fn grab(capture: &SharedCapture) -> Result<Frame> {
    capture.lock().await.grab_frame().await
}

/// Pulls one frame per `interval`. A slow pull is never compensated for.
async fn pace(
    engine: Arc<dyn Engine>,
    capture: SharedCapture,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut frames: u64 = 0;

    loop {
        let started = Instant::now();
        let grabbed = tokio::select! {
            biased;
            _ = &mut stop => break,
            res = grab(&capture) => res,
        };

        let frame = match grabbed {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, frames, "Capture failed, stopping frame pacing");
                break;
            }
        };

        frames += 1;
        if frames % FRAME_LOG_EVERY == 0 {
            debug!(frames, width = frame.width, height = frame.height, "Captured frames");
        }

        if let Err(e) = engine.write_frame(&frame).await {
            debug!(error = %e, "Dropping frame");
        }

        if let Some(remaining) = interval.checked_sub(started.elapsed()) {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = sleep(remaining) => {}
            }
        }
    }

    debug!(frames, "Frame pacing stopped");
}
