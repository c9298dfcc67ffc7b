use crate::error::{NegotiationError, Result};
use crate::peer::engine::{Engine, GatheringState};
use crate::peer::types::IceCandidate;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Settle delay before the first gathering-state poll.
pub const GATHER_SETTLE_DELAY: Duration = Duration::from_millis(500);
pub const GATHER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Remote candidates that arrived before the remote description was applied.
#[derive(Debug, Default)]
pub struct PendingIceQueue {
    candidates: Vec<IceCandidate>,
}

impl PendingIceQueue {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    /// Empties the queue, yielding candidates in arrival order.
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.candidates)
    }
}

/// Applies queued candidates after the remote description was set.
/// A candidate the engine refuses is logged and skipped.
pub async fn apply_pending_candidates(engine: &dyn Engine, queue: &mut PendingIceQueue) {
    let candidates = queue.drain();
    if candidates.is_empty() {
        return;
    }
    info!(count = candidates.len(), "Applying queued remote ICE candidates");

    for candidate in candidates {
        debug!(candidate = %candidate.candidate, "Applying pending candidate");
        if let Err(e) = engine.add_ice_candidate(candidate).await {
            warn!(error = %e, "Failed to apply pending candidate");
        }
    }
}

/// Polls the engine until gathering reports complete, failing once `limit` elapses.
pub async fn wait_for_gathering(engine: &dyn Engine, limit: Duration) -> Result<()> {
    let poll = async {
        sleep(GATHER_SETTLE_DELAY).await;
        loop {
            let gathering = engine.ice_gathering_state();
            debug!(
                ?gathering,
                connection = ?engine.ice_connection_state(),
                "Waiting for ICE gathering"
            );
            if gathering == GatheringState::Complete {
                break;
            }
            sleep(GATHER_POLL_INTERVAL).await;
        }
    };

    timeout(limit, poll)
        .await
        .map_err(|_| NegotiationError::GatheringTimeout(limit).into())
}

pub fn dump_candidate(label: &str, candidate: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        candidate.candidate, candidate.sdp_mid, candidate.sdp_mline_index
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateBreakdown {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate], relays_configured: bool) -> CandidateBreakdown {
    let mut breakdown = CandidateBreakdown::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            breakdown.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            breakdown.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            breakdown.relay += 1;
        }
    }

    info!(
        host = breakdown.host,
        srflx = breakdown.srflx,
        relay = breakdown.relay,
        "Local candidate analysis"
    );

    if relays_configured && breakdown.relay == 0 {
        warn!("No TURN relay candidates gathered; media may not traverse NAT");
    }

    breakdown
}
