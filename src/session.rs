//! Session state machine.
//!
//! `Session` is the single owner of [`SessionStatus`] and of the pending
//! remote-candidate queue. Inbound signaling frames, engine events and stop
//! requests all funnel through it; the negotiation lock serializes remote
//! description application against remote candidate delivery.

use crate::config::SessionConfig;
use crate::error::{Error, NegotiationError, Result};
use crate::peer::engine::{Engine, EngineEvent};
use crate::peer::ice::{apply_pending_candidates, PendingIceQueue};
use crate::peer::types::IceCandidate;
use crate::sdp::Negotiator;
use crate::signaling::message::{Inbound as InboundMessage, Outbound, StartResponse};
use crate::signaling::transport::{Channel, Connector, Inbound};
use crate::utils::random_id;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Init,
    Connecting,
    Negotiating,
    Active,
    Stopping,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Stop requests arriving in these states wait for the negotiation outcome.
    pub fn is_negotiating(self) -> bool {
        matches!(self, Self::Connecting | Self::Negotiating)
    }

    pub fn is_shutting_down(self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

#[derive(Default)]
struct Negotiation {
    pending: PendingIceQueue,
    remote_applied: bool,
}

pub struct Session {
    id: String,
    config: Arc<SessionConfig>,
    engine: Arc<dyn Engine>,
    connector: Arc<dyn Connector>,
    negotiator: Negotiator,
    status: watch::Sender<SessionStatus>,
    negotiation: Mutex<Negotiation>,
    channel: parking_lot::Mutex<Option<Channel>>,
    offered: AtomicBool,
    stop_requested: AtomicBool,
    stop_queued: AtomicBool,
    negotiation_request: Notify,
    last_failure: parking_lot::Mutex<Option<Error>>,
    tasks: parking_lot::Mutex<Vec<AbortHandle>>,
}

impl Session {
    pub fn new(
        config: Arc<SessionConfig>,
        engine: Arc<dyn Engine>,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let negotiator = Negotiator::new(engine.clone(), config.gather_timeout);
        let (status, _) = watch::channel(SessionStatus::Init);
        let session = Arc::new(Self {
            id: random_id(),
            config,
            engine,
            connector,
            negotiator,
            status,
            negotiation: Mutex::new(Negotiation::default()),
            channel: parking_lot::Mutex::new(None),
            offered: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            stop_queued: AtomicBool::new(false),
            negotiation_request: Notify::new(),
            last_failure: parking_lot::Mutex::new(None),
            tasks: parking_lot::Mutex::new(Vec::new()),
        });
        info!(session_id = %session.id, endpoint = %session.config.endpoint, "Session created");
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Asks the supervisor to start negotiating. The permit is kept if
    /// nobody is waiting yet.
    pub fn request_negotiation(&self) {
        self.negotiation_request.notify_one();
    }

    pub async fn negotiation_requested(&self) {
        self.negotiation_request.notified().await;
    }

    /// Most recent failure reason, if the session went FAILED.
    pub fn last_failure(&self) -> Option<Error> {
        self.last_failure.lock().clone()
    }

    /// Background work (keep-alive, frame pacing) cancelled by teardown
    /// before the transport closes.
    pub fn register_task(&self, handle: AbortHandle) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Atomically moves to `next` if `allowed` holds for the current status.
    fn transition_if(&self, allowed: impl Fn(SessionStatus) -> bool, next: SessionStatus) -> bool {
        let mut from = None;
        let changed = self.status.send_if_modified(|current| {
            if allowed(*current) && *current != next {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            info!(session_id = %self.id, ?from, to = ?next, "Session status changed");
        }
        changed
    }

    /// Moves to FAILED unless the session is already failed or shutting down.
    pub(crate) fn fail(&self, err: &Error) {
        let mut from = None;
        self.status.send_if_modified(|current| {
            if current.is_shutting_down() || *current == SessionStatus::Failed {
                return false;
            }
            // Written before FAILED becomes visible.
            *self.last_failure.lock() = Some(err.clone());
            from = Some(*current);
            *current = SessionStatus::Failed;
            true
        });
        if let Some(from) = from {
            info!(session_id = %self.id, ?from, to = ?SessionStatus::Failed, "Session status changed");
            error!(session_id = %self.id, error = %err, "Session failed");
        }
    }

    /// Connects the transport, generates and sends the offer.
    /// Returns the inbound half for the receive loop.
    pub async fn connect(&self) -> Result<Inbound> {
        if self.stop_requested() {
            return Err(Error::connect("session stop requested"));
        }
        if !self.transition_if(
            |s| matches!(s, SessionStatus::Init | SessionStatus::Failed),
            SessionStatus::Connecting,
        ) {
            return Err(Error::connect(format!(
                "cannot connect while {:?}",
                self.status()
            )));
        }

        self.close_transport();

        let (channel, inbound) = match self.connector.connect(&self.config).await {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        {
            let mut negotiation = self.negotiation.lock().await;
            negotiation.pending.clear();
            negotiation.remote_applied = false;
        }
        *self.channel.lock() = Some(channel.clone());
        self.transition_if(|s| s == SessionStatus::Connecting, SessionStatus::Negotiating);

        if let Err(e) = self.send_offer(&channel).await {
            self.fail(&e);
            return Err(e);
        }
        Ok(inbound)
    }

    async fn send_offer(&self, channel: &Channel) -> Result<()> {
        if self.offered.swap(true, Ordering::SeqCst) {
            self.engine.reset().await?;
        }
        let offer = self.negotiator.build_offer().await?;
        channel.send(&Outbound::start(&self.config, offer.rewritten))?;
        info!(session_id = %self.id, "Start request sent");
        Ok(())
    }

    pub fn send(&self, message: &Outbound) -> Result<()> {
        let channel = self.channel.lock().clone();
        match channel {
            Some(channel) => channel.send(message),
            None => Err(Error::send(format!("no open channel for {}", message.id()))),
        }
    }

    /// Closes the current transport, if any.
    pub fn close_transport(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    /// Dispatches one inbound frame. Malformed frames and unknown ids are
    /// logged and dropped.
    pub async fn handle_message(&self, text: &str) {
        let message = match InboundMessage::decode(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %self.id, status = ?self.status(), error = %e, "Dropping signaling frame");
                return;
            }
        };
        debug!(session_id = %self.id, id = message.id(), "Received signaling message");

        match message {
            InboundMessage::Pong => debug!(session_id = %self.id, "Received pong"),
            InboundMessage::StartResponse(StartResponse::Accepted {
                sdp_answer: Some(sdp),
            }) => self.on_answer(sdp).await,
            InboundMessage::StartResponse(StartResponse::Accepted { sdp_answer: None }) => {
                self.fail(&NegotiationError::MissingAnswer.into())
            }
            InboundMessage::StartResponse(StartResponse::Rejected { response }) => {
                self.fail(&NegotiationError::Rejected(response).into())
            }
            InboundMessage::IceCandidate(candidate) => self.on_remote_candidate(candidate).await,
            InboundMessage::Unknown(id) => {
                debug!(session_id = %self.id, id = %id, "Ignoring unknown signaling message")
            }
        }
    }

    async fn on_answer(&self, sdp: String) {
        let mut negotiation = self.negotiation.lock().await;
        if self.status() != SessionStatus::Negotiating || negotiation.remote_applied {
            warn!(session_id = %self.id, status = ?self.status(), "Ignoring startResponse outside negotiation");
            return;
        }

        if let Err(e) = self.engine.set_remote_answer(sdp).await {
            drop(negotiation);
            self.fail(&e);
            return;
        }
        negotiation.remote_applied = true;
        info!(session_id = %self.id, "Remote description applied");

        apply_pending_candidates(self.engine.as_ref(), &mut negotiation.pending).await;
        self.transition_if(|s| s == SessionStatus::Negotiating, SessionStatus::Active);
    }

    async fn on_remote_candidate(&self, candidate: IceCandidate) {
        let mut negotiation = self.negotiation.lock().await;
        if negotiation.remote_applied {
            debug!(session_id = %self.id, candidate = %candidate.candidate, "Adding remote candidate");
            if let Err(e) = self.engine.add_ice_candidate(candidate).await {
                warn!(session_id = %self.id, error = %e, "Failed to add remote candidate");
            }
        } else {
            negotiation.pending.push(candidate);
            debug!(
                session_id = %self.id,
                queued = negotiation.pending.len(),
                "Remote description not set yet, queuing candidate"
            );
        }
    }

    /// Reacts to one engine event. Terminal ICE states fail the session so
    /// the supervisor reconnects.
    pub async fn handle_engine_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let message = Outbound::OnIceCandidate { candidate };
                if let Err(e) = self.send(&message) {
                    let status = self.status();
                    if matches!(status, SessionStatus::Negotiating | SessionStatus::Active) {
                        self.fail(&e);
                    } else {
                        debug!(session_id = %self.id, ?status, error = %e, "Dropping local candidate");
                    }
                }
            }
            EngineEvent::GatheringComplete => {
                debug!(session_id = %self.id, "Local ICE gathering complete")
            }
            EngineEvent::IceConnectionState(state) if state.is_terminal() => {
                if self.status().is_shutting_down() {
                    debug!(session_id = %self.id, ?state, "ICE closed during shutdown");
                } else {
                    self.fail(&Error::engine(format!("ICE connection {state:?}")));
                }
            }
            EngineEvent::IceConnectionState(state) => {
                debug!(session_id = %self.id, ?state, "ICE connection state")
            }
        }
    }

    /// Stops the session. Safe to call concurrently and repeatedly: exactly
    /// one caller tears down, the others wait until STOPPED.
    pub async fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut rx = self.status.subscribe();

        loop {
            let current = *rx.borrow_and_update();
            match current {
                SessionStatus::Stopped => return,
                SessionStatus::Stopping => {
                    info!(session_id = %self.id, "Stop already in progress, waiting");
                    let _ = rx.wait_for(|s| *s == SessionStatus::Stopped).await;
                    return;
                }
                s if s.is_negotiating() => {
                    if self.stop_queued.swap(true, Ordering::SeqCst) {
                        info!(session_id = %self.id, "Stop already queued, waiting");
                        let _ = rx.wait_for(|s| *s == SessionStatus::Stopped).await;
                        return;
                    }
                    info!(session_id = %self.id, status = ?s, "Stop requested while negotiating, deferring");
                    let _ = rx.wait_for(|s| !s.is_negotiating()).await;
                }
                _ => {
                    if self.transition_if(|s| s == current, SessionStatus::Stopping) {
                        self.teardown().await;
                        return;
                    }
                }
            }
        }
    }

    async fn teardown(&self) {
        info!(session_id = %self.id, "Tearing down session");

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }

        self.close_transport();
        {
            let mut negotiation = self.negotiation.lock().await;
            negotiation.pending.clear();
            negotiation.remote_applied = false;
        }

        self.engine.close().await;
        self.transition_if(|s| s == SessionStatus::Stopping, SessionStatus::Stopped);
    }
}
