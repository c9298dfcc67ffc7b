use crate::config::ReconnectPolicy;
use crate::error::{Error, Result};
use crate::peer::engine::EngineEvent;
use crate::session::{Session, SessionStatus};
use crate::signaling::message::Outbound;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct ReconnectState {
    pub attempt: u32,
    pub backoff: Duration,
    keepalive: Option<JoinHandle<()>>,
}

impl ReconnectState {
    fn reset(&mut self) {
        self.attempt = 0;
        self.backoff = Duration::ZERO;
    }

    fn cancel_keepalive(&mut self) {
        if let Some(handle) = self.keepalive.take() {
            handle.abort();
        }
    }
}

pub struct Supervisor {
    session: Arc<Session>,
    engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    policy: ReconnectPolicy,
    keepalive_interval: Duration,
}

impl Supervisor {
    pub fn new(session: Arc<Session>, engine_events: mpsc::UnboundedReceiver<EngineEvent>) -> Self {
        let policy = session.config().reconnect;
        let keepalive_interval = session.config().keepalive_interval;
        Self {
            session,
            engine_events,
            policy,
            keepalive_interval,
        }
    }

    /// Drives the session until it is stopped (`Ok`) or the reconnection
    /// bound is exhausted (`Err(ReconnectExhausted)`).
    pub async fn run(self) -> Result<()> {
        let Supervisor {
            session,
            engine_events,
            policy,
            keepalive_interval,
        } = self;

        let mut status = session.subscribe();
        tokio::select! {
            _ = session.negotiation_requested() => {}
            _ = status.wait_for(|s| s.is_shutting_down()) => return Ok(()),
        }

        let forwarder = spawn_event_forwarder(session.clone(), engine_events);
        let runner = Runner {
            session,
            policy,
            keepalive_interval,
        };
        let result = runner.supervise().await;
        forwarder.abort();
        result
    }
}

struct Runner {
    session: Arc<Session>,
    policy: ReconnectPolicy,
    keepalive_interval: Duration,
}

impl Runner {
    async fn supervise(&self) -> Result<()> {
        let mut state = ReconnectState::default();

        loop {
            let outcome = self.cycle(&mut state).await;
            state.cancel_keepalive();

            let err = match outcome {
                Ok(()) => return Ok(()),
                Err(_) if self.stopping() => return Ok(()),
                Err(e) => e,
            };
            self.session.fail(&err);

            if state.attempt >= self.policy.max_attempts {
                error!(
                    session_id = %self.session.id(),
                    attempts = state.attempt,
                    error = %err,
                    "Reconnection attempts exhausted"
                );
                return Err(Error::ReconnectExhausted {
                    attempts: state.attempt,
                });
            }

            state.backoff = self.policy.delay_for(state.attempt);
            state.attempt += 1;
            warn!(
                session_id = %self.session.id(),
                attempt = state.attempt,
                max_attempts = self.policy.max_attempts,
                delay = ?state.backoff,
                error = %err,
                "Session lost, reconnecting"
            );

            if !self.backoff(state.backoff).await {
                return Ok(());
            }
        }
    }

    fn stopping(&self) -> bool {
        self.session.stop_requested() || self.session.status().is_shutting_down()
    }

    /// Sleeps `delay`; returns false if the session is stopped meanwhile.
    async fn backoff(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.stopping();
        }
        let mut status = self.session.subscribe();
        tokio::select! {
            _ = sleep(delay) => !self.stopping(),
            _ = status.wait_for(|s| s.is_shutting_down()) => false,
        }
    }

    /// One connection lifetime: connect, negotiate, receive until the
    /// session stops (`Ok`) or is lost (`Err`).
    async fn cycle(&self, state: &mut ReconnectState) -> Result<()> {
        state.cancel_keepalive();
        let mut inbound = self.session.connect().await?;
        let mut status = self.session.subscribe();

        let session = self.session.clone();
        let receive = inbound.receive_loop(move |text| {
            let session = session.clone();
            async move { session.handle_message(&text).await }
        });
        tokio::pin!(receive);

        let mut seen = None;
        loop {
            let current = *status.borrow_and_update();
            if seen != Some(current) {
                seen = Some(current);
                match current {
                    SessionStatus::Active => {
                        info!(session_id = %self.session.id(), "Session active");
                        state.reset();
                        self.spawn_keepalive(state);
                    }
                    SessionStatus::Failed => {
                        return Err(self
                            .session
                            .last_failure()
                            .unwrap_or_else(|| Error::connect("session failed")));
                    }
                    s if s.is_shutting_down() => return Ok(()),
                    _ => {}
                }
            }

            tokio::select! {
                res = &mut receive => {
                    res?;
                    if self.stopping() {
                        return Ok(());
                    }
                    return Err(Error::connect("signaling channel closed by server"));
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    fn spawn_keepalive(&self, state: &mut ReconnectState) {
        state.cancel_keepalive();
        let session = self.session.clone();
        let period = self.keepalive_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if session.status() != SessionStatus::Active {
                    debug!(session_id = %session.id(), "Keep-alive stopping, session not active");
                    break;
                }
                if let Err(e) = session.send(&Outbound::Ping) {
                    warn!(session_id = %session.id(), error = %e, "Keep-alive ping failed, stopping keep-alive");
                    break;
                }
            }
        });

        self.session.register_task(handle.abort_handle());
        state.keepalive = Some(handle);
    }
}

fn spawn_event_forwarder(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<EngineEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            session.handle_engine_event(event).await;
        }
        debug!("Engine event stream ended");
    })
}
