// In-memory engine, transport and capture for session tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use screenshare_lib::capture::{CaptureSource, Frame};
use screenshare_lib::config::{CaptureRegion, SessionConfig};
use screenshare_lib::error::{Error, Result};
use screenshare_lib::peer::engine::{Engine, EngineEvent, GatheringState, IceConnectionState};
use screenshare_lib::peer::types::IceCandidate;
use screenshare_lib::session::{Session, SessionStatus};
use screenshare_lib::signaling::transport::{Channel, Connector, Inbound};
use screenshare_lib::supervisor::Supervisor;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use url::Url;

pub const OFFER_SDP: &str = "v=0\r\n\
o=- 1 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0\r\n\
a=msid-semantic: WMS stream\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 97 102\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=sendonly\r\n";

pub const ANSWER_SDP: &str = "v=0\r\no=- 9 2 IN IP4 10.0.0.1\r\ns=-\r\nt=0 0\r\nm=video 9 UDP/TLS/RTP/SAVPF 97\r\n";

const WAIT_LIMIT: Duration = Duration::from_secs(300);

pub fn config() -> SessionConfig {
    SessionConfig::new(
        Url::parse("wss://sfu.test/bbb-webrtc-sfu").expect("url"),
        "JSESSIONID=abc",
        "screenshare",
        "send",
        "meeting-1",
        "72013",
        "alice",
        "w_alice",
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    SetRemote(String),
    AddCandidate(String),
    AddTrack,
    RemoveTrack,
    Frame,
    Reset,
    Close,
}

pub struct MockEngine {
    calls: Mutex<Vec<Call>>,
    gathering: Mutex<GatheringState>,
    track: AtomicBool,
    fail_add_track: AtomicBool,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl MockEngine {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let engine = Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            gathering: Mutex::new(GatheringState::Complete),
            track: AtomicBool::new(false),
            fail_add_track: AtomicBool::new(false),
            events,
        });
        (engine, rx)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn set_gathering(&self, state: GatheringState) {
        *self.gathering.lock().unwrap() = state;
    }

    pub fn fail_add_track(&self) {
        self.fail_add_track.store(true, Ordering::SeqCst);
    }

    pub fn emit(&self, event: EngineEvent) {
        self.events.send(event).expect("event receiver alive");
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn create_offer(&self) -> Result<()> {
        self.record(Call::CreateOffer);
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        Some(OFFER_SDP.to_string())
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        self.record(Call::SetRemote(sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn add_track(&self) -> Result<()> {
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(Error::engine("track rejected"));
        }
        self.track.store(true, Ordering::SeqCst);
        self.record(Call::AddTrack);
        Ok(())
    }

    async fn remove_track(&self) -> Result<()> {
        self.track.store(false, Ordering::SeqCst);
        self.record(Call::RemoveTrack);
        Ok(())
    }

    async fn has_video_transceiver(&self) -> bool {
        self.track.load(Ordering::SeqCst)
    }

    async fn write_frame(&self, _frame: &Frame) -> Result<()> {
        self.record(Call::Frame);
        Ok(())
    }

    fn ice_gathering_state(&self) -> GatheringState {
        *self.gathering.lock().unwrap()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        IceConnectionState::New
    }

    async fn reset(&self) -> Result<()> {
        self.record(Call::Reset);
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Server side of one in-memory connection.
pub struct RemoteEnd {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<Result<String>>,
}

impl RemoteEnd {
    /// Next frame the client sent, as JSON. `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Value> {
        let text = timeout(WAIT_LIMIT, self.sent.recv())
            .await
            .expect("timed out waiting for a client frame")?;
        Some(serde_json::from_str(&text).expect("client sent valid JSON"))
    }

    /// Skips frames until one with the given `id` arrives.
    pub async fn recv_id(&mut self, id: &str) -> Value {
        loop {
            let frame = self.recv().await.expect("client closed the channel");
            if frame["id"] == id {
                return frame;
            }
        }
    }

    /// Frames already sent and not yet read.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.sent.try_recv() {
            frames.push(serde_json::from_str(&text).expect("client sent valid JSON"));
        }
        frames
    }

    /// Stops accepting client frames; later client sends fail.
    pub fn stop_reading(&mut self) {
        self.sent.close();
    }

    pub fn push(&self, message: Value) {
        self.push_raw(&message.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        self.inbound
            .send(Ok(text.to_string()))
            .expect("client receive loop alive");
    }
}

/// Hands out one [`RemoteEnd`] per successful connect.
pub struct MemoryConnector {
    ends_tx: mpsc::UnboundedSender<RemoteEnd>,
    ends_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        let (ends_tx, ends_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            ends_tx,
            ends_rx: tokio::sync::Mutex::new(ends_rx),
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        })
    }

    pub fn refuse_all(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub async fn accept(&self) -> RemoteEnd {
        let mut ends = self.ends_rx.lock().await;
        timeout(WAIT_LIMIT, ends.recv())
            .await
            .expect("timed out waiting for a connect")
            .expect("connector alive")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _config: &SessionConfig) -> Result<(Channel, Inbound)> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(Error::connect("connection refused"));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let _ = self.ends_tx.send(RemoteEnd {
            sent: out_rx,
            inbound: in_tx,
        });
        Ok((Channel::new(out_tx), Inbound::new(in_rx)))
    }
}

/// A session wired to the mocks with its supervisor running.
pub struct Harness {
    pub engine: Arc<MockEngine>,
    pub connector: Arc<MemoryConnector>,
    pub session: Arc<Session>,
    pub supervisor: JoinHandle<Result<()>>,
}

impl Harness {
    /// Track attached, supervisor waiting for a negotiation request.
    pub async fn new(config: SessionConfig) -> Self {
        let (engine, events) = MockEngine::new();
        engine.add_track().await.expect("attach track");
        let connector = MemoryConnector::new();
        let session = Session::new(Arc::new(config), engine.clone(), connector.clone());
        let supervisor = tokio::spawn(Supervisor::new(session.clone(), events).run());
        Self {
            engine,
            connector,
            session,
            supervisor,
        }
    }

    pub async fn started(config: SessionConfig) -> Self {
        let harness = Self::new(config).await;
        harness.session.request_negotiation();
        harness
    }

    /// Accepts the next connection and answers its `start`.
    pub async fn activate(&self) -> RemoteEnd {
        let mut remote = self.connector.accept().await;
        remote.recv_id("start").await;
        remote.push(accepted());
        wait_status(&self.session, SessionStatus::Active).await;
        remote
    }
}

pub fn accepted() -> Value {
    serde_json::json!({
        "id": "startResponse",
        "response": "accepted",
        "sdpAnswer": ANSWER_SDP,
    })
}

pub fn remote_candidate(n: u32) -> Value {
    serde_json::json!({
        "id": "iceCandidate",
        "candidate": {
            "candidate": candidate_line(n),
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        }
    })
}

pub fn candidate_line(n: u32) -> String {
    format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000{n} typ host")
}

pub async fn wait_status(session: &Session, status: SessionStatus) {
    let mut rx = session.subscribe();
    timeout(WAIT_LIMIT, rx.wait_for(|s| *s == status))
        .await
        .unwrap_or_else(|_| panic!("session never reached {status:?}"))
        .expect("status channel open");
}

/// Polls `cond` on the paused clock until it holds.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let polled = timeout(WAIT_LIMIT, async {
        while !cond() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition never held");
}

/// Capture source with scripted timing and failures.
#[derive(Clone, Default)]
pub struct MockCapture {
    pub delay: Duration,
    pub fail_after: Option<usize>,
    pub fail_open: bool,
    pub raw: bool,
    pub grabbed: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

#[async_trait]
impl CaptureSource for MockCapture {
    async fn open(&mut self, region: CaptureRegion) -> Result<()> {
        if self.fail_open {
            return Err(Error::capture(format!(
                "no display at {},{}",
                region.left, region.top
            )));
        }
        Ok(())
    }

    async fn grab_frame(&mut self) -> Result<Frame> {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let n = self.grabbed.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_after.is_some_and(|limit| n > limit) {
            return Err(Error::capture("display went away"));
        }
        Ok(Frame {
            data: Bytes::from_static(b"frame"),
            width: 800,
            height: 600,
            duration: Duration::from_millis(33),
        })
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn encoded(&self) -> bool {
        !self.raw
    }
}
