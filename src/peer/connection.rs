use crate::capture::Frame;
use crate::config::{RelayServer, SessionConfig};
use crate::error::{Error, Result};
use crate::peer::engine::{Engine, EngineEvent, GatheringState, IceConnectionState};
use crate::peer::ice::{analyze_candidates, dump_candidate};
use crate::peer::types::IceCandidate;
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const DEFAULT_STUN: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// [`Engine`] backed by the `webrtc` crate.
pub struct RtcEngine {
    api: API,
    rtc_config: RTCConfiguration,
    events: mpsc::UnboundedSender<EngineEvent>,
    pc: RwLock<Arc<RTCPeerConnection>>,
    track: Arc<TrackLocalStaticSample>,
    sender: tokio::sync::Mutex<Option<Arc<RTCRtpSender>>>,
    local_candidates: Arc<Mutex<Vec<IceCandidate>>>,
    relays_configured: bool,
}

impl RtcEngine {
    pub async fn new(
        config: &SessionConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        let api = build_api()?;
        let rtc_config = rtc_config(&config.relay_servers);
        let local_candidates = Arc::new(Mutex::new(Vec::new()));
        let relays_configured = !config.relay_servers.is_empty();

        let pc = new_peer(
            &api,
            rtc_config.clone(),
            events.clone(),
            local_candidates.clone(),
            relays_configured,
        )
        .await?;

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            config.component.clone(),
        ));

        Ok(Self {
            api,
            rtc_config,
            events,
            pc: RwLock::new(pc),
            track,
            sender: tokio::sync::Mutex::new(None),
            local_candidates,
            relays_configured,
        })
    }

    fn peer(&self) -> Arc<RTCPeerConnection> {
        self.pc.read().clone()
    }

    async fn attach_track(
        &self,
        pc: &RTCPeerConnection,
        slot: &mut Option<Arc<RTCRtpSender>>,
    ) -> Result<()> {
        let sender = pc
            .add_track(Arc::clone(&self.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be read for the interceptors (NACK, REMB) to run.
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        *slot = Some(sender);
        Ok(())
    }
}

/// VP8 first, then H264 constrained baseline.
fn build_api() -> Result<API> {
    let mut m = MediaEngine::default();

    let feedback = vec![
        RTCPFeedback {
            typ: "goog-remb".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "transport-cc".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "ccm".to_owned(),
            parameter: "fir".to_owned(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: String::new(),
        },
        RTCPFeedback {
            typ: "nack".to_owned(),
            parameter: "pli".to_owned(),
        },
    ];

    m.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: feedback.clone(),
            },
            payload_type: 97,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;
    m.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f"
                        .to_owned(),
                rtcp_feedback: feedback,
            },
            payload_type: 102,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    let registry = register_default_interceptors(Registry::new(), &mut m)?;

    Ok(APIBuilder::new()
        .with_media_engine(m)
        .with_interceptor_registry(registry)
        .build())
}

fn rtc_config(relays: &[RelayServer]) -> RTCConfiguration {
    let ice_servers = if relays.is_empty() {
        vec![RTCIceServer {
            urls: DEFAULT_STUN.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }]
    } else {
        relays
            .iter()
            .map(|relay| RTCIceServer {
                urls: vec![add_ice_url_scheme(relay)],
                username: relay.username.clone(),
                credential: relay.password.clone(),
            })
            .collect()
    };

    RTCConfiguration {
        ice_servers,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

async fn new_peer(
    api: &API,
    config: RTCConfiguration,
    events: mpsc::UnboundedSender<EngineEvent>,
    local_candidates: Arc<Mutex<Vec<IceCandidate>>>,
    relays_configured: bool,
) -> Result<Arc<RTCPeerConnection>> {
    let pc = Arc::new(api.new_peer_connection(config).await?);

    let candidate_events = events.clone();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => match c.to_json() {
                Ok(init) => {
                    let candidate = IceCandidate::from(init);
                    dump_candidate("LOCAL", &candidate);
                    local_candidates.lock().push(candidate.clone());
                    let _ = candidate_events.send(EngineEvent::LocalCandidate(candidate));
                }
                Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
            },
            None => {
                // End of gathering.
                analyze_candidates(&local_candidates.lock(), relays_configured);
                let _ = candidate_events.send(EngineEvent::GatheringComplete);
            }
        }
        Box::pin(async {})
    }));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(?state, "ICE gathering state changed");
        Box::pin(async {})
    }));

    let state_events = events;
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        info!(?state, "ICE connection state changed");
        let _ = state_events.send(EngineEvent::IceConnectionState(map_connection_state(state)));
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(?state, "Peer connection state changed");
        Box::pin(async {})
    }));

    Ok(pc)
}

fn map_connection_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

#[async_trait]
impl Engine for RtcEngine {
    async fn create_offer(&self) -> Result<()> {
        let pc = self.peer();
        self.local_candidates.lock().clear();
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<String> {
        self.peer().local_description().await.map(|d| d.sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.peer().set_remote_description(answer).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.peer().add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn add_track(&self) -> Result<()> {
        let mut slot = self.sender.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let pc = self.peer();
        self.attach_track(&pc, &mut slot).await?;
        info!("Outbound video track attached");
        Ok(())
    }

    async fn remove_track(&self) -> Result<()> {
        let Some(sender) = self.sender.lock().await.take() else {
            return Ok(());
        };
        self.peer().remove_track(&sender).await?;
        info!("Outbound video track detached");
        Ok(())
    }

    async fn has_video_transceiver(&self) -> bool {
        self.peer()
            .get_transceivers()
            .await
            .iter()
            .any(|t| t.kind() == RTPCodecType::Video)
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        self.track
            .write_sample(&Sample {
                data: frame.data.clone(),
                duration: frame.duration,
                ..Default::default()
            })
            .await
            .map_err(Error::from)
    }

    fn ice_gathering_state(&self) -> GatheringState {
        match self.peer().ice_gathering_state() {
            RTCIceGatheringState::Complete => GatheringState::Complete,
            RTCIceGatheringState::Gathering => GatheringState::Gathering,
            _ => GatheringState::New,
        }
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        map_connection_state(self.peer().ice_connection_state())
    }

    async fn reset(&self) -> Result<()> {
        let mut slot = self.sender.lock().await;
        let had_track = slot.take().is_some();

        let fresh = new_peer(
            &self.api,
            self.rtc_config.clone(),
            self.events.clone(),
            self.local_candidates.clone(),
            self.relays_configured,
        )
        .await?;
        let stale = std::mem::replace(&mut *self.pc.write(), fresh.clone());
        // The stale connection's Closed state must not reach the session.
        stale.on_ice_candidate(Box::new(|_: Option<RTCIceCandidate>| Box::pin(async {})));
        stale.on_ice_connection_state_change(Box::new(|_: RTCIceConnectionState| {
            Box::pin(async {})
        }));
        if let Err(e) = stale.close().await {
            debug!(error = %e, "Closing stale peer connection failed");
        }

        if had_track {
            self.attach_track(&fresh, &mut slot).await?;
        }
        info!(had_track, "Peer connection reset");
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.peer().close().await {
            warn!(error = %e, "Peer connection close failed");
        }
    }
}
