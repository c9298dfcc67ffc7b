use anyhow::{Context, Result};
use clap::Parser;
use screenshare_lib::capture::TestPattern;
use screenshare_lib::config::{
    parse_relay_servers, SessionConfig, DEFAULT_BITRATE, DEFAULT_FPS, DEFAULT_LOG_FILTER,
};
use screenshare_lib::logger;
use tracing::{error, info};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "screenshare-signal", about = "Screen-share signaling client for an SFU")]
struct Args {
    /// Signaling WebSocket URL
    #[arg(long, env = "SCREENSHARE_WS_URL")]
    ws_url: Url,

    /// SFU component
    #[arg(long, env = "SCREENSHARE_SFU_COMPONENT")]
    sfu_component: String,

    /// Role (send/recv)
    #[arg(long, env = "SCREENSHARE_ROLE")]
    role: String,

    #[arg(long, env = "SCREENSHARE_VOICE_BRIDGE")]
    voice_bridge: String,

    #[arg(long, env = "SCREENSHARE_INTERNAL_MEETING_ID")]
    internal_meeting_id: String,

    #[arg(long, env = "SCREENSHARE_USER_NAME")]
    user_name: String,

    #[arg(long, env = "SCREENSHARE_CALLER_NAME")]
    caller_name: String,

    /// Cookie header for the WebSocket handshake
    #[arg(long, env = "SCREENSHARE_COOKIES")]
    cookies: String,

    /// TURN servers as a JSON array of {url, username, password, ttl}
    #[arg(long, env = "SCREENSHARE_TURN_SERVERS", default_value = "[]")]
    turn_servers: String,

    #[arg(long, env = "SCREENSHARE_HAS_AUDIO", default_value_t = false)]
    has_audio: bool,

    /// Target bitrate in kbps
    #[arg(long, env = "SCREENSHARE_BITRATE", default_value_t = DEFAULT_BITRATE)]
    bitrate: u32,

    /// Capture frame rate
    #[arg(long, default_value_t = DEFAULT_FPS)]
    fps: u32,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(&args.log);

    let mut config = SessionConfig::new(
        args.ws_url,
        args.cookies,
        args.sfu_component,
        args.role,
        args.internal_meeting_id,
        args.voice_bridge,
        args.user_name,
        args.caller_name,
    );
    config.has_audio = args.has_audio;
    config.bitrate = args.bitrate;
    config.capture.fps = args.fps;
    config.relay_servers =
        parse_relay_servers(&args.turn_servers).context("failed to parse --turn-servers")?;

    info!(
        endpoint = %config.endpoint,
        component = %config.component,
        relays = config.relay_servers.len(),
        "Starting screen share"
    );

    let capture = Box::new(TestPattern::new(config.capture.fps));
    if let Err(e) = screenshare_lib::run(config, capture).await {
        error!(error = %e, "Screen share ended with an error");
        return Err(e.into());
    }
    Ok(())
}
