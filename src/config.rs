// Session configuration.
// Built once at startup and never mutated afterwards.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "info";

pub const DEFAULT_BITRATE: u32 = 1500;
pub const DEFAULT_FPS: u32 = 30;
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(10);

/// TURN credentials handed to the engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelayServer {
    pub url: String,
    pub username: String,
    pub password: String,
    /// Present in server-issued credentials; not used by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

/// Bounded reconnection. The delay before attempt `i` is `backoff_base * i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            backoff_base: RECONNECT_BACKOFF_BASE,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// Screen area handed to the capture provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureRegion {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureRegion {
    fn default() -> Self {
        Self {
            left: 250,
            top: 50,
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub fps: u32,
    pub region: CaptureRegion,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            region: CaptureRegion::default(),
        }
    }
}

impl CaptureSettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Url,
    /// Opaque auth cookie sent with the WebSocket handshake.
    pub cookie: String,
    /// SFU component, sent as both `type` and `contentType`.
    pub component: String,
    pub role: String,
    pub internal_meeting_id: String,
    pub voice_bridge: String,
    pub user_name: String,
    pub caller_name: String,
    pub has_audio: bool,
    pub bitrate: u32,
    pub relay_servers: Vec<RelayServer>,
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectPolicy,
    pub gather_timeout: Duration,
    pub capture: CaptureSettings,
}

impl SessionConfig {
    /// Required inputs only; everything else takes its default.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: Url,
        cookie: impl Into<String>,
        component: impl Into<String>,
        role: impl Into<String>,
        internal_meeting_id: impl Into<String>,
        voice_bridge: impl Into<String>,
        user_name: impl Into<String>,
        caller_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            cookie: cookie.into(),
            component: component.into(),
            role: role.into(),
            internal_meeting_id: internal_meeting_id.into(),
            voice_bridge: voice_bridge.into(),
            user_name: user_name.into(),
            caller_name: caller_name.into(),
            has_audio: false,
            bitrate: DEFAULT_BITRATE,
            relay_servers: Vec::new(),
            keepalive_interval: KEEPALIVE_INTERVAL,
            reconnect: ReconnectPolicy::default(),
            gather_timeout: ICE_GATHER_TIMEOUT,
            capture: CaptureSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::config(format!(
                    "endpoint must be ws:// or wss://, got {other}://"
                )))
            }
        }

        let required = [
            ("component", &self.component),
            ("role", &self.role),
            ("internal meeting id", &self.internal_meeting_id),
            ("voice bridge", &self.voice_bridge),
            ("user name", &self.user_name),
            ("caller name", &self.caller_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::config(format!("{name} cannot be empty")));
            }
        }

        if self.bitrate == 0 {
            return Err(Error::config("bitrate must be positive"));
        }
        if self.capture.fps == 0 {
            return Err(Error::config("fps must be positive"));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(Error::config("at least one reconnection attempt is required"));
        }

        let mut seen = HashSet::new();
        for relay in &self.relay_servers {
            if relay.url.is_empty() {
                return Err(Error::config("relay URL cannot be empty"));
            }
            if relay.username.is_empty() || relay.password.is_empty() {
                return Err(Error::config(format!(
                    "relay {} requires username and password",
                    relay.url
                )));
            }
            if !seen.insert(relay.url.as_str()) {
                return Err(Error::config(format!("duplicate relay {}", relay.url)));
            }
        }

        Ok(())
    }
}

/// Parses a JSON array of `{url, username, password, ttl?}` objects.
pub fn parse_relay_servers(json: &str) -> Result<Vec<RelayServer>> {
    serde_json::from_str(json).map_err(|e| Error::config(format!("invalid relay list: {e}")))
}
