use crate::error::{NegotiationError, Result};
use crate::peer::engine::Engine;
use crate::peer::ice::wait_for_gathering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const MSID_SEMANTIC: &str = "a=msid-semantic: WMS *";
pub const EXTMAP_ALLOW_MIXED: &str = "a=extmap-allow-mixed";

/// Payload types the SFU expects to see advertised ahead of the video section.
pub const VIDEO_CODEC_BLOCK: [&str; 8] = [
    "a=rtpmap:97 VP8/90000",
    "a=rtpmap:102 H264/90000",
    "a=rtcp-fb:102 goog-remb",
    "a=rtcp-fb:102 transport-cc",
    "a=rtcp-fb:102 ccm fir",
    "a=rtcp-fb:102 nack",
    "a=rtcp-fb:102 nack pli",
    "a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f",
];

/// One negotiation attempt's offer. Dropped once the `start` message is sent.
#[derive(Debug, Clone)]
pub struct LocalOffer {
    pub original: String,
    pub rewritten: String,
}

pub struct Negotiator {
    engine: Arc<dyn Engine>,
    gather_timeout: Duration,
}

impl Negotiator {
    pub fn new(engine: Arc<dyn Engine>, gather_timeout: Duration) -> Self {
        Self {
            engine,
            gather_timeout,
        }
    }

    /// Creates the offer, waits for ICE gathering and returns the gathered
    /// local description.
    pub async fn generate_offer(&self) -> Result<String> {
        if !self.engine.has_video_transceiver().await {
            return Err(NegotiationError::NoMediaTransceiver.into());
        }

        self.engine.create_offer().await?;
        wait_for_gathering(self.engine.as_ref(), self.gather_timeout).await?;

        let sdp = self
            .engine
            .local_description()
            .await
            .ok_or(NegotiationError::MissingLocalDescription)?;
        debug!(sdp = %sdp, "Generated local description");
        Ok(sdp)
    }

    pub async fn build_offer(&self) -> Result<LocalOffer> {
        let original = self.generate_offer().await?;
        let rewritten = rewrite(&original);
        info!(
            original_len = original.len(),
            rewritten_len = rewritten.len(),
            "Offer rewritten for SFU"
        );
        Ok(LocalOffer {
            original,
            rewritten,
        })
    }
}

/// Rewrites an engine offer into the form the SFU accepts.
///
/// Not idempotent: apply exactly once per offer. Line endings of the input
/// (`\r\n` or `\n`) are kept.
pub fn rewrite(sdp: &str) -> String {
    let sep = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = sdp
        .split(sep)
        .map(|line| {
            if line.starts_with("a=msid-semantic:") {
                MSID_SEMANTIC.to_owned()
            } else {
                line.to_owned()
            }
        })
        .collect();

    // Only the session section counts; media sections may carry their own copy.
    let first_media = lines
        .iter()
        .position(|l| l.starts_with("m="))
        .unwrap_or_else(|| end_of_content(&lines));
    if !lines[..first_media].iter().any(|l| l == EXTMAP_ALLOW_MIXED) {
        lines.insert(first_media, EXTMAP_ALLOW_MIXED.to_owned());
    }

    if let Some(at) = lines.iter().position(|l| l.starts_with("m=video")) {
        for (offset, line) in VIDEO_CODEC_BLOCK.iter().enumerate() {
            lines.insert(at + offset, (*line).to_owned());
        }
    }

    lines.join(sep)
}

// Index past the last non-empty line, so a trailing separator stays trailing.
fn end_of_content(lines: &[String]) -> usize {
    lines
        .iter()
        .rposition(|l| !l.is_empty())
        .map_or(0, |i| i + 1)
}
